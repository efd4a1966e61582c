// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Result objects.
//!
//! One result is allocated per completed operation, populated exclusively by
//! the callback adapter during the blocking wait, and handed to the caller
//! (directly or through a [`crate::multi::MultiResult`]) once the wait
//! drains. After hand-off the core never mutates it again.

use serde::de::DeserializeOwned;

use crate::engine::{Cas, Completion};
use crate::error::{Error, Result, ResultSnapshot};
use crate::status::StatusCode;
use crate::transcode::Transcoder;
use crate::value::{self, Value};

/// Common accessors shared by every result variant.
pub trait KvResult {
    fn status_code(&self) -> StatusCode;
    fn key(&self) -> &str;
    fn cas(&self) -> Cas;

    fn success(&self) -> bool {
        self.status_code().is_ok()
    }

    fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            key: self.key().to_string(),
            status: self.status_code(),
            cas: self.cas(),
        }
    }
}

/// Outcome of a mutation that returns no value (store, touch, delete,
/// unlock).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationResult {
    pub status: StatusCode,
    pub key: String,
    pub cas: Cas,
}

impl OperationResult {
    pub(crate) fn from_completion(key: String, completion: &Completion) -> Self {
        OperationResult {
            status: completion.status,
            key,
            cas: completion.cas,
        }
    }
}

impl KvResult for OperationResult {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn cas(&self) -> Cas {
        self.cas
    }
}

/// How the callback adapter materializes a value buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DecodeMode {
    /// Decode through the transcoder using the stored flags.
    Transcode,
    /// Hand the raw buffer through untouched (data passthrough sessions).
    Passthrough,
    /// Parse an ASCII-decimal counter, as delivered for arithmetic.
    Counter,
}

/// Outcome of a value-bearing operation (get, get-and-touch, lock,
/// arithmetic).
#[derive(Clone, Debug, PartialEq)]
pub struct ValueResult {
    pub status: StatusCode,
    pub key: String,
    pub cas: Cas,
    /// Decoded value; `None` when the operation failed or decode did.
    pub value: Option<Value>,
    /// Flags word recorded with the stored value; selects the codec.
    pub flags: u32,
    /// Raw buffer kept for diagnostics when decode fails.
    pub raw: Option<Vec<u8>>,
}

impl ValueResult {
    /// Builds the result from an engine completion, decoding the value
    /// buffer per `mode`. A decode failure downgrades the status to
    /// [`StatusCode::CLIENT_DECODE_FAILURE`], keeps the raw buffer, and
    /// returns the error so the batch can record it as fatal.
    pub(crate) fn from_completion(
        key: String,
        completion: &Completion,
        transcoder: &Transcoder,
        mode: DecodeMode,
    ) -> (Self, Option<Error>) {
        let mut result = ValueResult {
            status: completion.status,
            key,
            cas: completion.cas,
            value: None,
            flags: completion.flags,
            raw: None,
        };

        let Some(raw) = completion.value.as_deref() else {
            return (result, None);
        };
        if completion.status.is_failure() {
            return (result, None);
        }

        let decoded = match mode {
            DecodeMode::Passthrough => Ok(Value::Bytes(raw.to_vec())),
            DecodeMode::Transcode => transcoder.decode_value(raw, completion.flags),
            DecodeMode::Counter => std::str::from_utf8(raw)
                .ok()
                .and_then(|text| text.parse::<u64>().ok())
                .map(Value::from_u64)
                .ok_or_else(|| Error::encoding("counter value is not ASCII decimal")),
        };

        match decoded {
            Ok(value) => {
                result.value = Some(value);
                (result, None)
            }
            Err(err) => {
                result.status = StatusCode::CLIENT_DECODE_FAILURE;
                result.raw = Some(raw.to_vec());
                let err = err.with_key(result.key.clone());
                (result, Some(err))
            }
        }
    }

    /// Converts the decoded value into a concrete caller type.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.value {
            Some(v) => value::from_value(v).map_err(Error::encoding),
            None => Err(Error::encoding("result holds no decoded value").with_key(self.key.clone())),
        }
    }
}

impl KvResult for ValueResult {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn cas(&self) -> Cas {
        self.cas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::FMT_UTF8;

    fn completion(status: StatusCode, value: Option<&[u8]>, flags: u32) -> Completion {
        Completion {
            status,
            key: b"k".to_vec(),
            cas: 11,
            value: value.map(|v| v.to_vec()),
            flags,
        }
    }

    #[test]
    fn successful_get_decodes_through_the_transcoder() {
        let c = completion(StatusCode::SUCCESS, Some(b"hola"), FMT_UTF8);
        let (result, fatal) =
            ValueResult::from_completion("k".into(), &c, &Transcoder::BuiltIn, DecodeMode::Transcode);
        assert!(fatal.is_none());
        assert!(result.success());
        assert_eq!(result.value, Some(Value::Text("hola".into())));
        assert_eq!(result.cas(), 11);
        assert_eq!(result.flags, FMT_UTF8);
    }

    #[test]
    fn decode_failure_downgrades_and_keeps_raw_bytes() {
        let c = completion(StatusCode::SUCCESS, Some(&[0xff, 0xfe]), FMT_UTF8);
        let (result, fatal) =
            ValueResult::from_completion("k".into(), &c, &Transcoder::BuiltIn, DecodeMode::Transcode);
        assert_eq!(result.status, StatusCode::CLIENT_DECODE_FAILURE);
        assert_eq!(result.value, None);
        assert_eq!(result.raw, Some(vec![0xff, 0xfe]));
        let fatal = fatal.expect("decode failure is reported");
        assert_eq!(fatal.key(), Some("k"));
    }

    #[test]
    fn failed_operations_never_attempt_decode() {
        let c = completion(StatusCode::KEY_NOT_FOUND, None, 0);
        let (result, fatal) =
            ValueResult::from_completion("k".into(), &c, &Transcoder::BuiltIn, DecodeMode::Transcode);
        assert!(fatal.is_none());
        assert_eq!(result.status, StatusCode::KEY_NOT_FOUND);
        assert_eq!(result.value, None);
    }

    #[test]
    fn passthrough_returns_raw_bytes_as_value() {
        let c = completion(StatusCode::SUCCESS, Some(&[1, 2, 3]), FMT_UTF8);
        let (result, fatal) = ValueResult::from_completion(
            "k".into(),
            &c,
            &Transcoder::BuiltIn,
            DecodeMode::Passthrough,
        );
        assert!(fatal.is_none());
        assert_eq!(result.value, Some(Value::Bytes(vec![1, 2, 3])));
    }

    #[test]
    fn counter_completions_parse_ascii_decimal() {
        let c = completion(StatusCode::SUCCESS, Some(b"42"), 0);
        let (result, fatal) =
            ValueResult::from_completion("n".into(), &c, &Transcoder::BuiltIn, DecodeMode::Counter);
        assert!(fatal.is_none());
        assert_eq!(result.value, Some(Value::Integer(42)));
    }
}
