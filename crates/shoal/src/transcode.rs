// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Value transcoding between caller values and wire buffers.
//!
//! A stored value travels as `(buffer, flags)`; the low bits of the flags
//! word record which codec produced the buffer, so decode never consults the
//! session default. Callers may plug a [`CustomCodec`]; any operation the
//! codec declines falls back to the built-in codec selected by the flags.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{self, Value};

/// JSON text, the default format.
pub const FMT_JSON: u32 = 0x0;
/// Native dynamic serialization (msgpack).
pub const FMT_PACKED: u32 = 0x1;
/// Raw bytes, stored untouched.
pub const FMT_BYTES: u32 = 0x2;
/// UTF-8 text.
pub const FMT_UTF8: u32 = 0x4;
/// Mask isolating the format bits of a flags word.
pub const FMT_MASK: u32 = 0x7;

/// Whether the format bits of `flags` name a built-in codec.
pub fn format_recognized(flags: u32) -> bool {
    matches!(flags & FMT_MASK, FMT_JSON | FMT_PACKED | FMT_BYTES | FMT_UTF8)
}

/// An encoded value: the owned wire buffer plus the flags that describe it.
///
/// The session holds the buffer across the engine submission call and drops
/// it once the engine has copied the bytes; nothing else may retain it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedValue {
    pub bytes: Vec<u8>,
    pub flags: u32,
}

/// Caller-supplied codec. Every operation is optional: returning `None`
/// delegates that conversion to the built-in codec.
pub trait CustomCodec: Send + Sync {
    fn encode_key(&self, key: &str) -> Option<std::result::Result<Vec<u8>, String>> {
        let _ = key;
        None
    }

    fn encode_value(
        &self,
        value: &Value,
        flags: u32,
    ) -> Option<std::result::Result<EncodedValue, String>> {
        let _ = (value, flags);
        None
    }

    fn decode_key(&self, raw: &[u8]) -> Option<std::result::Result<String, String>> {
        let _ = raw;
        None
    }

    fn decode_value(
        &self,
        raw: &[u8],
        flags: u32,
    ) -> Option<std::result::Result<Value, String>> {
        let _ = (raw, flags);
        None
    }
}

/// Transcoder dispatch: either the built-in codecs alone, or a custom codec
/// with built-in fallback per operation.
#[derive(Clone, Default)]
pub enum Transcoder {
    #[default]
    BuiltIn,
    Custom(Arc<dyn CustomCodec>),
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transcoder::BuiltIn => f.write_str("Transcoder::BuiltIn"),
            Transcoder::Custom(_) => f.write_str("Transcoder::Custom(..)"),
        }
    }
}

impl Transcoder {
    /// Encodes a key for submission. Keys that encode to zero bytes are
    /// rejected before anything reaches the engine.
    pub fn encode_key(&self, key: &str) -> Result<Vec<u8>> {
        let bytes = match self {
            Transcoder::Custom(codec) => match codec.encode_key(key) {
                Some(res) => res.map_err(Error::encoding)?,
                None => key.as_bytes().to_vec(),
            },
            Transcoder::BuiltIn => key.as_bytes().to_vec(),
        };
        if bytes.is_empty() {
            return Err(Error::empty_key());
        }
        Ok(bytes)
    }

    pub fn decode_key(&self, raw: &[u8]) -> Result<String> {
        if let Transcoder::Custom(codec) = self {
            if let Some(res) = codec.decode_key(raw) {
                return res.map_err(Error::encoding);
            }
        }
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::encoding("key returned by the engine is not utf8"))
    }

    /// Encodes a value with the given flags word; the format bits select the
    /// built-in codec when no custom codec claims the conversion.
    pub fn encode_value(&self, value: &Value, flags: u32) -> Result<EncodedValue> {
        if let Transcoder::Custom(codec) = self {
            if let Some(res) = codec.encode_value(value, flags) {
                return res.map_err(Error::encoding);
            }
        }
        builtin_encode(value, flags).map_err(Error::encoding)
    }

    /// Decodes a value buffer. Codec selection comes from the stored flags
    /// alone, never from the session default.
    pub fn decode_value(&self, raw: &[u8], flags: u32) -> Result<Value> {
        if let Transcoder::Custom(codec) = self {
            if let Some(res) = codec.decode_value(raw, flags) {
                return res.map_err(Error::encoding);
            }
        }
        builtin_decode(raw, flags).map_err(Error::encoding)
    }
}

/// Encodes a serializable caller type straight to a packed buffer.
pub fn encode_packed<T: serde::Serialize>(value: &T) -> Result<EncodedValue> {
    let dynamic = value::to_value(value).map_err(Error::encoding)?;
    builtin_encode(&dynamic, FMT_PACKED).map_err(Error::encoding)
}

/// Decodes a packed buffer into a concrete caller type.
///
/// Tries the direct serde path first and falls back to reading the dynamic
/// tree, which tolerates payloads written with integer map keys.
pub fn decode_packed<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T> {
    match rmp_serde::from_slice::<T>(raw) {
        Ok(value) => Ok(value),
        Err(direct) => {
            let direct = Error::encoding(format!("packed decode error: {direct}"));
            let mut cursor = std::io::Cursor::new(raw);
            let tree = rmpv::decode::read_value(&mut cursor)
                .map_err(|err| Error::encoding(format!("packed decode error: {err}")))?;
            rmpv::ext::from_value::<T>(tree).map_err(|err| {
                Error::encoding(format!("packed decode error: {err}")).with_cause(direct)
            })
        }
    }
}

fn builtin_encode(value: &Value, flags: u32) -> std::result::Result<EncodedValue, String> {
    let bytes = match flags & FMT_MASK {
        FMT_JSON => {
            let tree = value::to_json(value)?;
            serde_json::to_vec(&tree).map_err(|err| format!("json encode error: {err}"))?
        }
        FMT_PACKED => {
            let mut buf = Vec::new();
            write_packed(&mut buf, value).map_err(|err| format!("packed encode error: {err}"))?;
            buf
        }
        FMT_BYTES => match value {
            Value::Bytes(bytes) => bytes.clone(),
            _ => return Err("FMT_BYTES requires a byte value".to_string()),
        },
        FMT_UTF8 => match value {
            Value::Text(text) => text.as_bytes().to_vec(),
            _ => return Err("FMT_UTF8 requires a text value".to_string()),
        },
        other => return Err(format!("unrecognized format flags 0x{other:x}")),
    };
    Ok(EncodedValue { bytes, flags })
}

fn builtin_decode(raw: &[u8], flags: u32) -> std::result::Result<Value, String> {
    match flags & FMT_MASK {
        FMT_JSON => {
            let tree: serde_json::Value =
                serde_json::from_slice(raw).map_err(|err| format!("json decode error: {err}"))?;
            Ok(value::from_json(tree))
        }
        FMT_PACKED => {
            let mut cursor = std::io::Cursor::new(raw);
            let tree = rmpv::decode::read_value(&mut cursor)
                .map_err(|err| format!("packed decode error: {err}"))?;
            value::from_msgpack(tree)
        }
        FMT_BYTES => Ok(Value::Bytes(raw.to_vec())),
        FMT_UTF8 => String::from_utf8(raw.to_vec())
            .map(Value::Text)
            .map_err(|_| "stored value is not utf8".to_string()),
        other => Err(format!("unrecognized format flags 0x{other:x}")),
    }
}

fn write_packed<W: std::io::Write>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    use rmp::encode;

    match value {
        Value::Null => encode::write_nil(writer),
        Value::Bool(v) => encode::write_bool(writer, *v),
        Value::Integer(v) => encode::write_sint(writer, *v)
            .map(drop)
            .map_err(std::io::Error::from),
        Value::Unsigned(v) => encode::write_uint(writer, *v)
            .map(drop)
            .map_err(std::io::Error::from),
        Value::Float(v) => encode::write_f64(writer, *v).map_err(std::io::Error::from),
        Value::Text(s) => encode::write_str(writer, s).map_err(std::io::Error::from),
        Value::Bytes(bytes) => encode::write_bin(writer, bytes).map_err(std::io::Error::from),
        Value::Array(items) => {
            encode::write_array_len(writer, items.len() as u32)
                .map(drop)
                .map_err(std::io::Error::from)?;
            for item in items {
                write_packed(writer, item)?;
            }
            Ok(())
        }
        Value::Map(entries) => {
            encode::write_map_len(writer, entries.len() as u32)
                .map(drop)
                .map_err(std::io::Error::from)?;
            for (key, value) in entries {
                write_packed(writer, key)?;
                write_packed(writer, value)?;
            }
            Ok(())
        }
    }
}
