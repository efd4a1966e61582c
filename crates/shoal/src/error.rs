// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Structured client errors.
//!
//! Every failure raised by this crate is a single [`Error`] value: a kind
//! from the fixed taxonomy plus whatever operation context was on hand when
//! it was built (engine status, implicated key, failing result, batch
//! report). Nested failures chain through `caused_by` instead of being
//! discarded.

use std::collections::BTreeMap;
use std::fmt;

use crate::engine::Cas;
use crate::status::StatusCode;

/// Failure taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Bad or missing caller input, including empty keys. Never suppressed.
    #[error("bad arguments")]
    Arguments,
    /// The transcoder failed to encode or decode a key or value.
    #[error("transcoding failed")]
    Encoding,
    /// The engine returned a non-success status for a scheduled or completed
    /// operation.
    #[error("engine operation failed")]
    Engine,
    /// An invariant inside this crate was violated. Never suppressed.
    #[error("internal client error")]
    Internal,
    /// A row/view request failed at the HTTP level.
    #[error("http request failed")]
    Http,
    /// The session was busy and its lock mode is exclusive.
    #[error("session in use by another caller")]
    Threading,
}

/// Owned snapshot of the single result that triggered an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSnapshot {
    pub key: String,
    pub status: StatusCode,
    pub cas: Cas,
}

/// Per-key outcome of the batch an error was raised from.
///
/// The aggregator itself transfers to the caller only on success, so the
/// error carries this owned report instead of the live collection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub all_ok: bool,
    pub statuses: BTreeMap<String, StatusCode>,
    pub fatal_count: usize,
}

/// A failure raised by the Shoal client.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<StatusCode>,
    key: Option<String>,
    result: Option<ResultSnapshot>,
    batch: Option<BatchReport>,
    offending: Option<String>,
    caused_by: Option<Box<Error>>,
}

impl Error {
    /// Single construction entry point; everything else specializes this.
    pub fn wrap(kind: ErrorKind, status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            status,
            key: None,
            result: None,
            batch: None,
            offending: None,
            caused_by: None,
        }
    }

    pub fn arguments(message: impl Into<String>) -> Self {
        Error::wrap(ErrorKind::Arguments, None, message)
    }

    pub fn empty_key() -> Self {
        Error::arguments("empty key (i.e. \"\", empty string) passed")
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Error::wrap(ErrorKind::Encoding, None, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::wrap(ErrorKind::Internal, None, message)
    }

    pub fn threading(message: impl Into<String>) -> Self {
        Error::wrap(ErrorKind::Threading, None, message)
    }

    /// The engine refused to accept a command.
    pub fn scheduling(status: StatusCode) -> Self {
        Error::wrap(
            ErrorKind::Engine,
            Some(status),
            "there was a problem scheduling your request, or determining the appropriate \
             server for the key(s) requested; this may also be a bug in the client if \
             there are no network issues",
        )
    }

    /// The blocking wait itself failed.
    pub fn wait_failure(status: StatusCode) -> Self {
        Error::wrap(
            ErrorKind::Engine,
            Some(status),
            "there was a problem while trying to send/receive your request over the \
             network; this may be a result of a bad network or a misconfigured client \
             or server",
        )
    }

    pub fn operation(status: StatusCode) -> Self {
        Error::wrap(ErrorKind::Engine, Some(status), status.describe())
    }

    pub fn http(status: StatusCode, http_status: u16, path: impl Into<String>) -> Self {
        Error::wrap(
            ErrorKind::Http,
            Some(status),
            format!("request returned HTTP {http_status}"),
        )
        .with_key(path)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_result(mut self, result: ResultSnapshot) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_batch(mut self, batch: BatchReport) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Attaches a description of the offending caller input.
    pub fn with_offending(mut self, what: impl Into<String>) -> Self {
        self.offending = Some(what.into());
        self
    }

    /// Chains a prior error instead of discarding it.
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.caused_by = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn result(&self) -> Option<&ResultSnapshot> {
        self.result.as_ref()
    }

    pub fn batch(&self) -> Option<&BatchReport> {
        self.batch.as_ref()
    }

    pub fn offending(&self) -> Option<&str> {
        self.offending.as_deref()
    }

    pub fn cause(&self) -> Option<&Error> {
        self.caused_by.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shoal {}: {}", self.kind, self.message)?;
        if let Some(status) = self.status {
            write!(f, " [status {status}]")?;
        }
        if let Some(key) = &self.key {
            write!(f, " [key {key:?}]")?;
        }
        if let Some(offending) = &self.offending {
            write!(f, " [input {offending}]")?;
        }
        if let Some(batch) = &self.batch {
            write!(
                f,
                " [batch: {} entries, {} fatal]",
                batch.statuses.len(),
                batch.fatal_count
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.caused_by
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_carries_context() {
        let err = Error::operation(StatusCode::KEY_NOT_FOUND).with_key("a");
        let rendered = err.to_string();
        assert!(rendered.contains("engine operation failed"), "{rendered}");
        assert!(rendered.contains("key not found"), "{rendered}");
        assert!(rendered.contains("\"a\""), "{rendered}");
    }

    #[test]
    fn cause_chain_is_reachable_through_source() {
        let inner = Error::encoding("bad payload");
        let outer = Error::operation(StatusCode::CLIENT_DECODE_FAILURE).with_cause(inner);
        let source = outer.source().expect("chained cause");
        assert!(source.to_string().contains("bad payload"));
        assert_eq!(outer.cause().unwrap().kind(), ErrorKind::Encoding);
    }

    #[test]
    fn empty_key_is_an_argument_error() {
        let err = Error::empty_key();
        assert_eq!(err.kind(), ErrorKind::Arguments);
        assert!(err.to_string().contains("empty key"));
    }
}
