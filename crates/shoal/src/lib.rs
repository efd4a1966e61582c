// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Rust client runtime for the Shoal key-value cluster.
//!
//! Presents synchronous single-key and batch operations on top of the
//! asynchronous native engine: values travel through a pluggable transcoder,
//! results aggregate per batch with a single raise gate, and an optional
//! host execution lock is released across blocking waits.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod lock;
pub mod multi;
pub mod result;
pub mod rows;
pub mod session;
pub mod status;
pub mod testing;
pub mod transcode;
pub mod value;

#[cfg(test)]
mod test_util;

pub use crate::config::{LockMode, SessionConfig};
pub use crate::engine::{Cas, Command, Completion, CompletionSink, Engine, HttpEvent, HttpHandle, HttpMethod, StoreMode};
pub use crate::error::{BatchReport, Error, ErrorKind, Result, ResultSnapshot};
pub use crate::http::HttpResult;
pub use crate::lock::{ExecutionLock, LockToken};
pub use crate::multi::MultiResult;
pub use crate::result::{KvResult, OperationResult, ValueResult};
pub use crate::rows::RowStream;
pub use crate::session::{OperationOptions, Session, SessionStats};
pub use crate::status::StatusCode;
pub use crate::transcode::{
    decode_packed, encode_packed, CustomCodec, EncodedValue, Transcoder, FMT_BYTES, FMT_JSON,
    FMT_MASK, FMT_PACKED, FMT_UTF8,
};
pub use crate::value::{from_value, to_value, Value};
