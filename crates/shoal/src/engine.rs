// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Interface to the native engine.
//!
//! The engine owns the wire protocol and cluster topology; this crate only
//! submits commands and pumps the blocking wait. Implementations are
//! single-threaded event reactors: `wait` drives I/O and delivers every
//! completion through the [`CompletionSink`] before returning.

use uuid::Uuid;

use crate::status::StatusCode;

/// Compare-and-swap token stamped by the store on every mutation.
pub type Cas = u64;

/// Mutation mode for store commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    /// Unconditional upsert (honors a non-zero CAS).
    Set,
    /// Create only; fails with `KEY_EXISTS` when the key is present.
    Add,
    /// Update only; fails with `KEY_NOT_FOUND` when the key is absent.
    Replace,
    /// Concatenate after the existing value; fails with `NOT_STORED` when absent.
    Append,
    /// Concatenate before the existing value; fails with `NOT_STORED` when absent.
    Prepend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// Opaque identity of one HTTP request inside the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpHandle(Uuid);

impl HttpHandle {
    pub fn new() -> Self {
        HttpHandle(Uuid::new_v4())
    }
}

impl Default for HttpHandle {
    fn default() -> Self {
        HttpHandle::new()
    }
}

/// One command handed to the engine for scheduling.
///
/// Key and value buffers are borrowed: the engine must copy what it needs
/// before `schedule` returns, because the session drops the encoded buffers
/// immediately afterwards.
#[derive(Debug)]
pub enum Command<'a> {
    /// Fetch a value; `ttl` non-zero also touches, `lock` acquires the
    /// pessimistic lock for `ttl` seconds.
    Get {
        key: &'a [u8],
        ttl: u32,
        lock: bool,
    },
    /// Update expiry without touching the value.
    Touch { key: &'a [u8], ttl: u32 },
    Store {
        mode: StoreMode,
        key: &'a [u8],
        value: &'a [u8],
        flags: u32,
        ttl: u32,
        cas: Cas,
        /// Durability targets, forwarded verbatim; the client never
        /// interprets them.
        persist_to: u8,
        replicate_to: u8,
    },
    /// Counter adjustment; `initial` creates the counter when absent.
    Arithmetic {
        key: &'a [u8],
        delta: i64,
        initial: Option<u64>,
        ttl: u32,
    },
    Remove { key: &'a [u8], cas: Cas },
    Unlock { key: &'a [u8], cas: Cas },
    Http {
        handle: &'a HttpHandle,
        method: HttpMethod,
        path: &'a str,
        body: &'a [u8],
        chunked: bool,
    },
}

/// Callback payload for one completed key-value operation.
#[derive(Clone, Debug)]
pub struct Completion {
    pub status: StatusCode,
    pub key: Vec<u8>,
    pub cas: Cas,
    /// Value buffer for value-bearing operations. Arithmetic results arrive
    /// as the new counter rendered in ASCII decimal with zero flags.
    pub value: Option<Vec<u8>>,
    pub flags: u32,
}

/// Callback payload for the HTTP request of the current wait cycle.
#[derive(Clone, Debug)]
pub enum HttpEvent {
    Status {
        http_status: u16,
        headers: Vec<(String, String)>,
    },
    Data { chunk: Vec<u8> },
    Done {
        status: StatusCode,
        http_status: u16,
    },
}

/// Receiver for engine callbacks during one wait cycle.
///
/// The engine invokes these synchronously from inside `wait`, on the waiting
/// thread. At most one HTTP request is in flight per wait cycle, so
/// `http_event` carries no handle.
pub trait CompletionSink {
    fn operation_complete(&mut self, completion: Completion);
    fn http_event(&mut self, event: HttpEvent);
}

/// The native engine.
///
/// Scheduling contract: a command rejected by `schedule` was never accepted,
/// and the rejection discards every command accepted earlier in the same
/// batch (none of them will call back). Wait contract: `wait` returns
/// `SUCCESS` only once every accepted command has been delivered to the
/// sink; a failure return abandons whatever was still in flight. Individual
/// operation timeouts are the engine's job and arrive as ordinary
/// completions with a `TIMEOUT` status.
pub trait Engine: Send {
    fn schedule(&mut self, command: Command<'_>) -> StatusCode;
    fn wait(&mut self, sink: &mut dyn CompletionSink) -> StatusCode;
}
