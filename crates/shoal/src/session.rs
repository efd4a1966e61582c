// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! The session: the caller-facing handle that drives the engine.
//!
//! Every operation follows the same pipeline: encode keys and values, hand
//! commands to the engine (Submitting), pump the blocking wait while the
//! callback adapter fills the aggregator (Waiting), then run the batch gate
//! and return (Draining). The host execution lock, when installed, is
//! released only across the blocking wait; callback bodies always run with
//! it held.

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::config::{LockMode, SessionConfig};
use crate::engine::{
    Cas, Command, Completion, CompletionSink, Engine, HttpEvent, HttpMethod, StoreMode,
};
use crate::error::{Error, Result};
use crate::http::HttpResult;
use crate::lock::{ExecBracket, ExecutionLock};
use crate::multi::MultiResult;
use crate::result::{DecodeMode, KvResult, OperationResult, ValueResult};
use crate::status::StatusCode;
use crate::transcode::{EncodedValue, Transcoder};
use crate::value::Value;

/// Per-operation options. Unset fields inherit the session defaults.
#[derive(Clone, Debug, Default)]
pub struct OperationOptions {
    /// Format flags override for stored values.
    pub format: Option<u32>,
    /// Expiry in seconds; zero means no expiry change.
    pub ttl: u32,
    /// Override the session quiet flag for this call.
    pub quiet: Option<bool>,
    /// CAS precondition for mutations; zero means unconditional.
    pub cas: Cas,
    /// Durability targets, forwarded to the engine uninterpreted.
    pub persist_to: u8,
    pub replicate_to: u8,
}

/// Instrumentation counters, cheap to copy out at any time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ops_scheduled: u64,
    pub completions_delivered: u64,
    pub lock_releases: u64,
    pub lock_reacquires: u64,
    pub batches_run: u64,
    pub batches_raised: u64,
}

/// A connection to one bucket of the cluster.
pub struct Session {
    engine: Mutex<Box<dyn Engine>>,
    transcoder: Transcoder,
    exec_lock: Option<Arc<dyn ExecutionLock>>,
    bucket: String,
    default_format: u32,
    quiet: bool,
    lockmode: LockMode,
    release_exec_lock: bool,
    data_passthrough: bool,
    features: u32,
    /// Operations submitted but not yet completed in the current wait cycle.
    remaining: AtomicIsize,
    busy: Mutex<bool>,
    idle_cv: Condvar,
    stats: Mutex<SessionStats>,
}

impl Session {
    /// Binds a session to an engine instance. The configuration is consumed;
    /// a session cannot be re-initialized.
    pub fn connect(engine: Box<dyn Engine>, config: SessionConfig) -> Result<Session> {
        if !config.format_is_valid() {
            return Err(Error::arguments(format!(
                "default format flags 0x{:x} do not name a built-in codec",
                config.default_format
            )));
        }
        Ok(Session {
            engine: Mutex::new(engine),
            transcoder: Transcoder::BuiltIn,
            exec_lock: None,
            bucket: config.bucket,
            default_format: config.default_format,
            quiet: config.quiet,
            lockmode: config.lockmode,
            release_exec_lock: config.release_exec_lock,
            data_passthrough: config.data_passthrough,
            features: config.features,
            remaining: AtomicIsize::new(0),
            busy: Mutex::new(false),
            idle_cv: Condvar::new(),
            stats: Mutex::new(SessionStats::default()),
        })
    }

    /// Installs a custom transcoder. Requires exclusive access, so it cannot
    /// race a blocking wait.
    pub fn set_transcoder(&mut self, transcoder: Transcoder) {
        self.transcoder = transcoder;
    }

    /// Installs the host execution lock to release across blocking waits.
    pub fn set_execution_lock(&mut self, lock: Arc<dyn ExecutionLock>) {
        self.exec_lock = Some(lock);
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn default_format(&self) -> u32 {
        self.default_format
    }

    pub fn features(&self) -> u32 {
        self.features
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Operations submitted but not yet completed. Zero whenever the session
    /// is idle.
    pub fn in_flight(&self) -> isize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.lock().expect("session stats poisoned").clone()
    }

    // ------------------------------------------------------------------
    // Get family
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str, options: &OperationOptions) -> Result<ValueResult> {
        single(self.get_multi([key], options)?)
    }

    /// Fetches and updates expiry in one round trip.
    pub fn get_and_touch(&self, key: &str, ttl: u32) -> Result<ValueResult> {
        let options = OperationOptions {
            ttl,
            ..OperationOptions::default()
        };
        self.get(key, &options)
    }

    pub fn get_multi<I, K>(&self, keys: I, options: &OperationOptions) -> Result<MultiResult<ValueResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let quiet = options.quiet.unwrap_or(self.quiet);
        let specs = self.key_specs(keys, |_| SpecKind::Get {
            ttl: options.ttl,
            lock: false,
        })?;
        self.run_value_batch(specs, quiet, quiet, self.value_decode_mode())
    }

    /// Fetches the value and acquires the pessimistic lock for `ttl` seconds.
    pub fn lock(&self, key: &str, ttl: u32) -> Result<ValueResult> {
        single(self.lock_multi([key], ttl)?)
    }

    pub fn lock_multi<I, K>(&self, keys: I, ttl: u32) -> Result<MultiResult<ValueResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let specs = self.key_specs(keys, |_| SpecKind::Get { ttl, lock: true })?;
        self.run_value_batch(specs, false, self.quiet, self.value_decode_mode())
    }

    // ------------------------------------------------------------------
    // Touch / unlock / delete
    // ------------------------------------------------------------------

    pub fn touch(&self, key: &str, options: &OperationOptions) -> Result<OperationResult> {
        single(self.touch_multi([key], options)?)
    }

    pub fn touch_multi<I, K>(
        &self,
        keys: I,
        options: &OperationOptions,
    ) -> Result<MultiResult<OperationResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let specs = self.key_specs(keys, |_| SpecKind::Touch { ttl: options.ttl })?;
        self.run_op_batch(specs, false, options.quiet.unwrap_or(self.quiet))
    }

    /// Releases a pessimistic lock; the CAS must be the one returned by the
    /// lock operation.
    pub fn unlock(&self, key: &str, cas: Cas) -> Result<OperationResult> {
        single(self.unlock_multi([(key, cas)])?)
    }

    pub fn unlock_multi<I, K>(&self, pairs: I) -> Result<MultiResult<OperationResult>>
    where
        I: IntoIterator<Item = (K, Cas)>,
        K: AsRef<str>,
    {
        let mut specs = Vec::new();
        for (key, cas) in pairs {
            if cas == 0 {
                return Err(Error::arguments("unlock requires the CAS returned by lock")
                    .with_key(key.as_ref()));
            }
            specs.push(self.key_spec(key.as_ref(), SpecKind::Unlock { cas })?);
        }
        self.run_op_batch(specs, false, self.quiet)
    }

    pub fn delete(&self, key: &str, options: &OperationOptions) -> Result<OperationResult> {
        single(self.delete_multi([key], options)?)
    }

    pub fn delete_multi<I, K>(
        &self,
        keys: I,
        options: &OperationOptions,
    ) -> Result<MultiResult<OperationResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let quiet = options.quiet.unwrap_or(self.quiet);
        let specs = self.key_specs(keys, |_| SpecKind::Remove { cas: options.cas })?;
        self.run_op_batch(specs, quiet, quiet)
    }

    // ------------------------------------------------------------------
    // Store family
    // ------------------------------------------------------------------

    pub fn store<V>(
        &self,
        mode: StoreMode,
        key: &str,
        value: V,
        options: &OperationOptions,
    ) -> Result<OperationResult>
    where
        V: Into<Value>,
    {
        single(self.store_multi(mode, [(key, value.into())], options)?)
    }

    pub fn set<V: Into<Value>>(
        &self,
        key: &str,
        value: V,
        options: &OperationOptions,
    ) -> Result<OperationResult> {
        self.store(StoreMode::Set, key, value, options)
    }

    pub fn add<V: Into<Value>>(
        &self,
        key: &str,
        value: V,
        options: &OperationOptions,
    ) -> Result<OperationResult> {
        self.store(StoreMode::Add, key, value, options)
    }

    pub fn replace<V: Into<Value>>(
        &self,
        key: &str,
        value: V,
        options: &OperationOptions,
    ) -> Result<OperationResult> {
        self.store(StoreMode::Replace, key, value, options)
    }

    pub fn append<V: Into<Value>>(
        &self,
        key: &str,
        value: V,
        options: &OperationOptions,
    ) -> Result<OperationResult> {
        self.store(StoreMode::Append, key, value, options)
    }

    pub fn prepend<V: Into<Value>>(
        &self,
        key: &str,
        value: V,
        options: &OperationOptions,
    ) -> Result<OperationResult> {
        self.store(StoreMode::Prepend, key, value, options)
    }

    /// Stores a batch of values. A value that fails to encode poisons only
    /// its own entry; the rest of the batch proceeds.
    pub fn store_multi<I, K>(
        &self,
        mode: StoreMode,
        pairs: I,
        options: &OperationOptions,
    ) -> Result<MultiResult<OperationResult>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let flags = options.format.unwrap_or(self.default_format);
        let quiet = options.quiet.unwrap_or(self.quiet);
        let mut multi = MultiResult::new(false);
        let mut specs = Vec::new();
        let mut any_input = false;
        for (key, value) in pairs {
            any_input = true;
            let key = key.as_ref();
            let kbytes = self.transcoder.encode_key(key)?;
            match self.transcoder.encode_value(&value, flags) {
                Ok(payload) => specs.push(KvSpec {
                    key: key.to_string(),
                    kbytes,
                    payload: Some(payload),
                    kind: SpecKind::Store {
                        mode,
                        ttl: options.ttl,
                        cas: options.cas,
                        persist_to: options.persist_to,
                        replicate_to: options.replicate_to,
                    },
                }),
                Err(err) => multi.record_fatal(err.with_key(key)),
            }
        }
        if !any_input {
            return Err(Error::arguments("no key/value pairs provided"));
        }
        self.run_batch(specs, multi, quiet, BatchKind::Ops)
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    /// Adjusts a counter by `delta`; `initial` creates it when absent.
    pub fn arithmetic(
        &self,
        key: &str,
        delta: i64,
        initial: Option<u64>,
        options: &OperationOptions,
    ) -> Result<ValueResult> {
        single(self.arithmetic_multi([key], delta, initial, options)?)
    }

    pub fn incr(&self, key: &str, amount: u64, initial: Option<u64>) -> Result<ValueResult> {
        self.arithmetic(key, amount as i64, initial, &OperationOptions::default())
    }

    pub fn decr(&self, key: &str, amount: u64, initial: Option<u64>) -> Result<ValueResult> {
        self.arithmetic(key, -(amount as i64), initial, &OperationOptions::default())
    }

    pub fn arithmetic_multi<I, K>(
        &self,
        keys: I,
        delta: i64,
        initial: Option<u64>,
        options: &OperationOptions,
    ) -> Result<MultiResult<ValueResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let specs = self.key_specs(keys, |_| SpecKind::Arithmetic {
            delta,
            initial,
            ttl: options.ttl,
        })?;
        self.run_value_batch(
            specs,
            false,
            options.quiet.unwrap_or(self.quiet),
            DecodeMode::Counter,
        )
    }

    // ------------------------------------------------------------------
    // HTTP row requests
    // ------------------------------------------------------------------

    /// Issues one HTTP request through the engine. In chunked mode the body
    /// streams through the row parser and the parsed rows accumulate on the
    /// result.
    pub fn http_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: &[u8],
        chunked: bool,
        options: &OperationOptions,
    ) -> Result<HttpResult> {
        if path.is_empty() {
            return Err(Error::arguments("empty http path"));
        }
        let quiet = options.quiet.unwrap_or(self.quiet);
        let _gate = self.enter()?;
        let mut result = HttpResult::new(path, chunked, quiet);

        let mut engine = self.engine.lock().expect("engine mutex poisoned");
        let status = engine.schedule(Command::Http {
            handle: result.handle(),
            method,
            path,
            body,
            chunked,
        });
        if status.is_failure() {
            return Err(Error::scheduling(status).with_key(path));
        }
        self.remaining.fetch_add(1, Ordering::SeqCst);
        {
            let mut stats = self.stats.lock().expect("session stats poisoned");
            stats.ops_scheduled += 1;
        }

        let adapter = CallbackAdapter {
            target: BatchTarget::Http(&mut result),
            transcoder: &self.transcoder,
            remaining: &self.remaining,
            bracket: self.bracket(),
            completions: 0,
        };
        self.pump(&mut **engine, adapter)?;
        drop(engine);

        result.check()
    }

    /// Runs a design-document row query and returns the parsed rows.
    pub fn view_rows(
        &self,
        design: &str,
        view: &str,
        query: &str,
        options: &OperationOptions,
    ) -> Result<Vec<serde_json::Value>> {
        if design.is_empty() || view.is_empty() {
            return Err(Error::arguments("design and view names must be non-empty"));
        }
        let mut path = format!("_design/{design}/_view/{view}");
        if !query.is_empty() {
            path.push('?');
            path.push_str(query);
        }
        let mut result = self.http_request(HttpMethod::Get, &path, &[], true, options)?;
        Ok(result.take_rows())
    }

    // ------------------------------------------------------------------
    // Pipeline internals
    // ------------------------------------------------------------------

    fn value_decode_mode(&self) -> DecodeMode {
        if self.data_passthrough {
            DecodeMode::Passthrough
        } else {
            DecodeMode::Transcode
        }
    }

    fn key_spec(&self, key: &str, kind: SpecKind) -> Result<KvSpec> {
        Ok(KvSpec {
            key: key.to_string(),
            kbytes: self.transcoder.encode_key(key)?,
            payload: None,
            kind,
        })
    }

    fn key_specs<I, K, F>(&self, keys: I, kind: F) -> Result<Vec<KvSpec>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        F: Fn(&str) -> SpecKind,
    {
        let mut specs = Vec::new();
        for key in keys {
            let key = key.as_ref();
            specs.push(self.key_spec(key, kind(key))?);
        }
        if specs.is_empty() {
            return Err(Error::arguments("no keys provided"));
        }
        Ok(specs)
    }

    fn run_value_batch(
        &self,
        specs: Vec<KvSpec>,
        suppress_missing: bool,
        quiet: bool,
        mode: DecodeMode,
    ) -> Result<MultiResult<ValueResult>> {
        let multi = MultiResult::new(suppress_missing);
        self.run_batch(specs, multi, quiet, BatchKind::Values(mode))
    }

    fn run_op_batch(
        &self,
        specs: Vec<KvSpec>,
        suppress_missing: bool,
        quiet: bool,
    ) -> Result<MultiResult<OperationResult>> {
        let multi = MultiResult::new(suppress_missing);
        self.run_batch(specs, multi, quiet, BatchKind::Ops)
    }

    /// Shared Submitting → Waiting → Draining pipeline for key-value
    /// batches.
    fn run_batch<R>(
        &self,
        specs: Vec<KvSpec>,
        mut multi: MultiResult<R>,
        quiet: bool,
        kind: BatchKind,
    ) -> Result<MultiResult<R>>
    where
        R: KvResult + BatchEntry,
    {
        let _gate = self.enter()?;

        if !specs.is_empty() {
            let mut engine = self.engine.lock().expect("engine mutex poisoned");
            let mut accepted: isize = 0;
            for spec in &specs {
                let status = engine.schedule(spec.command());
                if status.is_failure() {
                    // The engine discards the batch on rejection; nothing
                    // accepted so far will call back.
                    self.remaining.fetch_sub(accepted, Ordering::SeqCst);
                    return Err(Error::scheduling(status).with_key(spec.key.clone()));
                }
                self.remaining.fetch_add(1, Ordering::SeqCst);
                accepted += 1;
            }
            {
                let mut stats = self.stats.lock().expect("session stats poisoned");
                stats.ops_scheduled += accepted as u64;
            }

            let adapter = CallbackAdapter {
                target: R::target(&mut multi, kind),
                transcoder: &self.transcoder,
                remaining: &self.remaining,
                bracket: self.bracket(),
                completions: 0,
            };
            self.pump(&mut **engine, adapter)?;
        }

        self.finish_batch(multi, quiet)
    }

    fn bracket(&self) -> ExecBracket<'_> {
        let lock = if self.release_exec_lock {
            self.exec_lock.as_deref()
        } else {
            None
        };
        ExecBracket::new(lock)
    }

    /// Waiting: release the execution lock, pump the engine, reacquire.
    /// Reacquisition always happens before any stored result is inspected.
    fn pump(&self, engine: &mut dyn Engine, mut adapter: CallbackAdapter<'_>) -> Result<()> {
        adapter.bracket.release();
        let wait_status = engine.wait(&mut adapter);
        adapter.bracket.reacquire();

        let (releases, reacquires) = adapter.bracket.counts();
        let completions = adapter.completions;
        {
            let mut stats = self.stats.lock().expect("session stats poisoned");
            stats.completions_delivered += completions;
            stats.lock_releases += releases;
            stats.lock_reacquires += reacquires;
            stats.batches_run += 1;
        }

        if wait_status.is_failure() {
            // Cancellation path: whatever was still in flight is abandoned.
            self.remaining.store(0, Ordering::SeqCst);
            return Err(Error::wait_failure(wait_status));
        }
        let left = self.remaining.load(Ordering::SeqCst);
        if left != 0 {
            self.remaining.store(0, Ordering::SeqCst);
            return Err(Error::internal(format!(
                "blocking wait returned with {left} operations still in flight"
            )));
        }
        Ok(())
    }

    fn finish_batch<R: KvResult>(
        &self,
        multi: MultiResult<R>,
        quiet: bool,
    ) -> Result<MultiResult<R>> {
        if quiet {
            return Ok(multi);
        }
        match multi.maybe_raise() {
            Ok(multi) => Ok(multi),
            Err(err) => {
                let mut stats = self.stats.lock().expect("session stats poisoned");
                stats.batches_raised += 1;
                Err(err)
            }
        }
    }

    /// Lock-mode coordination for entry into Submitting.
    fn enter(&self) -> Result<Gate<'_>> {
        match self.lockmode {
            LockMode::None => Ok(Gate {
                session: self,
                engaged: false,
            }),
            LockMode::Exclusive => {
                let mut busy = self.busy.lock().expect("session gate poisoned");
                if *busy {
                    return Err(Error::threading(
                        "session is mid-operation and its lock mode is exclusive",
                    ));
                }
                *busy = true;
                Ok(Gate {
                    session: self,
                    engaged: true,
                })
            }
            LockMode::Wait => {
                let mut busy = self.busy.lock().expect("session gate poisoned");
                while *busy {
                    busy = self.idle_cv.wait(busy).expect("session gate poisoned");
                }
                *busy = true;
                Ok(Gate {
                    session: self,
                    engaged: true,
                })
            }
        }
    }
}

/// Extracts the sole result of a single-key call.
fn single<R: KvResult>(mut multi: MultiResult<R>) -> Result<R> {
    let key = multi.iter().next().map(|(key, _)| key.clone());
    match key {
        Some(key) => Ok(multi.take(&key).expect("key taken from the same map")),
        // A quiet batch whose only entry was lost to a key-decode failure
        // still carries the error; surface it instead of inventing one.
        None => match multi.take_first_fatal() {
            Some(err) => Err(err),
            None => Err(Error::internal("no result delivered for single-key operation")),
        },
    }
}

struct Gate<'a> {
    session: &'a Session,
    engaged: bool,
}

impl Drop for Gate<'_> {
    fn drop(&mut self) {
        if self.engaged {
            let mut busy = self
                .session
                .busy
                .lock()
                .expect("session gate poisoned");
            *busy = false;
            self.session.idle_cv.notify_one();
        }
    }
}

struct KvSpec {
    key: String,
    kbytes: Vec<u8>,
    payload: Option<EncodedValue>,
    kind: SpecKind,
}

enum SpecKind {
    Get { ttl: u32, lock: bool },
    Touch { ttl: u32 },
    Store {
        mode: StoreMode,
        ttl: u32,
        cas: Cas,
        persist_to: u8,
        replicate_to: u8,
    },
    Arithmetic {
        delta: i64,
        initial: Option<u64>,
        ttl: u32,
    },
    Remove { cas: Cas },
    Unlock { cas: Cas },
}

impl KvSpec {
    fn command(&self) -> Command<'_> {
        match &self.kind {
            SpecKind::Get { ttl, lock } => Command::Get {
                key: &self.kbytes,
                ttl: *ttl,
                lock: *lock,
            },
            SpecKind::Touch { ttl } => Command::Touch {
                key: &self.kbytes,
                ttl: *ttl,
            },
            SpecKind::Store {
                mode,
                ttl,
                cas,
                persist_to,
                replicate_to,
            } => {
                let payload = self
                    .payload
                    .as_ref()
                    .expect("store spec always carries a payload");
                Command::Store {
                    mode: *mode,
                    key: &self.kbytes,
                    value: &payload.bytes,
                    flags: payload.flags,
                    ttl: *ttl,
                    cas: *cas,
                    persist_to: *persist_to,
                    replicate_to: *replicate_to,
                }
            }
            SpecKind::Arithmetic {
                delta,
                initial,
                ttl,
            } => Command::Arithmetic {
                key: &self.kbytes,
                delta: *delta,
                initial: *initial,
                ttl: *ttl,
            },
            SpecKind::Remove { cas } => Command::Remove {
                key: &self.kbytes,
                cas: *cas,
            },
            SpecKind::Unlock { cas } => Command::Unlock {
                key: &self.kbytes,
                cas: *cas,
            },
        }
    }
}

#[derive(Clone, Copy)]
enum BatchKind {
    Values(DecodeMode),
    Ops,
}

enum BatchTarget<'a> {
    Values {
        multi: &'a mut MultiResult<ValueResult>,
        mode: DecodeMode,
    },
    Ops(&'a mut MultiResult<OperationResult>),
    Http(&'a mut HttpResult),
}

/// Binds a result type to the adapter target that collects it.
trait BatchEntry: Sized {
    fn target(multi: &mut MultiResult<Self>, kind: BatchKind) -> BatchTarget<'_>;
}

impl BatchEntry for ValueResult {
    fn target(multi: &mut MultiResult<Self>, kind: BatchKind) -> BatchTarget<'_> {
        let mode = match kind {
            BatchKind::Values(mode) => mode,
            BatchKind::Ops => DecodeMode::Transcode,
        };
        BatchTarget::Values { multi, mode }
    }
}

impl BatchEntry for OperationResult {
    fn target(multi: &mut MultiResult<Self>, _kind: BatchKind) -> BatchTarget<'_> {
        BatchTarget::Ops(multi)
    }
}

/// The callback adapter: the only writer of the in-flight counter and the
/// live aggregator while the session is Waiting. Each callback body runs
/// with the execution lock reacquired.
struct CallbackAdapter<'a> {
    target: BatchTarget<'a>,
    transcoder: &'a Transcoder,
    remaining: &'a AtomicIsize,
    bracket: ExecBracket<'a>,
    completions: u64,
}

impl CallbackAdapter<'_> {
    fn settle(&mut self) {
        self.completions += 1;
        let previous = self.remaining.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "in-flight operation counter went negative");
    }
}

impl CompletionSink for CallbackAdapter<'_> {
    fn operation_complete(&mut self, completion: Completion) {
        self.bracket.reacquire();
        self.settle();
        match &mut self.target {
            BatchTarget::Values { multi, mode } => {
                match self.transcoder.decode_key(&completion.key) {
                    Ok(key) => {
                        let (result, fatal) =
                            ValueResult::from_completion(key, &completion, self.transcoder, *mode);
                        if let Some(err) = fatal {
                            multi.record_fatal(err);
                        }
                        multi.insert(result);
                    }
                    Err(err) => multi.record_fatal(err),
                }
            }
            BatchTarget::Ops(multi) => match self.transcoder.decode_key(&completion.key) {
                Ok(key) => multi.insert(OperationResult::from_completion(key, &completion)),
                Err(err) => multi.record_fatal(err),
            },
            BatchTarget::Http(_) => {
                // An HTTP wait cycle has no key-value completions; settle
                // already balanced the counter, nothing to record.
            }
        }
        self.bracket.release();
    }

    fn http_event(&mut self, event: HttpEvent) {
        self.bracket.reacquire();
        if let BatchTarget::Http(result) = &mut self.target {
            match event {
                HttpEvent::Status {
                    http_status,
                    headers,
                } => {
                    result.http_status = http_status;
                    result.headers = headers;
                }
                HttpEvent::Data { chunk } => {
                    if result.status.is_failure() {
                        // Row parsing already failed; drop the rest.
                    } else if result.is_chunked() {
                        match result.feed_rows(&chunk) {
                            Ok(rows) => result.push_rows(rows),
                            Err(_) => {
                                result.status = StatusCode::CLIENT_DECODE_FAILURE;
                                let _ = result.finish();
                            }
                        }
                    } else {
                        result.body.extend_from_slice(&chunk);
                    }
                }
                HttpEvent::Done {
                    status,
                    http_status,
                } => {
                    self.completions += 1;
                    let previous = self.remaining.fetch_sub(1, Ordering::SeqCst);
                    assert!(previous > 0, "in-flight operation counter went negative");
                    if result.status.is_ok() {
                        result.status = status;
                    }
                    if http_status != 0 {
                        result.http_status = http_status;
                    }
                    match result.finish() {
                        Ok(rows) => result.push_rows(rows),
                        Err(_) => {
                            if result.status.is_ok() {
                                result.status = StatusCode::CLIENT_DECODE_FAILURE;
                            }
                        }
                    }
                }
            }
        }
        self.bracket.release();
    }
}
