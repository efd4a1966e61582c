// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! In-memory engine and instrumented execution lock for tests and demos.
//!
//! [`MemoryEngine`] implements the full [`Engine`] contract against a
//! `BTreeMap` store: commands execute at schedule time, completions queue on
//! a channel, and `wait` delivers them to the sink. Failure injection,
//! reversed delivery order, staged HTTP responses, and a wait hold cover the
//! paths a real cluster would exercise. Expiry is not simulated; TTLs are
//! accepted and ignored.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::engine::{Cas, Command, Completion, CompletionSink, Engine, HttpEvent, StoreMode};
use crate::lock::{ExecutionLock, LockToken};
use crate::status::StatusCode;

#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    flags: u32,
    cas: Cas,
    locked: bool,
}

#[derive(Clone, Debug)]
struct StagedHttp {
    http_status: u16,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<Vec<u8>, Entry>,
    next_cas: Cas,
    op_failures: BTreeMap<Vec<u8>, StatusCode>,
    sched_failures: BTreeMap<Vec<u8>, StatusCode>,
    wait_failure: Option<StatusCode>,
    reverse_delivery: bool,
    http_responses: BTreeMap<String, StagedHttp>,
}

impl MemoryState {
    fn allocate_cas(&mut self) -> Cas {
        if self.next_cas == 0 {
            self.next_cas = 1;
        }
        let cas = self.next_cas;
        self.next_cas += 1;
        cas
    }
}

#[derive(Debug)]
enum Event {
    Op(Completion),
    Http(HttpEvent),
}

/// In-memory engine. Clones share state, so tests can keep a handle after
/// boxing one copy into a session.
#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<Mutex<MemoryState>>,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    hold: Arc<(Mutex<bool>, Condvar)>,
    parked: Arc<AtomicUsize>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        MemoryEngine::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        MemoryEngine {
            state: Arc::new(Mutex::new(MemoryState::default())),
            tx,
            rx,
            hold: Arc::new((Mutex::new(false), Condvar::new())),
            parked: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory engine mutex poisoned")
    }

    /// Inserts an entry directly, bypassing the client pipeline.
    pub fn seed(&self, key: &str, value: &[u8], flags: u32) {
        let mut state = self.lock_state();
        let cas = state.allocate_cas();
        state.entries.insert(
            key.as_bytes().to_vec(),
            Entry {
                value: value.to_vec(),
                flags,
                cas,
                locked: false,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_state().entries.contains_key(key.as_bytes())
    }

    /// Raw stored bytes and flags for a key.
    pub fn raw(&self, key: &str) -> Option<(Vec<u8>, u32)> {
        self.lock_state()
            .entries
            .get(key.as_bytes())
            .map(|e| (e.value.clone(), e.flags))
    }

    /// The next operation on `key` completes with `status` instead of
    /// executing.
    pub fn fail_next(&self, key: &str, status: StatusCode) {
        self.lock_state()
            .op_failures
            .insert(key.as_bytes().to_vec(), status);
    }

    /// The next command on `key` is rejected at schedule time.
    pub fn fail_schedule(&self, key: &str, status: StatusCode) {
        self.lock_state()
            .sched_failures
            .insert(key.as_bytes().to_vec(), status);
    }

    /// The next wait fails with `status`, abandoning queued completions.
    pub fn fail_wait(&self, status: StatusCode) {
        self.lock_state().wait_failure = Some(status);
    }

    /// Deliver key-value completions in reverse submission order.
    pub fn reverse_delivery(&self, on: bool) {
        self.lock_state().reverse_delivery = on;
    }

    /// Stages the response for an HTTP request to `path` (matched without
    /// the query string).
    pub fn stage_http(&self, path: &str, http_status: u16, chunks: Vec<Vec<u8>>) {
        self.lock_state().http_responses.insert(
            path.to_string(),
            StagedHttp {
                http_status,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                chunks,
            },
        );
    }

    /// Threads currently parked inside `wait` behind a hold.
    pub fn parked_waiters(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    /// Blocks every `wait` call until the returned hold is dropped.
    pub fn hold_waits(&self) -> WaitHold {
        let (flag, _) = &*self.hold;
        *flag.lock().expect("wait hold poisoned") = true;
        WaitHold {
            hold: self.hold.clone(),
        }
    }

    fn execute(&self, command: &Command<'_>) -> Vec<Event> {
        let mut state = self.lock_state();
        match command {
            Command::Get { key, ttl: _, lock } => {
                if let Some(status) = state.op_failures.remove(*key) {
                    return vec![failed(key, status)];
                }
                match state.entries.get_mut(*key) {
                    None => vec![failed(key, StatusCode::KEY_NOT_FOUND)],
                    Some(entry) => {
                        if *lock {
                            if entry.locked {
                                return vec![failed(key, StatusCode::LOCKED)];
                            }
                            entry.locked = true;
                        }
                        vec![Event::Op(Completion {
                            status: StatusCode::SUCCESS,
                            key: key.to_vec(),
                            cas: entry.cas,
                            value: Some(entry.value.clone()),
                            flags: entry.flags,
                        })]
                    }
                }
            }
            Command::Touch { key, ttl: _ } => {
                if let Some(status) = state.op_failures.remove(*key) {
                    return vec![failed(key, status)];
                }
                match state.entries.get(*key) {
                    None => vec![failed(key, StatusCode::KEY_NOT_FOUND)],
                    Some(entry) => vec![Event::Op(Completion {
                        status: StatusCode::SUCCESS,
                        key: key.to_vec(),
                        cas: entry.cas,
                        value: None,
                        flags: 0,
                    })],
                }
            }
            Command::Store {
                mode,
                key,
                value,
                flags,
                ttl: _,
                cas,
                persist_to: _,
                replicate_to: _,
            } => {
                if let Some(status) = state.op_failures.remove(*key) {
                    return vec![failed(key, status)];
                }
                vec![store(&mut state, *mode, key, value, *flags, *cas)]
            }
            Command::Arithmetic {
                key,
                delta,
                initial,
                ttl: _,
            } => {
                if let Some(status) = state.op_failures.remove(*key) {
                    return vec![failed(key, status)];
                }
                vec![arithmetic(&mut state, key, *delta, *initial)]
            }
            Command::Remove { key, cas } => {
                if let Some(status) = state.op_failures.remove(*key) {
                    return vec![failed(key, status)];
                }
                vec![remove(&mut state, key, *cas)]
            }
            Command::Unlock { key, cas } => {
                if let Some(status) = state.op_failures.remove(*key) {
                    return vec![failed(key, status)];
                }
                vec![unlock(&mut state, key, *cas)]
            }
            Command::Http { path, .. } => {
                let bare = path.split('?').next().unwrap_or(path);
                match state.http_responses.get(bare).cloned() {
                    None => vec![
                        Event::Http(HttpEvent::Status {
                            http_status: 404,
                            headers: Vec::new(),
                        }),
                        Event::Http(HttpEvent::Done {
                            status: StatusCode::SUCCESS,
                            http_status: 404,
                        }),
                    ],
                    Some(staged) => {
                        let mut events = vec![Event::Http(HttpEvent::Status {
                            http_status: staged.http_status,
                            headers: staged.headers.clone(),
                        })];
                        for chunk in staged.chunks {
                            events.push(Event::Http(HttpEvent::Data { chunk }));
                        }
                        events.push(Event::Http(HttpEvent::Done {
                            status: StatusCode::SUCCESS,
                            http_status: staged.http_status,
                        }));
                        events
                    }
                }
            }
        }
    }
}

impl Engine for MemoryEngine {
    fn schedule(&mut self, command: Command<'_>) -> StatusCode {
        let key = command_key(&command);
        {
            let mut state = self.lock_state();
            if let Some(status) = state.sched_failures.remove(&key) {
                drop(state);
                // Rejection discards whatever this batch already queued.
                while self.rx.try_recv().is_ok() {}
                return status;
            }
        }
        for event in self.execute(&command) {
            self.tx.send(event).expect("completion queue disconnected");
        }
        StatusCode::SUCCESS
    }

    fn wait(&mut self, sink: &mut dyn CompletionSink) -> StatusCode {
        {
            let (flag, cv) = &*self.hold;
            let mut held = flag.lock().expect("wait hold poisoned");
            if *held {
                self.parked.fetch_add(1, Ordering::SeqCst);
                while *held {
                    held = cv.wait(held).expect("wait hold poisoned");
                }
                self.parked.fetch_sub(1, Ordering::SeqCst);
            }
        }

        if let Some(status) = self.lock_state().wait_failure.take() {
            while self.rx.try_recv().is_ok() {}
            return status;
        }

        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        let reverse = self.lock_state().reverse_delivery;
        if reverse && events.iter().all(|e| matches!(e, Event::Op(_))) {
            events.reverse();
        }
        for event in events {
            match event {
                Event::Op(completion) => sink.operation_complete(completion),
                Event::Http(http) => sink.http_event(http),
            }
        }
        StatusCode::SUCCESS
    }
}

/// Blocks the engine's `wait` until dropped.
pub struct WaitHold {
    hold: Arc<(Mutex<bool>, Condvar)>,
}

impl Drop for WaitHold {
    fn drop(&mut self) {
        let (flag, cv) = &*self.hold;
        *flag.lock().expect("wait hold poisoned") = false;
        cv.notify_all();
    }
}

fn command_key(command: &Command<'_>) -> Vec<u8> {
    match command {
        Command::Get { key, .. }
        | Command::Touch { key, .. }
        | Command::Store { key, .. }
        | Command::Arithmetic { key, .. }
        | Command::Remove { key, .. }
        | Command::Unlock { key, .. } => key.to_vec(),
        Command::Http { path, .. } => path.as_bytes().to_vec(),
    }
}

fn failed(key: &[u8], status: StatusCode) -> Event {
    Event::Op(Completion {
        status,
        key: key.to_vec(),
        cas: 0,
        value: None,
        flags: 0,
    })
}

fn succeeded(key: &[u8], cas: Cas) -> Event {
    Event::Op(Completion {
        status: StatusCode::SUCCESS,
        key: key.to_vec(),
        cas,
        value: None,
        flags: 0,
    })
}

fn store(
    state: &mut MemoryState,
    mode: StoreMode,
    key: &[u8],
    value: &[u8],
    flags: u32,
    cas: Cas,
) -> Event {
    let existing = state.entries.get(key).cloned();
    if let Some(entry) = &existing {
        if entry.locked && cas != entry.cas {
            return failed(key, StatusCode::LOCKED);
        }
    }
    match mode {
        StoreMode::Set => {
            match &existing {
                Some(entry) if cas != 0 && cas != entry.cas => {
                    return failed(key, StatusCode::KEY_EXISTS)
                }
                None if cas != 0 => return failed(key, StatusCode::KEY_NOT_FOUND),
                _ => {}
            }
            let new_cas = state.allocate_cas();
            state.entries.insert(
                key.to_vec(),
                Entry {
                    value: value.to_vec(),
                    flags,
                    cas: new_cas,
                    locked: false,
                },
            );
            succeeded(key, new_cas)
        }
        StoreMode::Add => {
            if existing.is_some() {
                return failed(key, StatusCode::KEY_EXISTS);
            }
            let new_cas = state.allocate_cas();
            state.entries.insert(
                key.to_vec(),
                Entry {
                    value: value.to_vec(),
                    flags,
                    cas: new_cas,
                    locked: false,
                },
            );
            succeeded(key, new_cas)
        }
        StoreMode::Replace => {
            let Some(entry) = existing else {
                return failed(key, StatusCode::KEY_NOT_FOUND);
            };
            if cas != 0 && cas != entry.cas {
                return failed(key, StatusCode::KEY_EXISTS);
            }
            let new_cas = state.allocate_cas();
            state.entries.insert(
                key.to_vec(),
                Entry {
                    value: value.to_vec(),
                    flags,
                    cas: new_cas,
                    locked: false,
                },
            );
            succeeded(key, new_cas)
        }
        StoreMode::Append | StoreMode::Prepend => {
            let Some(entry) = existing else {
                return failed(key, StatusCode::NOT_STORED);
            };
            if cas != 0 && cas != entry.cas {
                return failed(key, StatusCode::KEY_EXISTS);
            }
            let mut bytes = entry.value;
            if mode == StoreMode::Append {
                bytes.extend_from_slice(value);
            } else {
                let mut front = value.to_vec();
                front.extend_from_slice(&bytes);
                bytes = front;
            }
            let new_cas = state.allocate_cas();
            state.entries.insert(
                key.to_vec(),
                Entry {
                    value: bytes,
                    // Concatenation keeps the original format flags.
                    flags: entry.flags,
                    cas: new_cas,
                    locked: false,
                },
            );
            succeeded(key, new_cas)
        }
    }
}

fn arithmetic(state: &mut MemoryState, key: &[u8], delta: i64, initial: Option<u64>) -> Event {
    let current = match state.entries.get(key) {
        Some(entry) => match std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
        {
            Some(n) => Some(n),
            None => return failed(key, StatusCode::DELTA_BAD_VALUE),
        },
        None => None,
    };

    let new = match current {
        Some(n) => {
            if delta >= 0 {
                n.wrapping_add(delta as u64)
            } else {
                // Counters floor at zero on underflow.
                n.saturating_sub(delta.unsigned_abs())
            }
        }
        None => match initial {
            Some(n) => n,
            None => return failed(key, StatusCode::KEY_NOT_FOUND),
        },
    };

    let new_cas = state.allocate_cas();
    let rendered = new.to_string().into_bytes();
    state.entries.insert(
        key.to_vec(),
        Entry {
            value: rendered.clone(),
            flags: 0,
            cas: new_cas,
            locked: false,
        },
    );
    Event::Op(Completion {
        status: StatusCode::SUCCESS,
        key: key.to_vec(),
        cas: new_cas,
        value: Some(rendered),
        flags: 0,
    })
}

fn remove(state: &mut MemoryState, key: &[u8], cas: Cas) -> Event {
    let Some(entry) = state.entries.get(key) else {
        return failed(key, StatusCode::KEY_NOT_FOUND);
    };
    if entry.locked && cas != entry.cas {
        return failed(key, StatusCode::LOCKED);
    }
    if cas != 0 && cas != entry.cas {
        return failed(key, StatusCode::KEY_EXISTS);
    }
    state.entries.remove(key);
    succeeded(key, 0)
}

fn unlock(state: &mut MemoryState, key: &[u8], cas: Cas) -> Event {
    let Some(entry) = state.entries.get_mut(key) else {
        return failed(key, StatusCode::KEY_NOT_FOUND);
    };
    if !entry.locked || cas != entry.cas {
        return failed(key, StatusCode::TEMP_FAIL);
    }
    entry.locked = false;
    succeeded(key, entry.cas)
}

/// Execution lock that counts and order-checks release/reacquire pairs.
#[derive(Clone, Default)]
pub struct CountingLock {
    inner: Arc<Mutex<CountingState>>,
}

#[derive(Debug)]
struct CountingState {
    held: bool,
    next_token: u64,
    outstanding: Option<u64>,
    releases: u64,
    reacquires: u64,
}

impl Default for CountingState {
    fn default() -> Self {
        CountingState {
            held: true,
            next_token: 0,
            outstanding: None,
            releases: 0,
            reacquires: 0,
        }
    }
}

impl CountingLock {
    pub fn new() -> Self {
        CountingLock::default()
    }

    /// (releases, reacquires) observed so far.
    pub fn counts(&self) -> (u64, u64) {
        let state = self.inner.lock().expect("counting lock poisoned");
        (state.releases, state.reacquires)
    }

    pub fn is_held(&self) -> bool {
        self.inner.lock().expect("counting lock poisoned").held
    }
}

impl ExecutionLock for CountingLock {
    fn release(&self) -> LockToken {
        let mut state = self.inner.lock().expect("counting lock poisoned");
        assert!(state.held, "released while not held");
        state.held = false;
        state.next_token += 1;
        state.outstanding = Some(state.next_token);
        state.releases += 1;
        LockToken::new(state.next_token)
    }

    fn reacquire(&self, token: LockToken) {
        let mut state = self.inner.lock().expect("counting lock poisoned");
        assert!(!state.held, "reacquired before the matching release");
        assert_eq!(
            Some(token.id()),
            state.outstanding,
            "reacquired with a stale token"
        );
        state.held = true;
        state.outstanding = None;
        state.reacquires += 1;
    }
}
