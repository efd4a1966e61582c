// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Batch result aggregation.
//!
//! A [`MultiResult`] collects the per-key results of one batch call plus the
//! batch-level failure state: fatal (non-engine) errors, the first failed
//! operation, and the `all_ok` fast path. The session runs the raise gate
//! exactly once per batch; quiet callers receive the aggregator with the
//! failures embedded instead.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::error::{BatchReport, Error};
use crate::result::KvResult;

#[derive(Debug)]
pub struct MultiResult<R> {
    entries: BTreeMap<String, R>,
    fatal: Vec<Error>,
    first_error_key: Option<String>,
    all_ok: bool,
    suppress_missing: bool,
}

impl<R: KvResult> MultiResult<R> {
    pub(crate) fn new(suppress_missing: bool) -> Self {
        MultiResult {
            entries: BTreeMap::new(),
            fatal: Vec::new(),
            first_error_key: None,
            all_ok: true,
            suppress_missing,
        }
    }

    /// Inserts or replaces the entry for the result's key. Completions may
    /// arrive in any order; a duplicate key is last-write-wins.
    pub(crate) fn insert(&mut self, result: R) {
        let status = result.status_code();
        let key = result.key().to_string();
        if status.is_failure() {
            if status.is_not_found() && self.suppress_missing {
                // Recorded, retrievable, but treated as success.
            } else {
                self.all_ok = false;
                if self.first_error_key.is_none() {
                    self.first_error_key = Some(key.clone());
                }
            }
        }
        self.entries.insert(key, result);
    }

    /// Records a failure that did not come from an engine status code
    /// (e.g. a value decode error). Always clears `all_ok`.
    pub(crate) fn record_fatal(&mut self, error: Error) {
        self.all_ok = false;
        self.fatal.push(error);
    }

    /// Batch-completion gate: raises the first fatal error, then the first
    /// operational error, attaching the batch report either way. Consuming
    /// the aggregator makes running the gate twice unrepresentable.
    pub(crate) fn maybe_raise(mut self) -> Result<Self, Error> {
        if !self.fatal.is_empty() {
            let report = self.report();
            return Err(self.fatal.remove(0).with_batch(report));
        }
        if let Some(key) = self.first_error_key.clone() {
            let report = self.report();
            let entry = self
                .entries
                .get(&key)
                .expect("first operational error refers to a stored entry");
            return Err(Error::operation(entry.status_code())
                .with_key(key)
                .with_result(entry.snapshot())
                .with_batch(report));
        }
        Ok(self)
    }

    /// Owned per-key status report, used as error context.
    pub fn report(&self) -> BatchReport {
        BatchReport {
            all_ok: self.all_ok,
            statuses: self
                .entries
                .iter()
                .map(|(k, r)| (k.clone(), r.status_code()))
                .collect(),
            fatal_count: self.fatal.len(),
        }
    }

    /// Fast-path check: no fatal errors and no unsuppressed failures.
    pub fn all_ok(&self) -> bool {
        self.all_ok
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&R> {
        self.entries.get(key)
    }

    pub(crate) fn take(&mut self, key: &str) -> Option<R> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, R> {
        self.entries.iter()
    }

    /// Key of the first operation that failed with an unsuppressed status.
    pub fn first_error_key(&self) -> Option<&str> {
        self.first_error_key.as_deref()
    }

    /// Fatal errors captured while the batch drained.
    pub fn fatal_errors(&self) -> &[Error] {
        &self.fatal
    }

    pub(crate) fn take_first_fatal(&mut self) -> Option<Error> {
        if self.fatal.is_empty() {
            None
        } else {
            Some(self.fatal.remove(0))
        }
    }

    /// Transfers ownership of every entry to the caller.
    pub fn into_entries(self) -> BTreeMap<String, R> {
        self.entries
    }
}

impl<'a, R> IntoIterator for &'a MultiResult<R> {
    type Item = (&'a String, &'a R);
    type IntoIter = btree_map::Iter<'a, String, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
