// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Host execution-lock integration.
//!
//! Embedding hosts that serialize their runtime behind a cooperative lock
//! plug it in here so the session can let other host work run while it
//! blocks in the engine. Callback bodies always run with the lock held:
//! the adapter reacquires around each callback and releases again before
//! returning control to the engine.

/// Proof of one release, to be spent on exactly one reacquisition.
#[derive(Debug)]
pub struct LockToken(u64);

impl LockToken {
    pub fn new(id: u64) -> Self {
        LockToken(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Host-wide cooperative execution lock.
///
/// `release` is called with the lock held and must return a token;
/// `reacquire` consumes that token and blocks until the lock is held again.
/// Pairing is enforced by the session: releasing twice without an
/// intervening reacquire, or reacquiring without a token, is a fatal
/// invariant violation (assertion), not a recoverable error.
pub trait ExecutionLock: Send + Sync {
    fn release(&self) -> LockToken;
    fn reacquire(&self, token: LockToken);
}

/// Release/reacquire pairing used around a blocking wait.
///
/// Mirrors the begin/end discipline of the callback path: the wait loop
/// releases once, each callback reacquires for its body and releases on the
/// way out, and the wait loop reacquires once at the end.
pub(crate) struct ExecBracket<'a> {
    lock: Option<&'a dyn ExecutionLock>,
    token: Option<LockToken>,
    releases: u64,
    reacquires: u64,
}

impl<'a> ExecBracket<'a> {
    pub(crate) fn new(lock: Option<&'a dyn ExecutionLock>) -> Self {
        ExecBracket {
            lock,
            token: None,
            releases: 0,
            reacquires: 0,
        }
    }

    pub(crate) fn release(&mut self) {
        if let Some(lock) = self.lock {
            assert!(
                self.token.is_none(),
                "execution lock released twice without reacquisition"
            );
            self.token = Some(lock.release());
            self.releases += 1;
        }
    }

    pub(crate) fn reacquire(&mut self) {
        if let Some(lock) = self.lock {
            let token = self
                .token
                .take()
                .expect("execution lock reacquired without a matching release");
            lock.reacquire(token);
            self.reacquires += 1;
        }
    }

    /// (releases, reacquires) performed through this bracket.
    pub(crate) fn counts(&self) -> (u64, u64) {
        (self.releases, self.reacquires)
    }
}

impl Drop for ExecBracket<'_> {
    fn drop(&mut self) {
        // A bracket must never be dropped holding the host lock hostage.
        if !std::thread::panicking() {
            assert!(
                self.token.is_none(),
                "execution lock bracket dropped while released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLock {
        state: Mutex<(u64, bool)>,
    }

    impl ExecutionLock for RecordingLock {
        fn release(&self) -> LockToken {
            let mut state = self.state.lock().unwrap();
            assert!(!state.1, "released while already released");
            state.0 += 1;
            state.1 = true;
            LockToken::new(state.0)
        }

        fn reacquire(&self, token: LockToken) {
            let mut state = self.state.lock().unwrap();
            assert!(state.1, "reacquired while held");
            assert_eq!(token.id(), state.0, "token mismatch");
            state.1 = false;
        }
    }

    #[test]
    fn bracket_pairs_release_and_reacquire() {
        let lock = RecordingLock::default();
        let mut bracket = ExecBracket::new(Some(&lock));
        bracket.release();
        bracket.reacquire();
        bracket.release();
        bracket.reacquire();
        assert_eq!(bracket.counts(), (2, 2));
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_is_fatal() {
        let lock = RecordingLock::default();
        let mut bracket = ExecBracket::new(Some(&lock));
        bracket.release();
        bracket.release();
    }

    #[test]
    fn bracket_without_a_lock_is_inert() {
        let mut bracket = ExecBracket::new(None);
        bracket.release();
        bracket.reacquire();
        assert_eq!(bracket.counts(), (0, 0));
    }
}
