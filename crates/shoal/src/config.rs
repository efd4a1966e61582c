// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Session configuration.
//!
//! Everything that shapes a session is decided here, once, and handed to
//! [`crate::session::Session::connect`] by value; there is no process-wide
//! registry to consult afterwards.

use crate::transcode::{format_recognized, FMT_JSON};

/// Coordination between callers that share one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockMode {
    /// No coordination; concurrent use is the caller's problem.
    None,
    /// A second caller fails immediately with a threading error.
    #[default]
    Exclusive,
    /// A second caller blocks until the session is idle again.
    Wait,
}

/// Immutable construction-time configuration for a [`crate::session::Session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bucket this session is bound to.
    pub bucket: String,
    /// Default format flags for stored values; per-operation overrides win.
    pub default_format: u32,
    /// Embed failure statuses instead of raising (argument and internal
    /// errors still surface).
    pub quiet: bool,
    pub lockmode: LockMode,
    /// Release the host execution lock (when one is installed) while blocked
    /// in the engine.
    pub release_exec_lock: bool,
    /// Skip value decoding; results carry raw bytes.
    pub data_passthrough: bool,
    /// Reserved capability bits.
    pub features: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            bucket: "default".to_string(),
            default_format: FMT_JSON,
            quiet: false,
            lockmode: LockMode::Exclusive,
            release_exec_lock: true,
            data_passthrough: false,
            features: 0,
        }
    }
}

impl SessionConfig {
    /// Whether the configured default format names a built-in codec.
    pub fn format_is_valid(&self) -> bool {
        format_recognized(self.default_format)
    }
}
