// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Engine status codes.
//!
//! The native engine reports every scheduled or completed operation with one
//! of these codes. Codes below [`StatusCode::CLIENT_BASE`] originate on the
//! server or transport; codes at or above it are stamped by this crate for
//! failures that never left the client.

use std::fmt;

/// Status code delivered by the engine for a single operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0x00);
    pub const AUTH_ERROR: StatusCode = StatusCode(0x01);
    pub const DELTA_BAD_VALUE: StatusCode = StatusCode(0x02);
    pub const VALUE_TOO_BIG: StatusCode = StatusCode(0x03);
    pub const BUSY: StatusCode = StatusCode(0x04);
    pub const INTERNAL: StatusCode = StatusCode(0x05);
    pub const INVALID_ARGUMENT: StatusCode = StatusCode(0x06);
    pub const NO_MEMORY: StatusCode = StatusCode(0x07);
    pub const TEMP_FAIL: StatusCode = StatusCode(0x08);
    pub const KEY_EXISTS: StatusCode = StatusCode(0x09);
    pub const KEY_NOT_FOUND: StatusCode = StatusCode(0x0a);
    pub const NOT_STORED: StatusCode = StatusCode(0x0b);
    pub const NOT_SUPPORTED: StatusCode = StatusCode(0x0c);
    pub const UNKNOWN_COMMAND: StatusCode = StatusCode(0x0d);
    pub const NETWORK_ERROR: StatusCode = StatusCode(0x0e);
    pub const TIMEOUT: StatusCode = StatusCode(0x0f);
    pub const LOCKED: StatusCode = StatusCode(0x10);

    /// First code reserved for client-side failures.
    pub const CLIENT_BASE: StatusCode = StatusCode(0x200);
    /// The stored value could not be decoded with its recorded format flags.
    pub const CLIENT_DECODE_FAILURE: StatusCode = StatusCode(0x201);
    /// The engine refused to accept the command for scheduling.
    pub const CLIENT_SCHEDULING_FAILED: StatusCode = StatusCode(0x202);

    pub fn is_ok(self) -> bool {
        self == StatusCode::SUCCESS
    }

    pub fn is_failure(self) -> bool {
        !self.is_ok()
    }

    /// Whether this code means the key was absent from the store.
    pub fn is_not_found(self) -> bool {
        self == StatusCode::KEY_NOT_FOUND
    }

    /// Operator-facing description of the code.
    pub fn describe(self) -> &'static str {
        match self {
            StatusCode::SUCCESS => "success",
            StatusCode::AUTH_ERROR => "authentication failed",
            StatusCode::DELTA_BAD_VALUE => "existing value is not a number",
            StatusCode::VALUE_TOO_BIG => "value exceeds the size limit",
            StatusCode::BUSY => "server busy",
            StatusCode::INTERNAL => "internal engine error",
            StatusCode::INVALID_ARGUMENT => "invalid argument",
            StatusCode::NO_MEMORY => "server out of memory",
            StatusCode::TEMP_FAIL => "temporary failure, retry later",
            StatusCode::KEY_EXISTS => "key exists with a different CAS",
            StatusCode::KEY_NOT_FOUND => "key not found",
            StatusCode::NOT_STORED => "item not stored",
            StatusCode::NOT_SUPPORTED => "operation not supported",
            StatusCode::UNKNOWN_COMMAND => "unknown command",
            StatusCode::NETWORK_ERROR => "network failure",
            StatusCode::TIMEOUT => "operation timed out",
            StatusCode::LOCKED => "key is locked",
            StatusCode::CLIENT_DECODE_FAILURE => "stored value could not be decoded",
            StatusCode::CLIENT_SCHEDULING_FAILED => "command could not be scheduled",
            _ => "unrecognized status code",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x} ({})", self.0, self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StatusCode::SUCCESS.is_ok());
        assert!(!StatusCode::SUCCESS.is_failure());
        assert!(StatusCode::KEY_NOT_FOUND.is_failure());
        assert!(StatusCode::KEY_NOT_FOUND.is_not_found());
        assert!(!StatusCode::KEY_EXISTS.is_not_found());
        assert!(StatusCode::CLIENT_DECODE_FAILURE.is_failure());
    }

    #[test]
    fn display_includes_code_and_description() {
        let rendered = StatusCode::LOCKED.to_string();
        assert_eq!(rendered, "0x10 (key is locked)");
        assert_eq!(StatusCode(0x1ff).describe(), "unrecognized status code");
    }
}
