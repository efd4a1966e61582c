// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! HTTP row-request results.

use crate::engine::{Cas, HttpHandle};
use crate::error::{Error, Result};
use crate::result::KvResult;
use crate::rows::RowStream;
use crate::status::StatusCode;

/// The response body is parsed into rows incrementally as it streams.
pub const HTRES_F_CHUNKED: u16 = 1 << 0;
/// Non-success HTTP statuses are embedded instead of raised.
pub const HTRES_F_QUIET: u16 = 1 << 1;
/// The request has completed and the row context has been released.
pub const HTRES_F_COMPLETE: u16 = 1 << 2;

/// Outcome of one HTTP row/view request.
///
/// While the request is active the result exclusively owns its row-parsing
/// context; [`HttpResult::finish`] releases it exactly once, and dropping the
/// result releases it implicitly.
#[derive(Debug)]
pub struct HttpResult {
    pub status: StatusCode,
    pub path: String,
    pub http_status: u16,
    pub headers: Vec<(String, String)>,
    /// Raw body bytes; empty in chunked mode, where bytes stream through the
    /// row context instead.
    pub body: Vec<u8>,
    flags: u16,
    rows_ctx: Option<RowStream>,
    rows_out: Vec<serde_json::Value>,
    handle: HttpHandle,
}

impl HttpResult {
    pub(crate) fn new(path: impl Into<String>, chunked: bool, quiet: bool) -> Self {
        let mut flags = 0;
        if chunked {
            flags |= HTRES_F_CHUNKED;
        }
        if quiet {
            flags |= HTRES_F_QUIET;
        }
        HttpResult {
            status: StatusCode::SUCCESS,
            path: path.into(),
            http_status: 0,
            headers: Vec::new(),
            body: Vec::new(),
            flags,
            rows_ctx: None,
            rows_out: Vec::new(),
            handle: HttpHandle::new(),
        }
    }

    pub(crate) fn handle(&self) -> &HttpHandle {
        &self.handle
    }

    pub fn is_chunked(&self) -> bool {
        self.flags & HTRES_F_CHUNKED != 0
    }

    pub fn is_quiet(&self) -> bool {
        self.flags & HTRES_F_QUIET != 0
    }

    pub fn is_complete(&self) -> bool {
        self.flags & HTRES_F_COMPLETE != 0
    }

    /// Whether both the engine status and the HTTP status report success.
    pub fn ok(&self) -> bool {
        self.status.is_ok() && (200..300).contains(&self.http_status)
    }

    /// Appends body bytes to the row context and returns any rows they
    /// completed. Feeding a finished result is a caller error.
    pub fn feed_rows(&mut self, chunk: &[u8]) -> Result<Vec<serde_json::Value>> {
        if self.is_complete() {
            return Err(Error::arguments("http result already finished").with_key(self.path.clone()));
        }
        self.rows_ctx
            .get_or_insert_with(RowStream::new)
            .push(chunk)
            .map_err(|err| Error::wrap(crate::error::ErrorKind::Http, None, err))
    }

    /// Releases the row context, returning any rows flushed by the end of
    /// the body. Tolerates being called on an already-finished result.
    pub fn finish(&mut self) -> Result<Vec<serde_json::Value>> {
        if self.is_complete() {
            return Ok(Vec::new());
        }
        self.flags |= HTRES_F_COMPLETE;
        let flushed = match self.rows_ctx.as_mut() {
            Some(ctx) => ctx
                .finish()
                .map_err(|err| Error::wrap(crate::error::ErrorKind::Http, None, err))?,
            None => Vec::new(),
        };
        self.rows_ctx = None;
        Ok(flushed)
    }

    /// Rows accumulated by the callback adapter while the request streamed.
    pub fn rows(&self) -> &[serde_json::Value] {
        &self.rows_out
    }

    /// Transfers the accumulated rows to the caller.
    pub fn take_rows(&mut self) -> Vec<serde_json::Value> {
        std::mem::take(&mut self.rows_out)
    }

    pub(crate) fn push_rows(&mut self, rows: Vec<serde_json::Value>) {
        self.rows_out.extend(rows);
    }

    /// Raises when the request failed and quiet mode is off.
    pub(crate) fn check(self) -> Result<Self> {
        if self.ok() || self.is_quiet() {
            return Ok(self);
        }
        Err(Error::http(self.status, self.http_status, self.path.clone()))
    }
}

impl KvResult for HttpResult {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn key(&self) -> &str {
        &self.path
    }

    fn cas(&self) -> Cas {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_and_finish_yield_rows_once() {
        let mut result = HttpResult::new("/_design/d/_view/v", true, false);
        let rows = result
            .feed_rows(b"{\"rows\": [{\"id\": 1},")
            .expect("feed");
        assert_eq!(rows.len(), 1);
        let rows = result.feed_rows(b"{\"id\": 2}]}").expect("feed");
        assert_eq!(rows.len(), 1);
        assert!(result.finish().expect("finish").is_empty());
        assert!(result.is_complete());
        // A second finish is a no-op, and further feeding is rejected.
        assert!(result.finish().expect("finish again").is_empty());
        assert!(result.feed_rows(b"x").is_err());
    }

    #[test]
    fn ok_requires_engine_and_http_success() {
        let mut result = HttpResult::new("/p", false, false);
        result.http_status = 200;
        assert!(result.ok());
        result.http_status = 404;
        assert!(!result.ok());
        result.http_status = 200;
        result.status = StatusCode::NETWORK_ERROR;
        assert!(!result.ok());
    }

    #[test]
    fn check_respects_quiet() {
        let mut failed = HttpResult::new("/p", false, false);
        failed.http_status = 500;
        assert!(failed.check().is_err());

        let mut quiet = HttpResult::new("/p", false, true);
        quiet.http_status = 500;
        let back = quiet.check().expect("quiet embeds the failure");
        assert_eq!(back.http_status, 500);
    }
}
