// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Incremental row parser for streaming HTTP row responses.
//!
//! Row queries deliver a JSON body of the shape
//! `{"total_rows": N, "rows": [ {..}, {..} ], ...}` in arbitrary chunk
//! boundaries. [`RowStream`] accepts chunks and yields each completed row
//! object without waiting for the body to finish; whatever precedes and
//! follows the rows array is kept as metadata.

/// Incremental parser state for one streaming row body.
#[derive(Debug, Default)]
pub struct RowStream {
    buffer: Vec<u8>,
    stage: Stage,
    /// Bytes seen before the rows array opened (holds `total_rows`).
    preamble: Vec<u8>,
    /// Bytes seen after the rows array closed (trailing metadata).
    tail: Vec<u8>,
    /// Resume offset into `buffer`; bytes before it were already scanned.
    scanned: usize,
    /// Offset of the opener of the row currently being buffered.
    row_start: Option<usize>,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Stage {
    #[default]
    Preamble,
    InRows,
    Tail,
}

impl RowStream {
    pub fn new() -> Self {
        RowStream::default()
    }

    /// Feeds a chunk and returns every row completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<serde_json::Value>, String> {
        self.buffer.extend_from_slice(chunk);
        let mut rows = Vec::new();

        if self.stage == Stage::Preamble {
            let Some(open) = self.find_rows_open() else {
                return Ok(rows);
            };
            self.preamble.extend_from_slice(&self.buffer[..open]);
            self.buffer.drain(..open);
            self.scanned = 0;
            self.stage = Stage::InRows;
        }

        if self.stage == Stage::InRows {
            self.scan_rows(&mut rows)?;
        }

        if self.stage == Stage::Tail {
            self.tail.append(&mut self.buffer);
            self.scanned = 0;
        }

        Ok(rows)
    }

    /// Signals end of body. Idempotent; a second call is a no-op.
    pub fn finish(&mut self) -> Result<Vec<serde_json::Value>, String> {
        match self.stage {
            Stage::Preamble => {
                // Body never contained a rows array; keep it as metadata.
                self.preamble.append(&mut self.buffer);
                self.scanned = 0;
                self.stage = Stage::Tail;
                Ok(Vec::new())
            }
            Stage::InRows => {
                let rows = self.push(&[])?;
                self.tail.append(&mut self.buffer);
                self.scanned = 0;
                self.stage = Stage::Tail;
                Ok(rows)
            }
            Stage::Tail => Ok(Vec::new()),
        }
    }

    /// Metadata bytes preceding the rows array.
    pub fn preamble(&self) -> &[u8] {
        &self.preamble
    }

    /// Metadata bytes following the rows array; complete only after
    /// [`RowStream::finish`].
    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    /// Locates the `[` that opens the rows array, returning the offset just
    /// past it. Only a `"rows"` key at the top level of the body counts.
    fn find_rows_open(&self) -> Option<usize> {
        let needle = b"\"rows\"";
        let mut depth = 0u32;
        let mut in_string = false;
        let mut escaped = false;
        let mut i = 0;
        while i < self.buffer.len() {
            let b = self.buffer[i];
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                i += 1;
                continue;
            }
            match b {
                b'"' => {
                    if depth == 1 && self.buffer[i..].starts_with(needle) {
                        // Require the colon and array opener after the key;
                        // if they have not arrived yet, a later push rescans.
                        let rest = &self.buffer[i + needle.len()..];
                        let mut j = 0;
                        while j < rest.len() && rest[j].is_ascii_whitespace() {
                            j += 1;
                        }
                        if j < rest.len() && rest[j] == b':' {
                            j += 1;
                            while j < rest.len() && rest[j].is_ascii_whitespace() {
                                j += 1;
                            }
                            if j < rest.len() && rest[j] == b'[' {
                                return Some(i + needle.len() + j + 1);
                            }
                        }
                    }
                    in_string = true;
                }
                b'{' | b'[' => depth += 1,
                b'}' | b']' => depth = depth.saturating_sub(1),
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// Extracts complete row objects from the buffer, resuming where the
    /// previous chunk left off. Flips the stage to `Tail` when the rows
    /// array closes.
    fn scan_rows(&mut self, rows: &mut Vec<serde_json::Value>) -> Result<(), String> {
        let mut i = self.scanned;
        while i < self.buffer.len() {
            let b = self.buffer[i];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                i += 1;
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => {
                    if self.depth == 0 {
                        self.row_start = Some(i);
                    }
                    self.depth += 1;
                }
                b'}' | b']' => {
                    if self.depth == 0 {
                        if b == b']' {
                            // Rows array closed; the rest is tail metadata.
                            self.buffer.drain(..=i);
                            self.scanned = 0;
                            self.stage = Stage::Tail;
                            return Ok(());
                        }
                        return Err("unbalanced brace in row stream".to_string());
                    }
                    self.depth -= 1;
                    if self.depth == 0 {
                        let begin = self.row_start.take().ok_or("row object without opener")?;
                        let row: serde_json::Value =
                            serde_json::from_slice(&self.buffer[begin..=i])
                                .map_err(|err| format!("malformed row: {err}"))?;
                        rows.push(row);
                        self.buffer.drain(..=i);
                        i = 0;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        // Compact consumed separators so the buffer only retains the row in
        // progress, then remember where scanning stopped.
        match self.row_start {
            Some(begin) => {
                if begin > 0 {
                    self.buffer.drain(..begin);
                    self.row_start = Some(0);
                }
                self.scanned = self.buffer.len();
            }
            None => {
                if self.depth == 0 && !self.in_string {
                    self.buffer.clear();
                }
                self.scanned = self.buffer.len();
            }
        }
        Ok(())
    }
}
