//! Append-only text log of individual references.
//!
//! Line layout: `timestamp,address,accessType,size,threadId,instructionPointer`.
//! Lines are formatted outside the lock and appended in one write per
//! flush, so the sink lock is held only for the copy into the file.

use crate::error::{Error, Result};
use crate::record::{AccessKind, MemRef};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

pub const DEFAULT_TRACE_PATH: &str = "maap_trace.out";

enum SinkState {
    Unopened,
    Open(BufWriter<File>),
    Closed,
}

pub struct TraceSink {
    path: PathBuf,
    state: Mutex<SinkState>,
    lines_written: AtomicU64,
    write_errors: AtomicU64,
    dropped: AtomicU64,
}

impl TraceSink {
    /// Creates a handle; the file is not touched until first use.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(SinkState::Unopened),
            lines_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn open_file(path: &Path) -> Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::TraceOpen {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "Opened trace log");
        Ok(BufWriter::new(file))
    }

    /// Opens the log if no thread has done so yet. A sink that was already
    /// closed stays closed.
    pub fn ensure_open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let SinkState::Unopened = *state {
            *state = SinkState::Open(Self::open_file(&self.path)?);
        }
        Ok(())
    }

    /// Appends one line per record, all stamped with `timestamp_ms`.
    /// Returns the number of lines written.
    pub fn write_records(&self, timestamp_ms: u64, records: &[MemRef], thread_id: u64) -> usize {
        if records.is_empty() {
            return 0;
        }

        let mut batch = String::with_capacity(records.len() * 48);
        for record in records {
            format_line(&mut batch, timestamp_ms, record, thread_id);
        }

        let mut state = self.state.lock();
        if let SinkState::Unopened = *state {
            match Self::open_file(&self.path) {
                Ok(writer) => *state = SinkState::Open(writer),
                Err(e) => {
                    error!(error = %e, "Trace log unavailable, dropping records");
                    self.write_errors.fetch_add(1, Ordering::Relaxed);
                    self.dropped.fetch_add(records.len() as u64, Ordering::Relaxed);
                    return 0;
                }
            }
        }

        let result = match &mut *state {
            SinkState::Open(writer) => writer
                .write_all(batch.as_bytes())
                .and_then(|_| writer.flush()),
            _ => {
                self.dropped.fetch_add(records.len() as u64, Ordering::Relaxed);
                return 0;
            }
        };

        match result {
            Ok(()) => {
                self.lines_written
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
                records.len()
            }
            Err(e) => {
                error!(error = %e, path = %self.path.display(), "Trace write failed");
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(records.len() as u64, Ordering::Relaxed);
                // The failed batch is not retried by later flushes.
                if let SinkState::Open(writer) = std::mem::replace(&mut *state, SinkState::Closed) {
                    let (file, _unwritten) = writer.into_parts();
                    *state = SinkState::Open(BufWriter::new(file));
                }
                0
            }
        }
    }

    /// Flushes and closes the log. Returns `true` only for the call that
    /// actually closed an open file.
    pub fn close(&self) -> Result<bool> {
        let previous = std::mem::replace(&mut *self.state.lock(), SinkState::Closed);
        match previous {
            SinkState::Open(mut writer) => {
                writer.flush()?;
                debug!(
                    path = %self.path.display(),
                    lines = self.lines_written(),
                    "Closed trace log"
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), SinkState::Open(_))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Records that could not be written (open/write failure or closed sink).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for TraceSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Appends the trace line for `record` to `out`, newline included.
pub fn format_line(out: &mut String, timestamp_ms: u64, record: &MemRef, thread_id: u64) {
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "{},{:#x},{},{},{},{:#x}",
        timestamp_ms,
        record.address,
        record.kind.as_char(),
        record.size,
        thread_id,
        record.instruction_pointer
    );
}

/// A parsed trace log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub timestamp_ms: u64,
    pub thread_id: u64,
    pub record: MemRef,
}

impl TraceRecord {
    /// Parses one line of a trace log. `line_no` is only used for errors.
    pub fn parse_line(line_no: usize, line: &str) -> Result<Self> {
        let fail = |reason: String| Error::TraceParse {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != 6 {
            return Err(fail(format!("expected 6 fields, found {}", fields.len())));
        }

        let timestamp_ms = fields[0]
            .parse::<u64>()
            .map_err(|e| fail(format!("timestamp: {}", e)))?;
        let address = parse_pointer(fields[1]).ok_or_else(|| fail("address".to_string()))?;
        let kind = match fields[2].chars().collect::<Vec<_>>().as_slice() {
            [c] => AccessKind::from_char(*c),
            _ => None,
        }
        .ok_or_else(|| fail(format!("access type {:?}", fields[2])))?;
        let size = fields[3]
            .parse::<u32>()
            .map_err(|e| fail(format!("size: {}", e)))?;
        let thread_id = fields[4]
            .parse::<u64>()
            .map_err(|e| fail(format!("thread id: {}", e)))?;
        let instruction_pointer =
            parse_pointer(fields[5]).ok_or_else(|| fail("instruction pointer".to_string()))?;

        Ok(Self {
            timestamp_ms,
            thread_id,
            record: MemRef::new(kind, address, size, instruction_pointer),
        })
    }

    pub fn to_line(&self) -> String {
        let mut line = String::new();
        format_line(&mut line, self.timestamp_ms, &self.record, self.thread_id);
        line
    }
}

fn parse_pointer(field: &str) -> Option<u64> {
    if field == "(nil)" {
        return Some(0);
    }
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u64::from_str_radix(digits, 16).ok()
}
