//! Draining a per-thread buffer into the engine's shared state.
//!
//! Runs synchronously on the thread whose buffer filled (or is exiting).
//! The working-set lock is taken per record and released before the trace
//! sink lock is taken once for the whole batch; the two are never held
//! together.

use crate::metrics::EngineMetrics;
use crate::record::{AccessKind, MemRef};
use crate::sampling::Decimator;
use crate::statistics::ThreadCounters;
use crate::thread_buffer::RefBuffer;
use crate::trace_sink::TraceSink;
use crate::working_set::{InsertOutcome, WorkingSetTable};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// What one flush did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub drained: usize,
    pub processed: usize,
    pub sampled_out: usize,
    pub rejected: usize,
    pub new_lines: usize,
    pub traced: usize,
}

pub struct FlushPipeline<'a> {
    pub working_set: &'a WorkingSetTable,
    pub decimator: &'a Decimator,
    pub sink: Option<&'a TraceSink>,
    pub metrics: Option<&'a EngineMetrics>,
}

impl FlushPipeline<'_> {
    pub fn flush(
        &self,
        buffer: &mut RefBuffer,
        counters: &mut ThreadCounters,
        thread_id: u64,
        staging: &mut Vec<MemRef>,
    ) -> FlushSummary {
        if buffer.is_empty() {
            return FlushSummary::default();
        }

        let timestamp_ms = now_millis();
        let mut summary = FlushSummary {
            drained: buffer.len(),
            ..Default::default()
        };
        staging.clear();

        for record in buffer.records() {
            if !record.is_well_formed() {
                counters.rejected += 1;
                summary.rejected += 1;
                continue;
            }

            counters.refs += 1;
            if !self.decimator.should_process() {
                counters.sampled_out += 1;
                summary.sampled_out += 1;
                continue;
            }

            match self.working_set.insert_line(record.line()) {
                InsertOutcome::Inserted => summary.new_lines += 1,
                InsertOutcome::AlreadyPresent => {}
                InsertOutcome::TableFull => {
                    if let Some(metrics) = self.metrics {
                        metrics.table_insert_failures.inc();
                    }
                }
            }

            match record.kind {
                AccessKind::Read => counters.reads += 1,
                AccessKind::Write => counters.writes += 1,
            }
            summary.processed += 1;

            if self.sink.is_some() {
                staging.push(*record);
            }
        }

        if let Some(sink) = self.sink {
            summary.traced = sink.write_records(timestamp_ms, staging.as_slice(), thread_id);
        }
        staging.clear();
        buffer.reset();

        if let Some(metrics) = self.metrics {
            metrics.flushes.inc();
            metrics.records_flushed.inc_by(summary.drained as u64);
            metrics.sampled_out.inc_by(summary.sampled_out as u64);
            metrics.rejected.inc_by(summary.rejected as u64);
            metrics.trace_lines.inc_by(summary.traced as u64);
            metrics
                .working_set_lines
                .set(self.working_set.unique_lines() as i64);
        }

        trace!(
            thread_id,
            drained = summary.drained,
            processed = summary.processed,
            new_lines = summary.new_lines,
            "Flushed reference buffer"
        );
        summary
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fill(buffer: &mut RefBuffer, records: &[MemRef]) {
        for record in records {
            buffer.append(*record);
        }
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let table = WorkingSetTable::new(64);
        let decimator = Decimator::new(true, 2);
        let pipeline = FlushPipeline {
            working_set: &table,
            decimator: &decimator,
            sink: None,
            metrics: None,
        };

        let mut buffer = RefBuffer::with_capacity(4);
        let mut counters = ThreadCounters::default();
        let summary = pipeline.flush(&mut buffer, &mut counters, 1, &mut Vec::new());

        assert_eq!(summary, FlushSummary::default());
        assert_eq!(counters, ThreadCounters::default());
        assert_eq!(table.unique_lines(), 0);
        assert_eq!(decimator.observed(), 0);
    }

    #[test]
    fn test_flush_counts_and_resets() {
        let table = WorkingSetTable::new(64);
        let decimator = Decimator::disabled();
        let metrics = EngineMetrics::new().unwrap();
        let pipeline = FlushPipeline {
            working_set: &table,
            decimator: &decimator,
            sink: None,
            metrics: Some(&metrics),
        };

        let mut buffer = RefBuffer::with_capacity(8);
        fill(
            &mut buffer,
            &[
                MemRef::read(0x1000, 8, 1),
                MemRef::write(0x1008, 8, 2),
                MemRef::read(0x2000, 4, 3),
                MemRef::write(0x3000, 0, 4),
            ],
        );
        let mut counters = ThreadCounters::default();
        let summary = pipeline.flush(&mut buffer, &mut counters, 1, &mut Vec::new());

        assert_eq!(summary.drained, 4);
        assert_eq!(summary.new_lines, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(
            counters,
            ThreadCounters {
                refs: 3,
                reads: 2,
                writes: 1,
                sampled_out: 0,
                rejected: 1,
            }
        );
        assert!(buffer.is_empty());
        assert_eq!(metrics.flushes.get(), 1);
        assert_eq!(metrics.working_set_lines.get(), 2);
    }

    #[test]
    fn test_sampled_out_records_skip_table_and_trace() {
        let dir = tempdir().unwrap();
        let sink = TraceSink::new(dir.path().join("trace.out"));
        let table = WorkingSetTable::new(64);
        let decimator = Decimator::new(true, 3);
        let pipeline = FlushPipeline {
            working_set: &table,
            decimator: &decimator,
            sink: Some(&sink),
            metrics: None,
        };

        let mut buffer = RefBuffer::with_capacity(8);
        let records: Vec<MemRef> = (0..6u64).map(|i| MemRef::read(i * 64, 8, i)).collect();
        fill(&mut buffer, &records);
        let mut counters = ThreadCounters::default();
        let summary = pipeline.flush(&mut buffer, &mut counters, 9, &mut Vec::new());

        // The 3rd and 6th references are kept.
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.traced, 2);
        assert_eq!(counters.refs, 6);
        assert_eq!(counters.sampled_out, 4);
        assert!(table.contains(2 * 64));
        assert!(table.contains(5 * 64));
        assert!(!table.contains(0));

        sink.close().unwrap();
        let log = std::fs::read_to_string(sink.path()).unwrap();
        let addresses: Vec<&str> = log.lines().map(|l| l.split(',').nth(1).unwrap()).collect();
        assert_eq!(addresses, vec!["0x80", "0x140"]);
    }
}
