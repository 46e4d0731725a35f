use crate::error::{Error, Result};
use crate::statistics::reporter::ObservationReport;
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, info};

/// Counters owned by one observer thread. They are only ever touched by
/// that thread and are merged into the engine totals once, at exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadCounters {
    /// Well-formed references seen, including those sampled out.
    pub refs: u64,
    pub reads: u64,
    pub writes: u64,
    pub sampled_out: u64,
    /// Malformed references (zero-byte accesses).
    pub rejected: u64,
}

impl ThreadCounters {
    pub fn processed(&self) -> u64 {
        self.reads + self.writes
    }

    fn add_to(&self, totals: &mut GlobalTotals) {
        totals.refs += self.refs;
        totals.reads += self.reads;
        totals.writes += self.writes;
        totals.sampled_out += self.sampled_out;
        totals.rejected += self.rejected;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalTotals {
    pub refs: u64,
    pub reads: u64,
    pub writes: u64,
    pub sampled_out: u64,
    pub rejected: u64,
    pub threads_registered: u64,
    pub threads_merged: u64,
}

impl GlobalTotals {
    pub fn active_threads(&self) -> u64 {
        self.threads_registered.saturating_sub(self.threads_merged)
    }
}

/// Figures owned by other components that end up in the final report.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportInputs {
    pub unique_lines: u64,
    pub table_insert_failures: u64,
    pub trace_dropped: u64,
    pub trace_write_errors: u64,
}

/// Engine-wide totals, merged from each observer thread as it terminates.
pub struct StatsCollector {
    totals: Mutex<GlobalTotals>,
    started: Instant,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(GlobalTotals::default()),
            started: Instant::now(),
        }
    }

    pub fn register_thread(&self) {
        self.totals.lock().threads_registered += 1;
    }

    /// Folds a finished thread's counters into the totals. Consumes the
    /// counters so they cannot be merged twice. A thread that never went
    /// through `register_thread` is registered here.
    pub fn merge_and_destroy(&self, counters: ThreadCounters) {
        let active = {
            let mut totals = self.totals.lock();
            counters.add_to(&mut totals);
            totals.threads_merged += 1;
            if totals.threads_merged > totals.threads_registered {
                totals.threads_registered = totals.threads_merged;
            }
            totals.active_threads()
        };
        debug!(
            refs = counters.refs,
            reads = counters.reads,
            writes = counters.writes,
            active_threads = active,
            "Merged observer thread counters"
        );
    }

    pub fn totals(&self) -> GlobalTotals {
        *self.totals.lock()
    }

    pub fn active_threads(&self) -> u64 {
        self.totals.lock().active_threads()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Builds the final report. Fails while any registered thread has not
    /// merged its counters yet.
    pub fn report(&self, inputs: ReportInputs) -> Result<ObservationReport> {
        let totals = self.totals();
        if totals.active_threads() > 0 {
            return Err(Error::ThreadsStillActive(totals.active_threads()));
        }

        let report = ObservationReport {
            total_refs: totals.refs,
            total_reads: totals.reads,
            total_writes: totals.writes,
            unique_lines: inputs.unique_lines,
            elapsed_ms: self.elapsed_ms(),
            threads: totals.threads_merged,
            sampled_out: totals.sampled_out,
            rejected: totals.rejected,
            table_insert_failures: inputs.table_insert_failures,
            trace_dropped: inputs.trace_dropped,
            trace_write_errors: inputs.trace_write_errors,
        };
        info!(
            refs = report.total_refs,
            reads = report.total_reads,
            writes = report.total_writes,
            unique_lines = report.unique_lines,
            elapsed_ms = report.elapsed_ms,
            "Observation complete"
        );
        Ok(report)
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
