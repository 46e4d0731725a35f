//! Final report rendering and extraction.
//!
//! The rendered text keeps the wording profiling front ends already scrape
//! (`saw N memory references`, `working set size: N`, ...); diagnostic
//! lines are appended only when they are non-zero.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObservationReport {
    pub total_refs: u64,
    pub total_reads: u64,
    pub total_writes: u64,
    pub unique_lines: u64,
    pub elapsed_ms: u64,
    pub threads: u64,
    pub sampled_out: u64,
    pub rejected: u64,
    pub table_insert_failures: u64,
    pub trace_dropped: u64,
    pub trace_write_errors: u64,
}

const HEADER: &str = "Instrumentation results:";
const REFS_PREFIX: &str = "saw ";
const REFS_SUFFIX: &str = " memory references";
const READS: &str = "number of reads: ";
const WRITES: &str = "number of writes: ";
const WORKING_SET: &str = "working set size: ";
const EXEC_TIME: &str = "execution time: ";
const THREADS: &str = "threads observed: ";
const SAMPLED_OUT: &str = "sampled out: ";
const REJECTED: &str = "rejected malformed references: ";
const TABLE_FULL: &str = "working set insert failures (table full): ";
const TRACE_DROPPED: &str = "trace records dropped: ";
const TRACE_WRITE_ERRORS: &str = "trace write errors: ";

impl fmt::Display for ObservationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", HEADER)?;
        writeln!(f, "  {}{}{}", REFS_PREFIX, self.total_refs, REFS_SUFFIX)?;
        writeln!(f, "  {}{}", READS, self.total_reads)?;
        writeln!(f, "  {}{}", WRITES, self.total_writes)?;
        writeln!(f, "  {}{}", WORKING_SET, self.unique_lines)?;
        writeln!(f, "  {}{} ms", EXEC_TIME, self.elapsed_ms)?;

        let diagnostics = [
            (THREADS, self.threads),
            (SAMPLED_OUT, self.sampled_out),
            (REJECTED, self.rejected),
            (TABLE_FULL, self.table_insert_failures),
            (TRACE_DROPPED, self.trace_dropped),
            (TRACE_WRITE_ERRORS, self.trace_write_errors),
        ];
        for (label, value) in diagnostics {
            if value > 0 {
                writeln!(f, "  {}{}", label, value)?;
            }
        }
        Ok(())
    }
}

impl ObservationReport {
    /// Extracts a report from text that contains a rendered report, possibly
    /// surrounded by other program output.
    pub fn parse(text: &str) -> Result<Self> {
        let mut total_refs = None;
        let mut total_reads = None;
        let mut total_writes = None;
        let mut unique_lines = None;
        let mut elapsed_ms = None;
        let mut report = ObservationReport::default();

        for line in text.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix(REFS_PREFIX) {
                if let Some(n) = rest.strip_suffix(REFS_SUFFIX) {
                    total_refs = n.trim().parse().ok();
                }
            } else if let Some(n) = line.strip_prefix(READS) {
                total_reads = n.trim().parse().ok();
            } else if let Some(n) = line.strip_prefix(WRITES) {
                total_writes = n.trim().parse().ok();
            } else if let Some(n) = line.strip_prefix(WORKING_SET) {
                unique_lines = n.trim().parse().ok();
            } else if let Some(rest) = line.strip_prefix(EXEC_TIME) {
                elapsed_ms = rest.trim_end_matches("ms").trim().parse().ok();
            } else if let Some(n) = line.strip_prefix(THREADS) {
                report.threads = n.trim().parse().unwrap_or(0);
            } else if let Some(n) = line.strip_prefix(SAMPLED_OUT) {
                report.sampled_out = n.trim().parse().unwrap_or(0);
            } else if let Some(n) = line.strip_prefix(REJECTED) {
                report.rejected = n.trim().parse().unwrap_or(0);
            } else if let Some(n) = line.strip_prefix(TABLE_FULL) {
                report.table_insert_failures = n.trim().parse().unwrap_or(0);
            } else if let Some(n) = line.strip_prefix(TRACE_DROPPED) {
                report.trace_dropped = n.trim().parse().unwrap_or(0);
            } else if let Some(n) = line.strip_prefix(TRACE_WRITE_ERRORS) {
                report.trace_write_errors = n.trim().parse().unwrap_or(0);
            }
        }

        report.total_refs = total_refs.ok_or(Error::ReportParse("memory references"))?;
        report.total_reads = total_reads.ok_or(Error::ReportParse("number of reads"))?;
        report.total_writes = total_writes.ok_or(Error::ReportParse("number of writes"))?;
        report.unique_lines = unique_lines.ok_or(Error::ReportParse("working set size"))?;
        report.elapsed_ms = elapsed_ms.ok_or(Error::ReportParse("execution time"))?;
        Ok(report)
    }

    pub fn metrics(&self) -> ReportMetrics {
        ReportMetrics::from(self)
    }
}

/// Rates derived from a report. Frequencies are per second of execution
/// time and are zero when no time elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub read_freq: f64,
    pub write_freq: f64,
    pub total_reads: u64,
    pub total_writes: u64,
    pub workingset_size: u64,
}

impl From<&ObservationReport> for ReportMetrics {
    fn from(report: &ObservationReport) -> Self {
        let seconds = report.elapsed_ms as f64 / 1000.0;
        let per_second = |count: u64| {
            if report.elapsed_ms == 0 {
                0.0
            } else {
                count as f64 / seconds
            }
        };
        Self {
            read_freq: per_second(report.total_reads),
            write_freq: per_second(report.total_writes),
            total_reads: report.total_reads,
            total_writes: report.total_writes,
            workingset_size: report.unique_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObservationReport {
        ObservationReport {
            total_refs: 60_000,
            total_reads: 30_000,
            total_writes: 30_000,
            unique_lines: 10_000,
            elapsed_ms: 250,
            threads: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_layout() {
        let text = sample().to_string();
        let expected = "Instrumentation results:\n\
                        \x20 saw 60000 memory references\n\
                        \x20 number of reads: 30000\n\
                        \x20 number of writes: 30000\n\
                        \x20 working set size: 10000\n\
                        \x20 execution time: 250 ms\n\
                        \x20 threads observed: 3\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_diagnostics_shown_when_nonzero() {
        let report = ObservationReport {
            table_insert_failures: 7,
            rejected: 2,
            ..sample()
        };
        let text = report.to_string();
        assert!(text.contains("working set insert failures (table full): 7"));
        assert!(text.contains("rejected malformed references: 2"));
        assert!(!text.contains("sampled out"));
        assert_eq!(ObservationReport::parse(&text).unwrap(), report);
    }

    #[test]
    fn test_trace_failures_shown() {
        let report = ObservationReport {
            trace_dropped: 16,
            trace_write_errors: 2,
            ..sample()
        };
        let text = report.to_string();
        assert!(text.ends_with("  trace records dropped: 16\n  trace write errors: 2\n"));
        assert_eq!(ObservationReport::parse(&text).unwrap(), report);

        assert!(!sample().to_string().contains("trace write errors"));
    }

    #[test]
    fn test_parse_embedded_report() {
        let text = format!("Profiling output:\n program noise\n{}trailing\n", sample());
        assert_eq!(ObservationReport::parse(&text).unwrap(), sample());
    }

    #[test]
    fn test_parse_missing_field() {
        let text = "Instrumentation results:\n  saw 5 memory references\n";
        assert!(matches!(
            ObservationReport::parse(text),
            Err(Error::ReportParse("number of reads"))
        ));
    }

    #[test]
    fn test_metrics_frequencies() {
        let metrics = sample().metrics();
        assert_eq!(metrics.read_freq, 120_000.0);
        assert_eq!(metrics.write_freq, 120_000.0);
        assert_eq!(metrics.workingset_size, 10_000);

        let instant = ObservationReport {
            elapsed_ms: 0,
            ..sample()
        };
        assert_eq!(instant.metrics().read_freq, 0.0);
    }
}
