use crate::error::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Health counters for one engine, kept in the engine's own registry so
/// independent engines never share series.
pub struct EngineMetrics {
    registry: Registry,
    pub flushes: IntCounter,
    pub records_flushed: IntCounter,
    pub sampled_out: IntCounter,
    pub rejected: IntCounter,
    pub table_insert_failures: IntCounter,
    pub trace_lines: IntCounter,
    pub working_set_lines: IntGauge,
    pub active_threads: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("memscope".to_string()), None)?;

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let g = IntGauge::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        Ok(Self {
            flushes: counter("flushes_total", "Per-thread buffer flushes")?,
            records_flushed: counter("records_flushed_total", "Records drained from buffers")?,
            sampled_out: counter("sampled_out_total", "References skipped by the decimator")?,
            rejected: counter("rejected_total", "Malformed references rejected")?,
            table_insert_failures: counter(
                "working_set_insert_failures_total",
                "Distinct lines dropped because the working set table was full",
            )?,
            trace_lines: counter("trace_lines_total", "Lines appended to the trace log")?,
            working_set_lines: gauge("working_set_lines", "Distinct cache lines observed")?,
            active_threads: gauge("active_threads", "Observer threads not yet merged")?,
            registry,
        })
    }

    /// Prometheus text exposition of every series.
    pub fn export(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
