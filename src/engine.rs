use crate::config::ObserverConfig;
use crate::error::Result;
use crate::flush::{FlushPipeline, FlushSummary};
use crate::metrics::EngineMetrics;
use crate::record::{AccessKind, MemRef};
use crate::sampling::Decimator;
use crate::statistics::{ObservationReport, ReportInputs, StatsCollector, ThreadCounters};
use crate::thread_buffer::RefBuffer;
use crate::trace_sink::TraceSink;
use crate::working_set::WorkingSetTable;
use std::sync::Arc;
use tracing::{debug, info};

struct EngineInner {
    config: ObserverConfig,
    working_set: WorkingSetTable,
    decimator: Decimator,
    sink: Option<TraceSink>,
    stats: StatsCollector,
    metrics: EngineMetrics,
}

/// Shared observation state for one instrumented program.
///
/// Cloning is cheap; every clone refers to the same working set, trace log
/// and totals. Separate engines share nothing.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: ObserverConfig) -> Result<Self> {
        config.validate()?;

        let sink = config
            .trace
            .enabled
            .then(|| TraceSink::new(&config.trace.path));
        let inner = EngineInner {
            working_set: WorkingSetTable::new(config.working_set_capacity),
            decimator: Decimator::new(config.sampling.enabled, config.sampling.interval),
            sink,
            stats: StatsCollector::new(),
            metrics: EngineMetrics::new()?,
            config,
        };

        info!(
            sampling = inner.config.sampling.enabled,
            interval = inner.config.sampling.interval,
            tracing = inner.config.trace.enabled,
            working_set_capacity = inner.config.working_set_capacity,
            "Observation engine started"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Creates the observer for the calling thread.
    pub fn register_thread(&self) -> Result<ThreadObserver> {
        self.register_thread_with_id(current_thread_id())
    }

    /// Creates an observer that reports `thread_id` in the trace log,
    /// for callers replaying references on behalf of another thread.
    pub fn register_thread_with_id(&self, thread_id: u64) -> Result<ThreadObserver> {
        if let Some(sink) = &self.inner.sink {
            sink.ensure_open()?;
        }
        self.inner.stats.register_thread();
        self.inner.metrics.active_threads.inc();
        debug!(thread_id, "Observer thread registered");

        Ok(ThreadObserver {
            engine: self.clone(),
            buffer: RefBuffer::with_capacity(self.inner.config.buffer_capacity),
            counters: ThreadCounters::default(),
            staging: Vec::new(),
            thread_id,
            finished: false,
        })
    }

    fn pipeline(&self) -> FlushPipeline<'_> {
        FlushPipeline {
            working_set: &self.inner.working_set,
            decimator: &self.inner.decimator,
            sink: self.inner.sink.as_ref(),
            metrics: Some(&self.inner.metrics),
        }
    }

    /// Final figures. Fails while any observer is still alive.
    pub fn report(&self) -> Result<ObservationReport> {
        let sink = self.inner.sink.as_ref();
        self.inner.stats.report(ReportInputs {
            unique_lines: self.inner.working_set.unique_lines(),
            table_insert_failures: self.inner.working_set.insert_failures(),
            trace_dropped: sink.map_or(0, |s| s.dropped()),
            trace_write_errors: sink.map_or(0, |s| s.write_errors()),
        })
    }

    /// Produces the final report and closes the trace log.
    pub fn shutdown(&self) -> Result<ObservationReport> {
        let report = self.report()?;
        if let Some(sink) = &self.inner.sink {
            sink.close()?;
        }
        Ok(report)
    }

    pub fn metrics(&self) -> Result<String> {
        self.inner.metrics.export()
    }

    pub fn unique_lines(&self) -> u64 {
        self.inner.working_set.unique_lines()
    }

    pub fn active_threads(&self) -> u64 {
        self.inner.stats.active_threads()
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.inner.config
    }
}

/// Per-thread handle the instrumentation layer calls for every reference.
///
/// Dropping the observer flushes what is left in its buffer and merges its
/// counters into the engine.
pub struct ThreadObserver {
    engine: Engine,
    buffer: RefBuffer,
    counters: ThreadCounters,
    staging: Vec<MemRef>,
    thread_id: u64,
    finished: bool,
}

impl ThreadObserver {
    #[inline]
    pub fn on_memory_access(&mut self, record: MemRef) {
        if self.buffer.append(record) {
            self.flush();
        }
    }

    #[inline]
    pub fn on_access(&mut self, is_write: bool, address: u64, size: u32, instruction_pointer: u64) {
        self.on_memory_access(MemRef::new(
            AccessKind::from_is_write(is_write),
            address,
            size,
            instruction_pointer,
        ));
    }

    pub fn flush(&mut self) -> FlushSummary {
        self.engine.pipeline().flush(
            &mut self.buffer,
            &mut self.counters,
            self.thread_id,
            &mut self.staging,
        )
    }

    /// Flushes the remaining records and merges this thread's counters.
    pub fn finish(mut self) -> ThreadCounters {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> ThreadCounters {
        self.flush();
        self.finished = true;
        let counters = std::mem::take(&mut self.counters);
        self.engine.inner.stats.merge_and_destroy(counters);
        self.engine.inner.metrics.active_threads.dec();
        counters
    }

    pub fn counters(&self) -> ThreadCounters {
        self.counters
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }
}

impl Drop for ThreadObserver {
    fn drop(&mut self) {
        if !self.finished {
            self.finish_inner();
        }
    }
}

#[cfg(target_os = "linux")]
fn current_thread_id() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(not(target_os = "linux"))]
fn current_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}
