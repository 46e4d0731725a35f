//! Runtime memory-reference observation.
//!
//! An instrumentation layer reports every load and store through a
//! per-thread [`ThreadObserver`]. References are buffered without locks,
//! flushed in batches into an engine-wide working set of distinct cache
//! lines, optionally down-sampled, and optionally appended to a text trace
//! log. When every observer has finished, [`Engine::report`] returns the
//! totals.
//!
//! ```no_run
//! use memscope::{Engine, ObserverConfig};
//!
//! let engine = Engine::new(ObserverConfig::default())?;
//! let mut observer = engine.register_thread()?;
//! observer.on_access(false, 0x7ffd_1000, 8, 0x40_1000);
//! drop(observer);
//! println!("{}", engine.shutdown()?);
//! # Ok::<(), memscope::Error>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod flush;
pub mod logging;
pub mod metrics;
pub mod record;
pub mod replay;
pub mod sampling;
pub mod statistics;
pub mod thread_buffer;
pub mod trace_sink;
pub mod working_set;

pub use config::{ObserverConfig, SamplingConfig, TraceConfig};
pub use engine::{Engine, ThreadObserver};
pub use error::{Error, Result};
pub use flush::{FlushPipeline, FlushSummary};
pub use record::{line_address, AccessKind, MemRef, CACHE_LINE_SIZE};
pub use replay::{replay, replay_file, ReplaySummary, TraceReader};
pub use sampling::Decimator;
pub use statistics::{ObservationReport, ReportMetrics, StatsCollector, ThreadCounters};
pub use thread_buffer::{RefBuffer, MAX_REFS};
pub use trace_sink::{TraceRecord, TraceSink};
pub use working_set::{InsertOutcome, WorkingSetTable};
