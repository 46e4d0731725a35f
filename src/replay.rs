//! Reading trace logs back and feeding them through an engine.
//!
//! Each thread id found in the log gets its own worker thread and observer,
//! fed over a bounded channel, so per-thread order is preserved while
//! threads interleave the way they would in a live run.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::record::MemRef;
use crate::statistics::ThreadCounters;
use crate::trace_sink::TraceRecord;
use crossbeam::channel::{bounded, Sender};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

const WORKER_QUEUE_DEPTH: usize = 4096;

/// Iterator over the records of a trace log. Blank lines are skipped.
pub struct TraceReader<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl TraceReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(TraceRecord::parse_line(self.line_no, &line));
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub records: u64,
    pub threads: usize,
}

struct Worker {
    sender: Sender<MemRef>,
    handle: JoinHandle<ThreadCounters>,
}

/// Replays `records` through `engine`. Every worker has finished and merged
/// its counters by the time this returns, so `engine.report()` is ready.
pub fn replay<I>(engine: &Engine, records: I) -> Result<ReplaySummary>
where
    I: IntoIterator<Item = Result<TraceRecord>>,
{
    let mut workers: HashMap<u64, Worker> = HashMap::new();
    let mut summary = ReplaySummary::default();

    let outcome = (|| -> Result<()> {
        for record in records {
            let record = record?;
            if !workers.contains_key(&record.thread_id) {
                let worker = spawn_worker(engine, record.thread_id)?;
                workers.insert(record.thread_id, worker);
            }
            let worker = &workers[&record.thread_id];
            worker
                .sender
                .send(record.record)
                .map_err(|_| Error::Replay(format!("worker for thread {} exited", record.thread_id)))?;
            summary.records += 1;
        }
        Ok(())
    })();

    summary.threads = workers.len();
    let mut join_error = None;
    for (thread_id, worker) in workers {
        drop(worker.sender);
        match worker.handle.join() {
            Ok(counters) => debug!(thread_id, refs = counters.refs, "Replay worker finished"),
            Err(_) => {
                join_error = Some(Error::Replay(format!("worker for thread {} panicked", thread_id)))
            }
        }
    }

    outcome?;
    if let Some(e) = join_error {
        return Err(e);
    }
    info!(records = summary.records, threads = summary.threads, "Replay complete");
    Ok(summary)
}

/// Replays the trace log at `path`.
pub fn replay_file<P: AsRef<Path>>(engine: &Engine, path: P) -> Result<ReplaySummary> {
    replay(engine, TraceReader::open(path)?)
}

fn spawn_worker(engine: &Engine, thread_id: u64) -> Result<Worker> {
    // Registered here so a trace-open failure surfaces to the caller.
    let mut observer = engine.register_thread_with_id(thread_id)?;
    let (sender, receiver) = bounded::<MemRef>(WORKER_QUEUE_DEPTH);

    let handle = thread::Builder::new()
        .name(format!("replay-{}", thread_id))
        .spawn(move || {
            for record in receiver {
                observer.on_memory_access(record);
            }
            observer.finish()
        })?;

    Ok(Worker { sender, handle })
}
