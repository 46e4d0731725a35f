use memscope::{Engine, ThreadCounters, ThreadObserver};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};

/// Runs `op` on `num_threads` threads, each with its own observer, all
/// released together by a barrier. Returns every thread's merged counters.
pub fn run_observers<F>(engine: &Engine, num_threads: usize, op: F) -> Vec<ThreadCounters>
where
    F: Fn(usize, &mut ThreadObserver) + Send + Clone + 'static,
{
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<JoinHandle<ThreadCounters>> = (0..num_threads)
        .map(|thread_idx| {
            let barrier = Arc::clone(&barrier);
            let engine = engine.clone();
            let op = op.clone();
            thread::spawn(move || {
                let mut observer = engine.register_thread().unwrap();
                barrier.wait();
                op(thread_idx, &mut observer);
                observer.finish()
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}
