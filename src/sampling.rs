use std::sync::atomic::{AtomicU64, Ordering};

/// Deterministic 1-in-N down-sampling over a counter shared by every
/// thread of an engine.
///
/// The counter advances once per reference considered whether or not the
/// reference is kept, so the accepted positions depend only on global
/// arrival order.
#[derive(Debug)]
pub struct Decimator {
    enabled: bool,
    interval: u64,
    counter: AtomicU64,
}

impl Decimator {
    pub fn new(enabled: bool, interval: u64) -> Self {
        Self {
            enabled,
            interval: interval.max(1),
            counter: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 1)
    }

    #[inline]
    pub fn should_process(&self) -> bool {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        !self.enabled || n % self.interval == 0
    }

    /// References considered so far.
    pub fn observed(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }
}
