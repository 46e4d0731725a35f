#![allow(dead_code)]

pub mod concurrent;

use memscope::{Engine, ObserverConfig};
use std::path::Path;

/// Base address for synthetic workloads; each thread gets its own region
/// when distinct lines are needed.
pub const REGION_BASE: u64 = 0x1000_0000;
pub const REGION_STRIDE: u64 = 0x1000_0000;
pub const LINE: u64 = 64;

pub fn test_config() -> ObserverConfig {
    ObserverConfig {
        working_set_capacity: 1 << 16,
        ..Default::default()
    }
}

pub fn test_engine() -> Engine {
    Engine::new(test_config()).expect("engine")
}

pub fn traced_engine(path: &Path) -> Engine {
    Engine::new(test_config().with_trace(path)).expect("engine")
}

pub fn line_of(thread: usize, i: u64) -> u64 {
    REGION_BASE + thread as u64 * REGION_STRIDE + i * LINE
}
