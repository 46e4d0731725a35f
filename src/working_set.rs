//! Engine-wide set of distinct cache lines.
//!
//! A fixed-capacity open-addressed table with linear probing. It is
//! allocated once and never resized; when probing wraps all the way around
//! without finding room the insert is rejected and the working set is
//! undercounted rather than corrupted.

use crate::record::CACHE_LINE_SIZE;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

pub const DEFAULT_WORKING_SET_CAPACITY: usize = 1 << 20;

const LINE_SHIFT: u32 = CACHE_LINE_SIZE.trailing_zeros();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this line has been seen.
    Inserted,
    AlreadyPresent,
    /// Every slot was probed without finding the line or an empty slot.
    TableFull,
}

impl InsertOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

pub struct WorkingSetTable {
    // `None` marks an empty slot, so line 0 is trackable like any other.
    slots: Mutex<Box<[Option<u64>]>>,
    capacity: usize,
    unique_lines: AtomicU64,
    insert_failures: AtomicU64,
    full_warned: AtomicBool,
}

impl WorkingSetTable {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "working set capacity must be non-zero");
        Self {
            slots: Mutex::new(vec![None; capacity].into_boxed_slice()),
            capacity,
            unique_lines: AtomicU64::new(0),
            insert_failures: AtomicU64::new(0),
            full_warned: AtomicBool::new(false),
        }
    }

    #[inline]
    fn home_slot(&self, line: u64) -> usize {
        ((line >> LINE_SHIFT) % self.capacity as u64) as usize
    }

    /// Records `line` (already aligned to a cache line) and reports whether
    /// it was new.
    pub fn insert_line(&self, line: u64) -> InsertOutcome {
        debug_assert_eq!(line % CACHE_LINE_SIZE, 0, "unaligned line address");
        let start = self.home_slot(line);

        let outcome = {
            let mut slots = self.slots.lock();
            let mut outcome = InsertOutcome::TableFull;
            for i in 0..self.capacity {
                let idx = (start + i) % self.capacity;
                match slots[idx] {
                    None => {
                        slots[idx] = Some(line);
                        self.unique_lines.fetch_add(1, Ordering::Relaxed);
                        outcome = InsertOutcome::Inserted;
                        break;
                    }
                    Some(existing) if existing == line => {
                        outcome = InsertOutcome::AlreadyPresent;
                        break;
                    }
                    Some(_) => {}
                }
            }
            outcome
        };

        if outcome == InsertOutcome::TableFull {
            self.insert_failures.fetch_add(1, Ordering::Relaxed);
            if !self.full_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    capacity = self.capacity,
                    "Working set table is full, further distinct lines will not be counted"
                );
            }
        }
        outcome
    }

    pub fn contains(&self, line: u64) -> bool {
        let start = self.home_slot(line);
        let slots = self.slots.lock();
        for i in 0..self.capacity {
            match slots[(start + i) % self.capacity] {
                None => return false,
                Some(existing) if existing == line => return true,
                Some(_) => {}
            }
        }
        false
    }

    pub fn unique_lines(&self) -> u64 {
        self.unique_lines.load(Ordering::Relaxed)
    }

    /// Inserts rejected because the table had no room.
    pub fn insert_failures(&self) -> u64 {
        self.insert_failures.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.unique_lines() as usize >= self.capacity
    }
}

impl Default for WorkingSetTable {
    fn default() -> Self {
        Self::new(DEFAULT_WORKING_SET_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::line_address;

    #[test]
    fn test_same_line_counted_once() {
        let table = WorkingSetTable::new(1024);
        let base = 0x7fff_0000_1000u64;

        assert!(table.insert_line(line_address(base)).is_new());
        for offset in 1..CACHE_LINE_SIZE {
            assert_eq!(
                table.insert_line(line_address(base + offset)),
                InsertOutcome::AlreadyPresent
            );
        }
        assert_eq!(table.unique_lines(), 1);
    }

    #[test]
    fn test_line_zero_is_tracked() {
        let table = WorkingSetTable::new(16);
        assert!(!table.contains(0));
        assert_eq!(table.insert_line(0), InsertOutcome::Inserted);
        assert_eq!(table.insert_line(0), InsertOutcome::AlreadyPresent);
        assert!(table.contains(0));
        assert_eq!(table.unique_lines(), 1);
    }

    #[test]
    fn test_collisions_probe_forward() {
        // With 4 slots these lines all hash to slot 0.
        let table = WorkingSetTable::new(4);
        let lines = [0u64, 4 * 64, 8 * 64, 12 * 64];
        for line in lines {
            assert!(table.insert_line(line).is_new());
        }
        for line in lines {
            assert!(table.contains(line));
            assert_eq!(table.insert_line(line), InsertOutcome::AlreadyPresent);
        }
    }

    #[test]
    fn test_probe_wraps_around() {
        let table = WorkingSetTable::new(4);
        // Home slot 3, then wraps to slot 0.
        assert!(table.insert_line(3 * 64).is_new());
        assert!(table.insert_line(7 * 64).is_new());
        assert!(table.contains(7 * 64));
    }

    #[test]
    fn test_exhaustion_is_soft() {
        let table = WorkingSetTable::new(8);
        for i in 0..8u64 {
            assert!(table.insert_line(i * 64).is_new());
        }
        assert!(table.is_full());
        assert_eq!(table.insert_line(100 * 64), InsertOutcome::TableFull);
        assert_eq!(table.insert_line(101 * 64), InsertOutcome::TableFull);
        // Lines already present are still recognised.
        assert_eq!(table.insert_line(3 * 64), InsertOutcome::AlreadyPresent);
        assert_eq!(table.unique_lines(), 8);
        assert_eq!(table.insert_failures(), 2);
    }
}
