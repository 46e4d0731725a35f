use crate::record::MemRef;

/// Records a thread collects before it has to flush.
pub const MAX_REFS: usize = 8192;

/// Fixed-capacity per-thread queue of raw references.
///
/// Only the owning thread touches it, so appends take no lock. The storage
/// is allocated once and reused after every flush.
pub struct RefBuffer {
    slots: Box<[MemRef]>,
    cursor: usize,
}

impl RefBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_REFS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            slots: vec![MemRef::default(); capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    /// Stores `record` and returns `true` if the buffer is now full and must
    /// be flushed before the next append.
    #[inline(always)]
    pub fn append(&mut self, record: MemRef) -> bool {
        debug_assert!(self.cursor < self.slots.len(), "append to a full buffer");
        self.slots[self.cursor] = record;
        self.cursor += 1;
        self.cursor == self.slots.len()
    }

    /// Buffered records, oldest first.
    pub fn records(&self) -> &[MemRef] {
        &self.slots[..self.cursor]
    }

    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_full(&self) -> bool {
        self.cursor == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Rewinds the cursor and clears the used slots.
    pub fn reset(&mut self) {
        self.slots[..self.cursor].fill(MemRef::default());
        self.cursor = 0;
    }
}

impl Default for RefBuffer {
    fn default() -> Self {
        Self::new()
    }
}
