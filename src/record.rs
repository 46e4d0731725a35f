use serde::{Deserialize, Serialize};

/// Granularity at which addresses are deduplicated into the working set.
pub const CACHE_LINE_SIZE: u64 = 64;

const LINE_MASK: u64 = !(CACHE_LINE_SIZE - 1);

/// Clears the low bits of `address` so every byte of a cache line maps to
/// the same value.
#[inline(always)]
pub fn line_address(address: u64) -> u64 {
    address & LINE_MASK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccessKind {
    #[default]
    Read,
    Write,
}

impl AccessKind {
    pub fn from_is_write(is_write: bool) -> Self {
        if is_write {
            AccessKind::Write
        } else {
            AccessKind::Read
        }
    }

    pub fn is_write(self) -> bool {
        matches!(self, AccessKind::Write)
    }

    /// Single-character tag used in trace logs.
    pub fn as_char(self) -> char {
        match self {
            AccessKind::Read => 'R',
            AccessKind::Write => 'W',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'R' => Some(AccessKind::Read),
            'W' => Some(AccessKind::Write),
            _ => None,
        }
    }
}

/// One observed memory reference as reported by the instrumentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemRef {
    pub kind: AccessKind,
    pub address: u64,
    pub size: u32,
    pub instruction_pointer: u64,
}

impl MemRef {
    pub fn new(kind: AccessKind, address: u64, size: u32, instruction_pointer: u64) -> Self {
        Self {
            kind,
            address,
            size,
            instruction_pointer,
        }
    }

    pub fn read(address: u64, size: u32, instruction_pointer: u64) -> Self {
        Self::new(AccessKind::Read, address, size, instruction_pointer)
    }

    pub fn write(address: u64, size: u32, instruction_pointer: u64) -> Self {
        Self::new(AccessKind::Write, address, size, instruction_pointer)
    }

    pub fn line(&self) -> u64 {
        line_address(self.address)
    }

    /// Zero-byte accesses cannot come from a real load or store.
    pub fn is_well_formed(&self) -> bool {
        self.size > 0
    }
}
