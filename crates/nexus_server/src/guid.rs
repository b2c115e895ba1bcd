//! Process-wide entity identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a [`Guid`] refers to, carried in its low two bits.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum GuidKind {
    Player = 0,
    Creature = 1,
    Object = 2,
}

/// A 64-bit opaque entity identifier: a monotonic counter in the high bits
/// and a [`GuidKind`] tag in the low two. Never reused within an uptime.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(u64);

impl Guid {
    pub const fn kind(self) -> GuidKind {
        match self.0 & 0b11 {
            0 => GuidKind::Player,
            1 => GuidKind::Creature,
            _ => GuidKind::Object,
        }
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstructs a GUID from the wire. The value is opaque; whether it
    /// refers to anything is decided by the entity map it is looked up in.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn is_player(self) -> bool {
        matches!(self.kind(), GuidKind::Player)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({:#x}/{:?})", self.0 >> 2, self.kind())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// The single monotonic allocator behind every live GUID. Do not partition
/// it: uniqueness is process-wide.
pub struct GuidAllocator {
    next: AtomicU64,
}

impl GuidAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self, kind: GuidKind) -> Guid {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Guid(n << 2 | kind as u64)
    }
}

impl Default for GuidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
