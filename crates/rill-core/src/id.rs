//! Identity types for the rill runtime
//!
//! Every identifier is a 64-bit integer handed out by an [`IdAllocator`].
//! Ids are never reused within one runtime, so a stale id simply fails
//! to resolve instead of aliasing a newer entity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reactive property identity - stable index into the property arena
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PropId(pub u64);

impl PropId {
    pub const ZERO: PropId = PropId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        PropId(id)
    }
}

impl fmt::Debug for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prop({})", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container token - identifies one state container instance.
///
/// Child edges and store observers are keyed by this token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContainerToken(pub u64);

impl ContainerToken {
    pub const ZERO: ContainerToken = ContainerToken(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        ContainerToken(id)
    }
}

impl fmt::Debug for ContainerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container({:04x})", self.0)
    }
}

impl fmt::Display for ContainerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Store identity (page or global)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StoreId(pub u64);

impl StoreId {
    #[inline]
    pub fn new(id: u64) -> Self {
        StoreId(id)
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store({})", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch bus node identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BusId(pub u64);

impl BusId {
    pub const ROOT: BusId = BusId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        BusId(id)
    }
}

impl fmt::Debug for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bus({})", self.0)
    }
}

/// Monotonic id source shared by everything one runtime creates.
///
/// Safe to use from the background discovery worker.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        // zero is reserved for the ZERO/ROOT constants
        IdAllocator {
            next: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn next_raw(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_prop(&self) -> PropId {
        PropId(self.next_raw())
    }

    pub fn next_container(&self) -> ContainerToken {
        ContainerToken(self.next_raw())
    }

    pub fn next_store(&self) -> StoreId {
        StoreId(self.next_raw())
    }

    pub fn next_bus(&self) -> BusId {
        BusId(self.next_raw())
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
