use crate::error::{LinkError, Result};
use crate::sync::{AtomicU64, AtomicUsize, Ordering};

/// Allocator currently in use by the heap collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    Movable,
    NonMovable,
}

/// Accounting token for a successful heap reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub size: usize,
    pub movable: bool,
}

/// The garbage-collected heap, seen from the linker's side.
///
/// The linker reserves space here before materializing class metadata and
/// static storage, so allocation failure surfaces as [`LinkError::OutOfMemory`]
/// before any metadata is published. Reservations are charged, never freed;
/// class metadata lives for the process lifetime.
pub trait Heap: Send + Sync {
    /// Reserve `size` bytes of movable object storage.
    fn allocate(&self, size: usize) -> Result<Reservation>;

    /// Reserve `size` bytes that will never move. Used for metadata that
    /// is pointed at before it carries a valid class pointer.
    fn allocate_non_movable(&self, size: usize) -> Result<Reservation>;

    fn allocator_kind(&self) -> AllocatorKind;
}

/// Plain malloc-backed heap: counts bytes against an optional capacity and
/// otherwise always succeeds. The default collaborator for tests and
/// diagnostics.
#[derive(Debug)]
pub struct MallocHeap {
    bytes_allocated: AtomicUsize,
    allocations: AtomicU64,
    capacity: usize,
}

impl MallocHeap {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// A heap that refuses reservations past `capacity` bytes, for
    /// exercising out-of-memory propagation.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes_allocated: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Acquire)
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Acquire)
    }

    fn reserve(&self, size: usize, movable: bool) -> Result<Reservation> {
        let prev = self.bytes_allocated.fetch_add(size, Ordering::AcqRel);
        if prev.saturating_add(size) > self.capacity {
            self.bytes_allocated.fetch_sub(size, Ordering::AcqRel);
            return Err(LinkError::OutOfMemory(size));
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(Reservation { size, movable })
    }
}

impl Default for MallocHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap for MallocHeap {
    fn allocate(&self, size: usize) -> Result<Reservation> {
        self.reserve(size, true)
    }

    fn allocate_non_movable(&self, size: usize) -> Result<Reservation> {
        self.reserve(size, false)
    }

    fn allocator_kind(&self) -> AllocatorKind {
        AllocatorKind::NonMovable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_limit_reports_out_of_memory() {
        let heap = MallocHeap::with_capacity(100);
        assert!(heap.allocate(60).is_ok());
        assert_eq!(heap.bytes_allocated(), 60);

        match heap.allocate(60) {
            Err(LinkError::OutOfMemory(60)) => {}
            other => panic!("expected out-of-memory, got {other:?}"),
        }
        // Failed reservations are not charged.
        assert_eq!(heap.bytes_allocated(), 60);
        assert!(heap.allocate_non_movable(40).is_ok());
        assert_eq!(heap.allocation_count(), 2);
    }
}
