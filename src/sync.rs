//! Basic synchronization primitives.
//!
//! Re-exports the lock and atomic types used throughout the linker so that
//! low-level modules can depend on this without caring about the backing
//! implementation, plus the per-thread identity used by the class monitors.

pub use std::sync::{
    atomic::{
        AtomicBool, AtomicPtr, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering,
    },
    Arc, OnceLock,
};

pub use parking_lot::{
    Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Cached linker thread ID for the current thread.
    static LINKER_THREAD_ID: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

/// Get the current thread's linker ID, assigning one on first use.
///
/// IDs are process-unique and never zero; zero is reserved for "no thread"
/// in the per-class owner slots.
pub fn current_thread_id() -> u64 {
    LINKER_THREAD_ID.with(|id| {
        let cached = id.get();
        if cached != 0 {
            return cached;
        }
        let fresh = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        id.set(fresh);
        fresh
    })
}

#[cfg(test)]
mod tests {
    use super::current_thread_id;

    #[test]
    fn test_thread_ids_are_stable_and_distinct() {
        let here = current_thread_id();
        assert_ne!(here, 0);
        assert_eq!(here, current_thread_id());

        let other = std::thread::spawn(current_thread_id)
            .join()
            .expect("spawned thread panicked");
        assert_ne!(other, 0);
        assert_ne!(other, here);
    }
}
