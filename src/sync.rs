//! Global coordination lock serialising tracker and network state.

use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

/// Lock serialising all mutations to the tracker list, trackers, and
/// connection manager.
///
/// The lock is manually acquired and released rather than guard-scoped
/// because the DNS resolver must be able to drop it for the duration of a
/// blocking lookup and take it back afterwards. No tracker or connection
/// state may be mutated while the lock is released; across that window the
/// resolver only reads inputs passed by value and writes to its own cache.
pub struct GlobalLock {
    held: Mutex<bool>,
    released: Condvar,
    coordination_thread: ThreadId,
}

impl GlobalLock {
    /// Creates the lock, recording the calling thread as the coordination
    /// thread.
    pub fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
            coordination_thread: thread::current().id(),
        }
    }

    /// Blocks until the lock is free, then takes it.
    ///
    /// # Panics
    /// Panics if the underlying mutex is poisoned.
    pub fn acquire(&self) {
        let mut held = self.held.lock().expect("global lock poisoned");
        while *held {
            held = self.released.wait(held).expect("global lock poisoned");
        }
        *held = true;
    }

    /// Releases the lock taken by [`GlobalLock::acquire`].
    ///
    /// # Panics
    /// Panics if the underlying mutex is poisoned.
    pub fn release(&self) {
        *self.held.lock().expect("global lock poisoned") = false;
        self.released.notify_one();
    }

    /// Whether the calling thread is the coordination thread.
    pub fn is_coordination_thread(&self) -> bool {
        thread::current().id() == self.coordination_thread
    }
}

impl Default for GlobalLock {
    fn default() -> Self {
        Self::new()
    }
}
