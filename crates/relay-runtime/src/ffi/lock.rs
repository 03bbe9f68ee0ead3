//! Execution lock
//!
//! One thread at a time runs host code. The lock is reentrant for its owner,
//! so a callback dispatched on the thread that made the foreign call
//! proceeds immediately. A blocking foreign call hands the lock back for the
//! duration of the native call so callbacks arriving on other native threads
//! can run.

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant, thread-owned lock serializing host code
#[derive(Debug, Default)]
pub struct ExecutionLock {
    state: Mutex<LockState>,
    available: Condvar,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire for the current thread, waiting while another thread owns it
    pub fn acquire(&self) -> ExecutionGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => self.available.wait(&mut state),
            }
        }
        ExecutionGuard { lock: self }
    }

    /// Fully release the lock if this thread owns it, until the region drops
    pub fn release_blocking(&self) -> BlockingRegion<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let saved_depth = if state.owner == Some(me) {
            let depth = state.depth;
            state.owner = None;
            state.depth = 0;
            self.available.notify_one();
            Some(depth)
        } else {
            None
        };
        BlockingRegion {
            lock: self,
            saved_depth,
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Recursion depth of the current owner, zero when free
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    fn release_one(&self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.available.notify_one();
        }
    }

    fn reacquire(&self, depth: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some() {
            self.available.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = depth;
    }
}

/// Holds one level of the execution lock
#[must_use]
pub struct ExecutionGuard<'a> {
    lock: &'a ExecutionLock,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_one();
    }
}

/// Lock handed back for a blocking native call; restored on drop
#[must_use]
pub struct BlockingRegion<'a> {
    lock: &'a ExecutionLock,
    saved_depth: Option<usize>,
}

impl Drop for BlockingRegion<'_> {
    fn drop(&mut self) {
        if let Some(depth) = self.saved_depth {
            self.lock.reacquire(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reentrant_for_owner() {
        let lock = ExecutionLock::new();
        let outer = lock.acquire();
        let inner = lock.acquire();
        assert_eq!(lock.depth(), 2);
        drop(inner);
        assert!(lock.is_held_by_current_thread());
        drop(outer);
        assert!(!lock.is_held_by_current_thread());
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_other_thread_waits() {
        let lock = Arc::new(ExecutionLock::new());
        let guard = lock.acquire();

        let (tx, rx) = mpsc::channel();
        let worker = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _guard = lock.acquire();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_blocking_region_hands_lock_over() {
        let lock = Arc::new(ExecutionLock::new());
        let _outer = lock.acquire();
        let _inner = lock.acquire();

        {
            let _region = lock.release_blocking();
            assert!(!lock.is_held_by_current_thread());

            let other = lock.clone();
            thread::spawn(move || {
                let _guard = other.acquire();
            })
            .join()
            .unwrap();
        }

        assert!(lock.is_held_by_current_thread());
        assert_eq!(lock.depth(), 2);
    }

    #[test]
    fn test_blocking_region_without_ownership_is_noop() {
        let lock = ExecutionLock::new();
        drop(lock.release_blocking());
        assert_eq!(lock.depth(), 0);
    }
}
