//! Reentrant Connection Lock
//!
//! Serializes every section that calls into a foreign database engine on
//! behalf of one connection. The owning thread may re-acquire while it
//! already holds the lock (the namespace-change helper does exactly that
//! under an operation's hold); other threads block until the hold count
//! returns to zero.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

struct LockState {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Owner-tracking reentrant lock.
pub struct ReentrantLock {
    state: Mutex<LockState>,
    ready: Condvar,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Block until this thread holds the lock, then return a guard that
    /// releases one hold on drop.
    pub fn acquire(&self) -> LockGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(_) => self.ready.wait(&mut state),
            }
        }
        LockGuard { lock: self }
    }

    /// Current hold count. 0 means free, 2 means the owner re-entered.
    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    /// True when the calling thread holds the lock.
    pub fn held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    fn release(&self) {
        let mut state = self.state.lock();
        if state.depth > 1 {
            state.depth -= 1;
            return;
        }
        state.depth = 0;
        state.owner = None;
        drop(state);
        self.ready.notify_one();
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII hold on a [`ReentrantLock`].
pub struct LockGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
