//! Mutual-exclusion lock
use std::{collections::VecDeque, fmt};

use crate::{
    klock::{IntCell, InterruptGuard},
    KernelLock, Port,
};

/// A non-reentrant mutual-exclusion lock.
///
/// Waiting threads are granted the lock in FIFO order. The lock is handed
/// directly to the next waiter on release, so a thread that comes along in
/// the meantime can't barge in.
pub struct Lock<P: Port> {
    port: P,
    st: IntCell<LockState<P::ThreadId>>,
}

#[derive(Debug)]
struct LockState<ThreadId> {
    holder: Option<ThreadId>,
    wait_queue: VecDeque<ThreadId>,
}

impl<P: Port> fmt::Debug for Lock<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Lock")
            .field("st", &self.st)
            .finish_non_exhaustive()
    }
}

impl<P: Port> Lock<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            st: IntCell::new(LockState {
                holder: None,
                wait_queue: VecDeque::new(),
            }),
        }
    }

    /// Acquire the lock, sleeping until it's available.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds the lock.
    pub fn acquire(&self) {
        assert!(
            !self.is_held_by_current_thread(),
            "the lock is already held by the current thread"
        );

        let _guard = InterruptGuard::new(&self.port);
        let me = self.port.current_thread();

        let must_wait = {
            let mut st = self.st.borrow_mut(&self.port);
            if st.holder.is_some() {
                st.wait_queue.push_back(me);
                true
            } else {
                st.holder = Some(me);
                false
            }
        };

        if must_wait {
            log::trace!("{me:?} waits for a lock");
            // `release` hands the lock over to us before waking us up
            self.port.sleep_current();
        }

        debug_assert_eq!(self.st.borrow_mut(&self.port).holder, Some(me));
    }

    /// Release the lock and pass it to the oldest waiter, if any.
    ///
    /// # Panics
    ///
    /// Panics if the current thread doesn't hold the lock.
    pub fn release(&self) {
        assert!(
            self.is_held_by_current_thread(),
            "the lock is not held by the current thread"
        );

        let _guard = InterruptGuard::new(&self.port);

        let next = {
            let mut st = self.st.borrow_mut(&self.port);
            st.holder = st.wait_queue.pop_front();
            st.holder
        };

        if let Some(next) = next {
            log::trace!("handing a lock over to {next:?}");
            self.port.ready(next);
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let me = self.port.current_thread();
        self.st.read_with(|st| st.holder == Some(me))
    }

    /// Get the number of threads waiting for the lock.
    pub fn waiter_count(&self) -> usize {
        self.st.read_with(|st| st.wait_queue.len())
    }
}

impl<P: Port> KernelLock for Lock<P> {
    fn acquire(&self) {
        Lock::acquire(self)
    }

    fn release(&self) {
        Lock::release(self)
    }

    fn is_held_by_current_thread(&self) -> bool {
        Lock::is_held_by_current_thread(self)
    }
}
