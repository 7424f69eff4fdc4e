//! Condition variables
use std::{collections::VecDeque, fmt, sync::Arc};

use crate::{
    klock::{IntCell, InterruptGuard},
    KernelLock, Lock, Port,
};


/// A condition variable implemented with interrupt disabling.
///
/// Every operation must be called with the associated lock (the *condition
/// lock*) held by the current thread. Waiters are woken in FIFO order.
pub struct Condition2<P: Port, L: KernelLock = Lock<P>> {
    port: P,
    condition_lock: Arc<L>,
    wait_queue: IntCell<VecDeque<P::ThreadId>>,
}

impl<P: Port, L: KernelLock> fmt::Debug for Condition2<P, L> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Condition2")
            .field("wait_queue", &self.wait_queue)
            .finish_non_exhaustive()
    }
}

impl<P: Port, L: KernelLock> Condition2<P, L> {
    /// Construct a condition variable associated with `condition_lock`.
    pub fn new(port: P, condition_lock: Arc<L>) -> Self {
        Self {
            port,
            condition_lock,
            wait_queue: IntCell::new(VecDeque::new()),
        }
    }

    pub fn condition_lock(&self) -> &Arc<L> {
        &self.condition_lock
    }

    fn expect_lock_held(&self) {
        assert!(
            self.condition_lock.is_held_by_current_thread(),
            "the condition lock is not held by the current thread"
        );
    }

    /// Atomically release the condition lock and go to sleep until another
    /// thread wakes us up with [`Self::wake`] or [`Self::wake_all`]. The
    /// condition lock is reacquired before returning.
    ///
    /// # Panics
    ///
    /// Panics if the current thread doesn't hold the condition lock.
    pub fn sleep(&self) {
        self.expect_lock_held();

        // No one may call `wake` between releasing the lock and going to
        // sleep
        let _guard = InterruptGuard::new(&self.port);

        let me = self.port.current_thread();
        log::trace!("{me:?} waits on a condition");
        self.wait_queue.borrow_mut(&self.port).push_back(me);

        self.condition_lock.release();
        self.port.sleep_current();
        self.condition_lock.acquire();
    }

    /// Wake up the oldest waiter, if any.
    ///
    /// # Panics
    ///
    /// Panics if the current thread doesn't hold the condition lock.
    pub fn wake(&self) {
        self.expect_lock_held();

        let _guard = InterruptGuard::new(&self.port);
        self.wake_one();
    }

    /// Wake up every waiter, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the current thread doesn't hold the condition lock.
    pub fn wake_all(&self) {
        self.expect_lock_held();

        let _guard = InterruptGuard::new(&self.port);
        while self.wake_one() {}
    }

    /// Ready the head of the wait queue. Returns `false` if the queue was
    /// empty.
    fn wake_one(&self) -> bool {
        let next = self.wait_queue.borrow_mut(&self.port).pop_front();
        match next {
            Some(thread) => {
                log::trace!("waking up {thread:?}");
                self.port.ready(thread);
                true
            }
            None => false,
        }
    }

    /// Get the number of threads sleeping on this condition variable.
    pub fn waiter_count(&self) -> usize {
        self.wait_queue.read_with(|q| q.len())
    }
}
