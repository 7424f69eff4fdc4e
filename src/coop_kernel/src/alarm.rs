//! Timed sleep
use std::{
    fmt, mem,
    sync::{Arc, Weak},
};

use crate::{
    klock::{IntCell, InterruptGuard},
    Port,
};


/// A thread's pending timed sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeRequest<ThreadId> {
    pub thread: ThreadId,
    /// The absolute time at which `thread` becomes eligible for running.
    pub wake_time: u64,
}

/// Lets threads sleep until a given amount of time has passed.
///
/// The alarm is driven by the periodic timer interrupt. On every timer
/// interrupt, every thread whose deadline has passed is made ready, and then
/// the current thread yields the processor. A thread thus becomes ready at the
/// first timer interrupt after its deadline.
pub struct Alarm<P: Port> {
    port: P,
    /// The pending sleeps, in no particular order.
    sleep_queue: IntCell<Vec<WakeRequest<P::ThreadId>>>,
}

impl<P: Port> fmt::Debug for Alarm<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Alarm")
            .field("sleep_queue", &self.sleep_queue)
            .finish_non_exhaustive()
    }
}

impl<P: Port> Alarm<P> {
    /// Construct an `Alarm` and install it as the timer interrupt handler,
    /// replacing any previous handler.
    pub fn new(port: P) -> Arc<Self> {
        let this = Arc::new(Self {
            port,
            sleep_queue: IntCell::new(Vec::new()),
        });

        let weak: Weak<Self> = Arc::downgrade(&this);
        this.port.set_timer_handler(Arc::new(move || {
            if let Some(this) = weak.upgrade() {
                this.timer_interrupt();
            }
        }));

        this
    }

    /// Put the current thread to sleep for at least `x` ticks.
    ///
    /// The thread is made ready by the first timer interrupt at or after
    /// `now + x`. Returns immediately if `x` is not positive.
    pub fn wait_until(&self, x: i64) {
        if x <= 0 {
            return;
        }

        let wake_time = self.port.time().saturating_add(x.unsigned_abs());

        // Enqueueing and going to sleep must happen in one critical section.
        // Otherwise the timer could fire in between, and the wakeup would be
        // lost.
        let _guard = InterruptGuard::new(&self.port);

        let thread = self.port.current_thread();
        log::trace!("{thread:?} sleeps until {wake_time}");
        self.sleep_queue
            .borrow_mut(&self.port)
            .push(WakeRequest { thread, wake_time });

        self.port.sleep_current();
    }

    /// The timer interrupt handler.
    fn timer_interrupt(&self) {
        let now = self.port.time();

        {
            let _guard = InterruptGuard::new(&self.port);

            let due = {
                let mut sleep_queue = self.sleep_queue.borrow_mut(&self.port);
                let (due, pending): (Vec<_>, Vec<_>) = mem::take(&mut *sleep_queue)
                    .into_iter()
                    .partition(|req| req.wake_time <= now);
                *sleep_queue = pending;
                due
            };

            for req in due {
                log::trace!("waking up {:?} at {now}", req.thread);
                self.port.ready(req.thread);
            }
        }

        self.port.yield_current();
    }

    /// Get a snapshot of the pending sleeps.
    pub fn pending(&self) -> Vec<WakeRequest<P::ThreadId>> {
        self.sleep_queue.read_with(|q| q.clone())
    }
}
