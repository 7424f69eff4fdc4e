//! The interfaces through which the synchronization primitives reach the rest
//! of the system.
//!
//! [`Alarm`](crate::Alarm), [`Condition2`](crate::Condition2) and
//! [`Lock`](crate::Lock) only ever talk to the thread runtime, the interrupt
//! controller and the clock through these traits. [`Kernel`](crate::Kernel)
//! implements all of them on top of the simulated machine.
use core::fmt;

pub use coop_machine::TimerHandler;

/// Thread operations used by the synchronization primitives.
pub trait PortThreading: Clone + Send + Sync + 'static {
    /// A non-owning handle to a thread.
    type ThreadId: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Get the currently running thread.
    fn current_thread(&self) -> Self::ThreadId;

    /// Block the current thread until some other party calls
    /// [`Self::ready`] on it, and run another thread in the meantime.
    ///
    /// Interrupts must be disabled.
    fn sleep_current(&self);

    /// Make a blocked thread eligible for running. Does not run it.
    ///
    /// Interrupts must be disabled.
    fn ready(&self, thread: Self::ThreadId);

    /// Relinquish the processor to another ready thread, if any. The current
    /// thread stays ready.
    fn yield_current(&self);
}

/// The interrupt controller.
pub trait PortInterrupts {
    /// Disable interrupts and return whether they were enabled.
    fn disable_interrupts(&self) -> bool;

    /// Restore the state returned by [`Self::disable_interrupts`].
    fn restore_interrupts(&self, enabled: bool);

    fn are_interrupts_disabled(&self) -> bool;
}

/// The clock and the periodic timer.
pub trait PortTimer {
    /// Get the current time, in ticks.
    fn time(&self) -> u64;

    /// Install the function to call on every timer interrupt.
    fn set_timer_handler(&self, handler: TimerHandler);
}

/// Everything the synchronization primitives need.
pub trait Port: PortThreading + PortInterrupts + PortTimer {}

impl<T: PortThreading + PortInterrupts + PortTimer> Port for T {}

/// A mutual-exclusion lock usable as the associated lock of a
/// [`Condition2`](crate::Condition2).
pub trait KernelLock: Send + Sync {
    /// Acquire the lock, blocking the current thread while another thread
    /// holds it.
    fn acquire(&self);

    /// Release the lock, which must be held by the current thread.
    fn release(&self);

    fn is_held_by_current_thread(&self) -> bool;
}
