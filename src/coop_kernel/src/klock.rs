//! Critical sections
//!
//! On the single simulated processor, disabling interrupts is all it takes to
//! keep every other thread off the shared state.
use core::fmt;
use spin::{Mutex as SpinMutex, MutexGuard as SpinMutexGuard};
use std::thread;

use crate::PortInterrupts;

/// RAII guard for an interrupt-disabled section.
///
/// Dropping the guard restores the interrupt state observed when the guard
/// was created, so guards nest correctly.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct InterruptGuard<'a, P: PortInterrupts + ?Sized> {
    port: &'a P,
    enabled: bool,
}

impl<'a, P: PortInterrupts + ?Sized> InterruptGuard<'a, P> {
    /// Disable interrupts.
    pub fn new(port: &'a P) -> Self {
        let enabled = port.disable_interrupts();
        Self { port, enabled }
    }

    /// Get whether interrupts were enabled when this guard was created.
    pub fn was_enabled(&self) -> bool {
        self.enabled
    }
}

impl<P: PortInterrupts + ?Sized> Drop for InterruptGuard<'_, P> {
    fn drop(&mut self) {
        // Restoring might tick the clock and deliver interrupts, which we don't
        // want while the stack is being torn down
        if thread::panicking() {
            return;
        }
        self.port.restore_interrupts(self.enabled);
    }
}

impl<P: PortInterrupts + ?Sized> fmt::Debug for InterruptGuard<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InterruptGuard")
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Cell type for state that may only be mutated with interrupts disabled.
///
/// `SpinMutex` is sufficient here because only one host thread is allowed to
/// run at any point of time. It's only used to detect reentrancy.
pub struct IntCell<T: ?Sized>(SpinMutex<T>);

/// Mutable borrow of an [`IntCell`]'s contents.
pub type IntCellRefMut<'a, T> = SpinMutexGuard<'a, T>;

impl<T> IntCell<T> {
    pub const fn new(x: T) -> Self {
        Self(SpinMutex::new(x))
    }

    pub fn into_inner(self) -> T {
        self.0.into_inner()
    }
}

impl<T: ?Sized> IntCell<T> {
    /// Borrow the contents mutably.
    ///
    /// # Panics
    ///
    /// Panics if interrupts are enabled or the cell is already borrowed.
    pub fn borrow_mut<P: PortInterrupts + ?Sized>(&self, port: &P) -> IntCellRefMut<'_, T> {
        assert!(
            port.are_interrupts_disabled(),
            "interrupts must be disabled to access the kernel state"
        );
        self.try_borrow()
    }

    /// Inspect the contents without entering a critical section. This is
    /// fine as long as the closure doesn't suspend the current thread.
    ///
    /// # Panics
    ///
    /// Panics if the cell is already borrowed.
    pub fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.try_borrow())
    }

    fn try_borrow(&self) -> IntCellRefMut<'_, T> {
        match self.0.try_lock() {
            Some(guard) => guard,
            None => panic!("reentrant access to the kernel state"),
        }
    }
}

impl<T: Default> Default for IntCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for IntCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.try_lock() {
            Some(x) => {
                f.write_str("IntCell(")?;
                (*x).fmt(f)?;
                f.write_str(")")
            }
            None => f.write_str("IntCell(< borrowed >)"),
        }
    }
}
