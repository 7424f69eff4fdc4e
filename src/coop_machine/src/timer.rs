use crate::{Machine, TimerHandler};

/// The hardware timer of a [`Machine`].
#[derive(Debug, Clone, Copy)]
pub struct Timer<'a> {
    machine: &'a Machine,
}

impl<'a> Timer<'a> {
    pub(crate) fn new(machine: &'a Machine) -> Self {
        Self { machine }
    }

    /// Get the current value of the clock, in ticks.
    pub fn time(self) -> u64 {
        self.machine.state.lock().stats.total_ticks
    }

    /// Install the function called on every timer interrupt. Replaces the
    /// previously installed handler.
    pub fn set_interrupt_handler(self, handler: TimerHandler) {
        *self.machine.timer_handler.lock() = Some(handler);
    }

    /// Remove the installed handler. Timer interrupts are still counted.
    pub fn clear_interrupt_handler(self) {
        *self.machine.timer_handler.lock() = None;
    }

    /// Get the period of the timer interrupt.
    pub fn period(self) -> u64 {
        self.machine.config().timer_ticks
    }
}
