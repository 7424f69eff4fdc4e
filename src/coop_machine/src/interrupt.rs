use crate::Machine;

/// The interrupt controller of a [`Machine`].
///
/// There's a single global enable flag. Enabling interrupts when they were
/// disabled advances the clock by [`KERNEL_TICK`](crate::KERNEL_TICK) ticks
/// and delivers every interrupt that has become due.
#[derive(Debug, Clone, Copy)]
pub struct Interrupt<'a> {
    machine: &'a Machine,
}

impl<'a> Interrupt<'a> {
    pub(crate) fn new(machine: &'a Machine) -> Self {
        Self { machine }
    }

    /// Disable interrupts and return the previous enable flag.
    pub fn disable(self) -> bool {
        self.machine.set_status(false)
    }

    /// Restore the enable flag returned by [`Self::disable`].
    ///
    /// After the machine has halted, this only records the flag.
    pub fn restore(self, enabled: bool) {
        self.machine.set_status(enabled);
    }

    /// Enable interrupts.
    pub fn enable(self) {
        self.machine.set_status(true);
    }

    pub fn is_enabled(self) -> bool {
        self.machine.state.lock().enabled
    }

    pub fn is_disabled(self) -> bool {
        !self.is_enabled()
    }
}
