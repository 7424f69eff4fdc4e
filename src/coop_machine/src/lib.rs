//! Simulation of the single-processor machine the cooperative kernel runs on.
//!
//! The machine provides three things:
//!
//!  - A **tick clock**. Time is simulated and only advances when the interrupt
//!    line goes from disabled to enabled; each such transition costs
//!    [`KERNEL_TICK`] ticks.
//!
//!  - An **interrupt controller** ([`Interrupt`]) with a single global
//!    enable flag. Pending interrupts are delivered in due-time order on every
//!    tick, with the line disabled.
//!
//!  - A **periodic timer** ([`Timer`]) that raises an interrupt every
//!    [`MachineConfig::timer_ticks`] ticks and calls the installed handler.
//!
//! Kernel threads are backed by host threads managed by [`ums::ThreadGroup`],
//! which guarantees that only one of them runs at a time.
//!
//! # Halting
//!
//! [`Machine::halt`] stops the machine. After that the interrupt line no
//! longer ticks, and every worker waiting for the processor is unwound.
//! [`Machine::run`] returns once all workers are gone.
use spin::Mutex as SpinMutex;
use std::{
    cmp::Reverse,
    collections::{binary_heap::PeekMut, BinaryHeap},
    fmt,
    sync::Arc,
};
use thiserror::Error;

mod interrupt;
mod timer;
pub mod ums;

pub use self::{interrupt::Interrupt, timer::Timer, ums::WorkerId};


/// The number of ticks charged for each disabled→enabled transition of the
/// interrupt line.
pub const KERNEL_TICK: u64 = 10;

/// The default period of the timer interrupt.
pub const DEFAULT_TIMER_TICKS: u64 = 500;

/// Callback invoked on every timer interrupt, with the interrupt line
/// disabled.
pub type TimerHandler = Arc<dyn Fn() + Send + Sync>;

/// Static properties of a [`Machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// The period of the timer interrupt, measured in ticks. Must be nonzero.
    pub timer_ticks: u64,
    /// Halt the machine with [`HaltError::TickLimitExceeded`] when the clock
    /// goes past this value.
    pub max_ticks: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            timer_ticks: DEFAULT_TIMER_TICKS,
            max_ticks: None,
        }
    }
}

/// Counters maintained by the machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// The current value of the clock.
    pub total_ticks: u64,
    /// The number of timer interrupts delivered so far.
    pub timer_interrupts: u64,
    /// The number of context switches between two different workers.
    pub context_switches: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Ticks: total {}, timer interrupts {}, context switches {}",
            self.total_ticks, self.timer_interrupts, self.context_switches
        )
    }
}

/// Abnormal termination of [`Machine::run`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltError {
    #[error("the machine ran past its tick limit ({limit} ticks)")]
    TickLimitExceeded { limit: u64 },
}

/// Interrupt sources known to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptLine {
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingInterrupt {
    time: u64,
    /// Breaks ties between interrupts due at the same time (FIFO).
    seq: u64,
    line: InterruptLine,
}

struct MachineState {
    /// The interrupt line's enable flag.
    enabled: bool,
    stats: Stats,
    pending: BinaryHeap<Reverse<PendingInterrupt>>,
    next_seq: u64,
    halt: Option<Result<(), HaltError>>,
}

/// A simulated single-processor machine.
pub struct Machine {
    config: MachineConfig,
    state: SpinMutex<MachineState>,
    timer_handler: SpinMutex<Option<TimerHandler>>,
    ums: ums::ThreadGroup,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut st = f.debug_struct("Machine");
        st.field("config", &self.config);
        match self.state.try_lock() {
            Some(state) => st
                .field("enabled", &state.enabled)
                .field("stats", &state.stats)
                .field("halt", &state.halt),
            None => st.field("state", &"< locked >"),
        };
        st.field("ums", &self.ums).finish()
    }
}

impl Machine {
    /// Power on a machine. The interrupt line starts disabled and the first
    /// timer interrupt is scheduled one period from now.
    ///
    /// # Panics
    ///
    /// Panics if `config.timer_ticks` is zero.
    pub fn new(config: MachineConfig) -> Self {
        assert_ne!(config.timer_ticks, 0, "the timer period must be nonzero");

        let this = Self {
            config,
            state: SpinMutex::new(MachineState {
                enabled: false,
                stats: Stats::default(),
                pending: BinaryHeap::new(),
                next_seq: 0,
                halt: None,
            }),
            timer_handler: SpinMutex::new(None),
            ums: ums::ThreadGroup::new(),
        };
        this.schedule(config.timer_ticks, InterruptLine::Timer);
        this
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Get the interrupt controller.
    pub fn interrupt(&self) -> Interrupt<'_> {
        Interrupt::new(self)
    }

    /// Get the timer.
    pub fn timer(&self) -> Timer<'_> {
        Timer::new(self)
    }

    /// Get the thread group backing the simulated threads.
    pub fn ums(&self) -> &ums::ThreadGroup {
        &self.ums
    }

    pub fn stats(&self) -> Stats {
        self.state.lock().stats
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halt.is_some()
    }

    /// Schedule an interrupt on `line`, `delay` ticks from now.
    pub fn schedule(&self, delay: u64, line: InterruptLine) {
        let mut state = self.state.lock();
        let time = state.stats.total_ticks.saturating_add(delay);
        let seq = state.next_seq;
        state.next_seq += 1;
        log::trace!("scheduling {line:?} at {time}");
        state
            .pending
            .push(Reverse(PendingInterrupt { time, seq, line }));
    }

    /// Switch the processor from worker `from` (the caller) to `to`, counting
    /// it as a context switch if they differ. Returns when `from` is scheduled
    /// again.
    pub fn context_switch(&self, from: WorkerId, to: WorkerId) {
        if from != to {
            self.state.lock().stats.context_switches += 1;
        }
        self.ums.switch_to(from, to);
    }

    /// Switch the processor from worker `from` (the caller) to `to`. The
    /// caller must return from its entry point without touching the machine
    /// again.
    pub fn exit_and_switch(&self, from: WorkerId, to: WorkerId) {
        self.state.lock().stats.context_switches += 1;
        self.ums.exit_and_switch(from, to);
    }

    /// Stop the machine. Does nothing if it's already halted.
    pub fn halt(&self) {
        self.halt_with(Ok(()));
    }

    fn halt_with(&self, outcome: Result<(), HaltError>) {
        {
            let mut state = self.state.lock();
            if state.halt.is_some() {
                return;
            }
            log::debug!(
                "halting at tick {} ({:?})",
                state.stats.total_ticks,
                outcome
            );
            state.halt = Some(outcome);
        }
        self.ums.shutdown();
    }

    /// Boot the machine by scheduling `first` and wait until it halts.
    ///
    /// A panic raised by any worker is propagated to the caller.
    pub fn run(&self, first: WorkerId) -> Result<Stats, HaltError> {
        self.ums.start(first);

        if let Err(payload) = self.ums.join() {
            std::panic::resume_unwind(payload);
        }

        let state = self.state.lock();
        match state.halt {
            Some(Err(e)) => Err(e),
            _ => Ok(state.stats),
        }
    }

    /// Update the interrupt line's enable flag, returning the old value. A
    /// disabled→enabled transition advances the clock and delivers due
    /// interrupts.
    fn set_status(&self, enabled: bool) -> bool {
        let mut state = self.state.lock();
        let old = std::mem::replace(&mut state.enabled, enabled);

        if old || !enabled || state.halt.is_some() {
            return old;
        }

        // Deliver interrupts with the line disabled
        state.enabled = false;
        drop(state);

        self.tick();

        self.state.lock().enabled = true;
        old
    }

    fn tick(&self) {
        let due = {
            let mut state = self.state.lock();
            state.stats.total_ticks += KERNEL_TICK;
            let now = state.stats.total_ticks;

            if let Some(limit) = self.config.max_ticks {
                if now > limit {
                    drop(state);
                    self.halt_with(Err(HaltError::TickLimitExceeded { limit }));
                    ums::abandon_current();
                }
            }

            let mut due = Vec::new();
            while let Some(top) = state.pending.peek_mut() {
                if top.0.time > now {
                    break;
                }
                due.push(PeekMut::pop(top).0.line);
            }

            for line in &due {
                match line {
                    InterruptLine::Timer => {
                        state.stats.timer_interrupts += 1;
                        let time = now + self.config.timer_ticks;
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.pending.push(Reverse(PendingInterrupt {
                            time,
                            seq,
                            line: InterruptLine::Timer,
                        }));
                    }
                }
            }

            due
        };

        for line in due {
            log::trace!("delivering {line:?} at {}", self.stats().total_ticks);
            match line {
                InterruptLine::Timer => {
                    let handler = self.timer_handler.lock().clone();
                    if let Some(handler) = handler {
                        handler();
                    }
                }
            }
        }
    }
}
