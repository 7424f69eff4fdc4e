//! A cooperative kernel running on a simulated single-processor machine.
//!
//! The kernel provides threads ([`KThread`]), a mutual-exclusion lock
//! ([`Lock`]), timed sleep ([`Alarm`]) and condition variables
//! ([`Condition2`]).
//!
//! There's no hardware atomic operation to build upon. The only
//! concurrency-control primitive is disabling interrupts, which keeps every
//! other thread from running on the single processor. All shared scheduling
//! and wait-queue state is mutated inside interrupt-disabled sections.
//!
//! # Example
//!
//! ```
//! use coop_kernel::{KernelConfig, ThreadedKernel};
//!
//! let (waited, _stats) = ThreadedKernel::run(KernelConfig::default(), |tk| {
//!     let start = tk.kernel().machine().timer().time();
//!     tk.alarm().wait_until(1000);
//!     tk.kernel().machine().timer().time() - start
//! })
//! .unwrap();
//!
//! assert!(waited >= 1000);
//! ```
//!
//! # Modules
//!
//! [`Alarm`], [`Condition2`] and [`Lock`] are generic over [`Port`], the
//! interface to the thread runtime, interrupt controller and clock.
//! [`Kernel`] is the production implementation of `Port`.
pub mod alarm;
pub mod condition;
pub mod config;
pub mod error;
pub mod kernel;
pub mod klock;
pub mod lock;
pub mod port;
pub mod selftest;
pub mod thread;


pub use self::{
    alarm::{Alarm, WakeRequest},
    condition::Condition2,
    config::KernelConfig,
    error::{ConfigError, HaltError, KernelError},
    kernel::ThreadedKernel,
    lock::Lock,
    port::{KernelLock, Port, PortInterrupts, PortThreading, PortTimer, TimerHandler},
    thread::{
        KThread, Kernel, Priority, SchedulerKind, ThreadBuilder, ThreadId, ThreadSt,
        DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY,
    },
};
pub use coop_machine::{MachineConfig, Stats};
