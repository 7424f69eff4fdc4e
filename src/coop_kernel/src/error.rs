use std::{io, path::PathBuf};
use thiserror::Error;

use crate::thread::readyqueue::UnknownSchedulerError;

pub use coop_machine::HaltError;

/// Error type for loading and validating a [`KernelConfig`].
///
/// [`KernelConfig`]: crate::KernelConfig
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read the configuration file '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
    #[error("Could not parse the configuration")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    UnknownScheduler(#[from] UnknownSchedulerError),
    #[error("The timer period (`timer_ticks`) must be nonzero")]
    ZeroTimerTicks,
}

/// Error type for [`ThreadedKernel::run`].
///
/// [`ThreadedKernel::run`]: crate::ThreadedKernel::run
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Invalid kernel configuration")]
    Config(#[from] ConfigError),
    #[error("The machine halted abnormally")]
    Halt(#[from] HaltError),
    #[error("The machine was terminated before the main thread returned")]
    Terminated,
}
