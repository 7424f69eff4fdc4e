//! Kernel configuration
//!
//! The configuration is read from the `[kernel]` table of a TOML file. Every
//! key is optional.
//!
//! ```toml
//! [kernel]
//! scheduler = "priority"    # or "round_robin"
//! timer_ticks = 500
//! max_ticks = 10_000_000
//! ```
use coop_machine::{MachineConfig, DEFAULT_TIMER_TICKS};
use serde::Deserialize;
use std::{fs, path::Path};

use crate::{ConfigError, SchedulerKind};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    /// The ready queue implementation.
    pub scheduler: SchedulerKind,
    /// The period of the timer interrupt, in ticks.
    pub timer_ticks: u64,
    /// Halt with an error when the clock goes past this value.
    pub max_ticks: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            timer_ticks: DEFAULT_TIMER_TICKS,
            max_ticks: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    kernel: KernelConfig,
}

impl KernelConfig {
    /// Parse a configuration file's contents.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(s)?;
        file.kernel.validate()?;
        Ok(file.kernel)
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("loading the configuration from '{}'", path.display());
        let text = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_owned(),
            error,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_ticks == 0 {
            return Err(ConfigError::ZeroTimerTicks);
        }
        Ok(())
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            timer_ticks: self.timer_ticks,
            max_ticks: self.max_ticks,
        }
    }
}
