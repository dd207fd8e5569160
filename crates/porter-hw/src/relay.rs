//! Door relay control.
//!
//! The lock is a single relay line: `activate` energises it (door open),
//! `deactivate` releases it. Timing between the two belongs to the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to export GPIO {pin}: {source}")]
    Export {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to configure GPIO {pin}: {source}")]
    Configure {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to drive GPIO {pin}: {source}")]
    Drive {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
}

/// A two-state door actuator.
pub trait Actuator: Send + Sync {
    fn activate(&self) -> Result<(), RelayError>;
    fn deactivate(&self) -> Result<(), RelayError>;
    /// Human-readable description for logs and status.
    fn name(&self) -> String;
}

/// Relay wired to a GPIO line, driven through the sysfs interface.
pub struct GpioRelay {
    pin: u32,
    value_path: PathBuf,
    active_low: bool,
}

impl GpioRelay {
    /// Export `pin` (if needed) and configure it as an output, driven released.
    pub fn open(pin: u32, active_low: bool) -> Result<Self, RelayError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, active_low)
    }

    /// As [`open`](Self::open) but against an alternate sysfs root.
    pub fn open_at(root: &Path, pin: u32, active_low: bool) -> Result<Self, RelayError> {
        let line_dir = root.join(format!("gpio{pin}"));
        if !line_dir.exists() {
            fs::write(root.join("export"), pin.to_string())
                .map_err(|source| RelayError::Export { pin, source })?;
        }
        fs::write(line_dir.join("direction"), "out")
            .map_err(|source| RelayError::Configure { pin, source })?;

        let relay = Self {
            pin,
            value_path: line_dir.join("value"),
            active_low,
        };
        relay.deactivate()?;
        tracing::info!(pin, active_low, "GPIO relay ready");
        Ok(relay)
    }

    fn drive(&self, energised: bool) -> Result<(), RelayError> {
        let level = if energised != self.active_low { "1" } else { "0" };
        fs::write(&self.value_path, level).map_err(|source| RelayError::Drive {
            pin: self.pin,
            source,
        })
    }
}

impl Actuator for GpioRelay {
    fn activate(&self) -> Result<(), RelayError> {
        tracing::debug!(pin = self.pin, "relay on");
        self.drive(true)
    }

    fn deactivate(&self) -> Result<(), RelayError> {
        tracing::debug!(pin = self.pin, "relay off");
        self.drive(false)
    }

    fn name(&self) -> String {
        format!("gpio{}", self.pin)
    }
}

/// Development stand-in: logs instead of switching anything.
#[derive(Default)]
pub struct SimulatedRelay {
    activations: AtomicU64,
}

impl SimulatedRelay {
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::SeqCst)
    }
}

impl Actuator for SimulatedRelay {
    fn activate(&self) -> Result<(), RelayError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        tracing::info!("door unlock simulated");
        Ok(())
    }

    fn deactivate(&self) -> Result<(), RelayError> {
        tracing::info!("door lock simulated");
        Ok(())
    }

    fn name(&self) -> String {
        "simulated".into()
    }
}
