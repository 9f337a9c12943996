//! The `Module` capability interface shared by every peripheral and tuner.
//!
//! Drivers implement this trait and register a constructor with the
//! [`ModuleRegistry`][crate::registry::ModuleRegistry].  The rest of the
//! system only ever talks to the trait, so the transport behind a module
//! (process invocation, register write, bus transaction) stays private to the
//! driver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tunekit_types::TuneError;

/// Snapshot of a module's metrics, keyed by metric name.
pub type ModuleStatus = BTreeMap<String, f64>;

/// Free-form calibration request passed to [`Module::calibrate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl CalibrationConfig {
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// A peripheral subsystem: accelerator, sensor, actuator, or clock/voltage
/// tuner.
///
/// Methods take `&self`.  Implementations synchronise their own device state
/// so that [`emergency_stop`][Module::emergency_stop] can be delivered while
/// another thread is inside [`set_parameter`][Module::set_parameter].
pub trait Module: Send + Sync {
    /// Stable identifier, e.g. `"pi_firmware"` or `"thermal_sensor"`.
    fn id(&self) -> &str;

    /// Names of the parameters this module accepts in `set_parameter`.
    fn parameters(&self) -> Vec<String> {
        Vec::new()
    }

    /// Read the module's current metrics.
    ///
    /// # Errors
    ///
    /// Returns [`TuneError::DeviceFault`] when the telemetry read fails.
    fn status(&self) -> Result<ModuleStatus, TuneError>;

    /// Write `value` to the parameter `name`.  Writes are one-shot: the
    /// caller never retries a failed call.
    ///
    /// # Errors
    ///
    /// Returns [`TuneError::DeviceFault`] if the device rejects the write.
    fn set_parameter(&self, name: &str, value: f64) -> Result<(), TuneError>;

    /// Halt the device.  Must be idempotent and must not block on an
    /// in-flight `set_parameter`.
    fn emergency_stop(&self);

    /// Apply a calibration.
    ///
    /// # Errors
    ///
    /// Returns [`TuneError::DeviceFault`] if calibration cannot be applied.
    fn calibrate(&self, config: &CalibrationConfig) -> Result<(), TuneError>;

    /// Bring the device back from a stop.  The default does nothing.
    fn reset(&self) -> Result<(), TuneError> {
        Ok(())
    }
}
