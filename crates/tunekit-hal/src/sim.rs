//! In-process simulation modules for CI/CD testing without physical hardware.
//!
//! [`SimRegistry`] builds a [`ModuleRegistry`] whose every slot is backed by a
//! simulated module that records commands and returns plausible readings.
//! This lets the full TuneKit stack run in headless tests, CI pipelines, and
//! dry runs of the CLI without touching a clock or voltage line.
//!
//! Every simulated module shares a [`SimProbe`] of call counters so tests can
//! assert that a declined operation never reached a device.
//!
//! # Example
//!
//! ```rust
//! use tunekit_hal::registry::WriteMode;
//! use tunekit_hal::sim::SimRegistry;
//! use tunekit_types::PlatformProfile;
//!
//! let rig = SimRegistry::builder()
//!     .with_platform_tuner(PlatformProfile::RaspberryPi)
//!     .with_sensor("thermal_sensor", "temperature_c", 45.0)
//!     .with_actuator("cooling_fan")
//!     .depends_on("cooling_fan", "thermal_sensor")
//!     .build(PlatformProfile::RaspberryPi);
//!
//! rig.registry
//!     .write("pi_firmware", "arm_freq", 1500.0, WriteMode::Normal)
//!     .expect("sim write must succeed");
//! assert_eq!(rig.tuner("pi_firmware").unwrap().value("arm_freq"), Some(1500.0));
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tunekit_types::{PlatformProfile, TuneError};

use crate::backend::TunerBackend;
use crate::module::{CalibrationConfig, Module, ModuleStatus};
use crate::registry::ModuleRegistry;

// ────────────────────────────────────────────────────────────────────────────
// Probe
// ────────────────────────────────────────────────────────────────────────────

/// Counts every call made into a simulated module.
#[derive(Debug, Default)]
pub struct SimProbe {
    pub status_reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub stops: AtomicUsize,
    pub calibrations: AtomicUsize,
    pub resets: AtomicUsize,
}

impl SimProbe {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Sum of every counted call.
    pub fn total_calls(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
            + self.writes.load(Ordering::SeqCst)
            + self.stops.load(Ordering::SeqCst)
            + self.calibrations.load(Ordering::SeqCst)
            + self.resets.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn fault(module: &str, details: impl Into<String>) -> TuneError {
    TuneError::DeviceFault {
        module: module.to_string(),
        details: details.into(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated tuner
// ────────────────────────────────────────────────────────────────────────────

/// A simulated clock/voltage tuner that records the last value written to
/// each of its parameters.
pub struct SimTuner {
    id: String,
    values: Mutex<BTreeMap<String, f64>>,
    fail_writes: AtomicBool,
    stopped: AtomicBool,
    probe: Arc<SimProbe>,
}

impl SimTuner {
    pub fn new(id: impl Into<String>, parameters: &[&str]) -> Self {
        Self {
            id: id.into(),
            values: Mutex::new(parameters.iter().map(|p| (p.to_string(), 0.0)).collect()),
            fail_writes: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            probe: Arc::new(SimProbe::default()),
        }
    }

    pub fn probe(&self) -> &Arc<SimProbe> {
        &self.probe
    }

    /// Make every subsequent `set_parameter` fail with a device fault.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn value(&self, parameter: &str) -> Option<f64> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(parameter)
            .copied()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Module for SimTuner {
    fn id(&self) -> &str {
        &self.id
    }

    fn parameters(&self) -> Vec<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn status(&self) -> Result<ModuleStatus, TuneError> {
        bump(&self.probe.status_reads);
        Ok(self.values.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set_parameter(&self, name: &str, value: f64) -> Result<(), TuneError> {
        bump(&self.probe.writes);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(fault(&self.id, format!("simulated write failure on '{name}'")));
        }
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        match values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(fault(&self.id, format!("no control line '{name}'"))),
        }
    }

    fn emergency_stop(&self) {
        bump(&self.probe.stops);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn calibrate(&self, _config: &CalibrationConfig) -> Result<(), TuneError> {
        bump(&self.probe.calibrations);
        Ok(())
    }

    fn reset(&self) -> Result<(), TuneError> {
        bump(&self.probe.resets);
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated sensor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated sensor reporting one metric whose reading tests can set.
///
/// Calibration accepts an `offset` added to every subsequent reading.
pub struct SimSensor {
    id: String,
    metric: String,
    reading: Mutex<f64>,
    offset: Mutex<f64>,
    fail_reads: AtomicBool,
    stopped: AtomicBool,
    probe: Arc<SimProbe>,
}

impl SimSensor {
    pub fn new(id: impl Into<String>, metric: impl Into<String>, reading: f64) -> Self {
        Self {
            id: id.into(),
            metric: metric.into(),
            reading: Mutex::new(reading),
            offset: Mutex::new(0.0),
            fail_reads: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            probe: Arc::new(SimProbe::default()),
        }
    }

    pub fn probe(&self) -> &Arc<SimProbe> {
        &self.probe
    }

    pub fn set_reading(&self, value: f64) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Make every subsequent `status` fail with a device fault.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Module for SimSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn parameters(&self) -> Vec<String> {
        vec!["sample_rate_hz".to_string()]
    }

    fn status(&self) -> Result<ModuleStatus, TuneError> {
        bump(&self.probe.status_reads);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(fault(&self.id, "simulated telemetry read failure"));
        }
        let reading = *self.reading.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ModuleStatus::from([(self.metric.clone(), reading + offset)]))
    }

    fn set_parameter(&self, _name: &str, value: f64) -> Result<(), TuneError> {
        bump(&self.probe.writes);
        if value <= 0.0 {
            return Err(fault(&self.id, format!("sample rate {value} must be positive")));
        }
        Ok(())
    }

    fn emergency_stop(&self) {
        bump(&self.probe.stops);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn calibrate(&self, config: &CalibrationConfig) -> Result<(), TuneError> {
        bump(&self.probe.calibrations);
        if let Some(offset) = config.parameters.get("offset") {
            *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = *offset;
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), TuneError> {
        bump(&self.probe.resets);
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated actuator
// ────────────────────────────────────────────────────────────────────────────

/// A simulated actuator (fan, servo, pump) driven by a `duty` parameter.
/// An emergency stop de-energises it (duty 0).
pub struct SimActuator {
    id: String,
    duty: Mutex<f64>,
    probe: Arc<SimProbe>,
}

impl SimActuator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            duty: Mutex::new(0.0),
            probe: Arc::new(SimProbe::default()),
        }
    }

    pub fn probe(&self) -> &Arc<SimProbe> {
        &self.probe
    }

    pub fn duty(&self) -> f64 {
        *self.duty.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Module for SimActuator {
    fn id(&self) -> &str {
        &self.id
    }

    fn parameters(&self) -> Vec<String> {
        vec!["duty".to_string()]
    }

    fn status(&self) -> Result<ModuleStatus, TuneError> {
        bump(&self.probe.status_reads);
        Ok(ModuleStatus::from([("duty".to_string(), self.duty())]))
    }

    fn set_parameter(&self, _name: &str, value: f64) -> Result<(), TuneError> {
        bump(&self.probe.writes);
        if !(0.0..=1.0).contains(&value) {
            return Err(fault(&self.id, format!("duty {value} out of [0, 1]")));
        }
        *self.duty.lock().unwrap_or_else(PoisonError::into_inner) = value;
        Ok(())
    }

    fn emergency_stop(&self) {
        bump(&self.probe.stops);
        *self.duty.lock().unwrap_or_else(PoisonError::into_inner) = 0.0;
    }

    fn calibrate(&self, _config: &CalibrationConfig) -> Result<(), TuneError> {
        bump(&self.probe.calibrations);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRegistry builder
// ────────────────────────────────────────────────────────────────────────────

/// A [`ModuleRegistry`] backed by simulated modules, plus direct handles to
/// each simulated device for inspection.
pub struct SimRig {
    pub registry: Arc<ModuleRegistry>,
    tuners: BTreeMap<String, Arc<SimTuner>>,
    sensors: BTreeMap<String, Arc<SimSensor>>,
    actuators: BTreeMap<String, Arc<SimActuator>>,
}

impl SimRig {
    pub fn tuner(&self, id: &str) -> Option<&Arc<SimTuner>> {
        self.tuners.get(id)
    }

    pub fn sensor(&self, id: &str) -> Option<&Arc<SimSensor>> {
        self.sensors.get(id)
    }

    pub fn actuator(&self, id: &str) -> Option<&Arc<SimActuator>> {
        self.actuators.get(id)
    }

    /// Calls made into every simulated device combined.
    pub fn total_calls(&self) -> usize {
        self.tuners.values().map(|t| t.probe().total_calls()).sum::<usize>()
            + self.sensors.values().map(|s| s.probe().total_calls()).sum::<usize>()
            + self.actuators.values().map(|a| a.probe().total_calls()).sum::<usize>()
    }
}

/// Builder for a [`SimRig`].
#[derive(Default)]
pub struct SimRegistry {
    tuners: Vec<(String, Vec<&'static str>)>,
    sensors: Vec<(String, String, f64)>,
    actuators: Vec<String>,
    dependencies: Vec<(String, String)>,
    failing: Vec<String>,
}

impl SimRegistry {
    pub fn builder() -> Self {
        Self::default()
    }

    /// Add the tuner module the platform's [`TunerBackend`] routes to.  A
    /// no-op for platforms without a backend.
    pub fn with_platform_tuner(mut self, profile: PlatformProfile) -> Self {
        if let Some(backend) = TunerBackend::for_profile(profile) {
            self.tuners
                .push((backend.module_name().to_string(), backend.parameters()));
        }
        self
    }

    pub fn with_tuner(mut self, id: impl Into<String>, parameters: &[&'static str]) -> Self {
        self.tuners.push((id.into(), parameters.to_vec()));
        self
    }

    pub fn with_sensor(mut self, id: impl Into<String>, metric: impl Into<String>, reading: f64) -> Self {
        self.sensors.push((id.into(), metric.into(), reading));
        self
    }

    pub fn with_actuator(mut self, id: impl Into<String>) -> Self {
        self.actuators.push(id.into());
        self
    }

    pub fn depends_on(mut self, dependent: impl Into<String>, source: impl Into<String>) -> Self {
        self.dependencies.push((dependent.into(), source.into()));
        self
    }

    /// Register `id` with a constructor that always fails.
    pub fn with_failing(mut self, id: impl Into<String>) -> Self {
        self.failing.push(id.into());
        self
    }

    pub fn build(self, profile: PlatformProfile) -> SimRig {
        let mut builder = ModuleRegistry::builder();
        let mut tuners = BTreeMap::new();
        let mut sensors = BTreeMap::new();
        let mut actuators = BTreeMap::new();

        for (id, params) in self.tuners {
            let tuner = Arc::new(SimTuner::new(id.clone(), &params));
            let device = Arc::clone(&tuner);
            builder = builder.with_module(id.clone(), move |_| Ok(Arc::clone(&device) as Arc<dyn Module>));
            tuners.insert(id, tuner);
        }
        for (id, metric, reading) in self.sensors {
            let sensor = Arc::new(SimSensor::new(id.clone(), metric, reading));
            let device = Arc::clone(&sensor);
            builder = builder.with_module(id.clone(), move |_| Ok(Arc::clone(&device) as Arc<dyn Module>));
            sensors.insert(id, sensor);
        }
        for id in self.actuators {
            let actuator = Arc::new(SimActuator::new(id.clone()));
            let device = Arc::clone(&actuator);
            builder = builder.with_module(id.clone(), move |_| Ok(Arc::clone(&device) as Arc<dyn Module>));
            actuators.insert(id, actuator);
        }
        for id in self.failing {
            let name = id.clone();
            builder = builder.with_module(id, move |_| {
                Err(TuneError::ModuleUnavailable(format!("simulated construction failure for '{name}'")))
            });
        }
        for (dependent, source) in self.dependencies {
            builder = builder.depends_on(dependent, source);
        }

        SimRig {
            registry: Arc::new(builder.build(profile)),
            tuners,
            sensors,
            actuators,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WriteMode;
    use tunekit_types::ModuleState;

    #[test]
    fn platform_tuner_uses_backend_module_name() {
        let rig = SimRegistry::builder()
            .with_platform_tuner(PlatformProfile::JetsonOrin)
            .build(PlatformProfile::JetsonOrin);
        let tuner = rig.tuner("tegra_dvfs").expect("tegra tuner registered");
        assert_eq!(tuner.value("gpu_max_freq"), Some(0.0));
        assert_eq!(tuner.value("arm_freq"), None);
    }

    #[test]
    fn cloud_vm_gets_no_platform_tuner() {
        let rig = SimRegistry::builder()
            .with_platform_tuner(PlatformProfile::CloudVm)
            .build(PlatformProfile::CloudVm);
        assert!(rig.registry.names().is_empty());
    }

    #[test]
    fn sim_tuner_injected_failure_faults_module() {
        let rig = SimRegistry::builder()
            .with_tuner("pi_firmware", &["arm_freq"])
            .build(PlatformProfile::RaspberryPi);
        rig.tuner("pi_firmware").unwrap().set_fail_writes(true);

        let result = rig.registry.write("pi_firmware", "arm_freq", 1800.0, WriteMode::Normal);
        assert!(matches!(result, Err(TuneError::DeviceFault { .. })));
        assert_eq!(rig.registry.state("pi_firmware"), Some(ModuleState::Faulted));
    }

    #[test]
    fn sensor_reading_and_calibration_offset() {
        let rig = SimRegistry::builder()
            .with_sensor("thermal_sensor", "temperature_c", 40.0)
            .build(PlatformProfile::RaspberryPi);
        let sensor = rig.sensor("thermal_sensor").unwrap();

        sensor.set_reading(50.0);
        rig.registry
            .calibrate("thermal_sensor", &CalibrationConfig::default().with("offset", -2.0))
            .unwrap();
        let status = rig.registry.status("thermal_sensor").unwrap();
        assert_eq!(status["temperature_c"], 48.0);
        assert_eq!(rig.registry.state("thermal_sensor"), Some(ModuleState::Active));
    }

    #[test]
    fn actuator_stop_de_energises() {
        let rig = SimRegistry::builder()
            .with_actuator("cooling_fan")
            .build(PlatformProfile::RaspberryPi);
        rig.registry.write("cooling_fan", "duty", 0.8, WriteMode::Normal).unwrap();
        assert!(rig.registry.emergency_stop("cooling_fan"));
        assert_eq!(rig.actuator("cooling_fan").unwrap().duty(), 0.0);
    }

    #[test]
    fn failing_constructor_is_unavailable_not_fatal() {
        let rig = SimRegistry::builder()
            .with_failing("fpga_accel")
            .with_actuator("servo")
            .build(PlatformProfile::X86Workstation);
        assert_eq!(rig.registry.names(), vec!["fpga_accel".to_string(), "servo".to_string()]);
        assert!(rig.registry.handle("fpga_accel").is_none());
        assert!(rig.registry.handle("servo").is_some());
    }

    #[test]
    fn total_calls_counts_every_device() {
        let rig = SimRegistry::builder()
            .with_tuner("t", &["x"])
            .with_sensor("s", "m", 1.0)
            .build(PlatformProfile::RaspberryPi);
        assert_eq!(rig.total_calls(), 0);
        rig.registry.status("s").unwrap();
        rig.registry.write("t", "x", 1.0, WriteMode::Normal).unwrap();
        assert_eq!(rig.total_calls(), 2);
    }
}
