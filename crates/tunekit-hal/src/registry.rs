//! [`ModuleRegistry`] – owner of every peripheral module handle.
//!
//! Modules are constructed once at startup from a table of
//! [`ModuleConstructor`]s.  Construction is best-effort: a constructor that
//! fails (missing dependency, unreachable device) leaves an *unavailable* slot
//! behind and is logged, never fatal.  Every call against an unavailable or
//! unknown name answers [`TuneError::ModuleUnavailable`] without touching any
//! device.
//!
//! # Locking
//!
//! Each [`ModuleHandle`] carries a *line lock* held for the duration of every
//! write (`set_parameter`, `calibrate`, `reset`), so no two writers reach the
//! same device at once.  [`ModuleRegistry::emergency_stop`] never takes the
//! line lock: the stop goes straight to the device and is delivered even
//! while a write is in flight.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tunekit_hal::module::Module;
//! use tunekit_hal::registry::{ModuleRegistry, WriteMode};
//! use tunekit_hal::sim::SimTuner;
//! use tunekit_types::{ModuleState, PlatformProfile};
//!
//! let registry = ModuleRegistry::builder()
//!     .with_module("pi_firmware", |_| {
//!         Ok(Arc::new(SimTuner::new("pi_firmware", &["arm_freq"])) as Arc<dyn Module>)
//!     })
//!     .build(PlatformProfile::RaspberryPi);
//!
//! registry.write("pi_firmware", "arm_freq", 1500.0, WriteMode::Normal).unwrap();
//! assert_eq!(registry.state("pi_firmware"), Some(ModuleState::Active));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};
use tunekit_types::{ModuleState, PlatformProfile, TuneError};

use crate::module::{CalibrationConfig, Module, ModuleStatus};

/// Builds one module for the detected platform.
pub type ModuleConstructor =
    Box<dyn Fn(PlatformProfile) -> Result<Arc<dyn Module>, TuneError> + Send + Sync>;

/// How a write is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Regular tuning write.  Refused once the module is stopped or faulted.
    Normal,
    /// Baseline restoration.  Permitted from every state and never promotes
    /// the module to `Active`.
    Restore,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// ModuleHandle
// ─────────────────────────────────────────────────────────────────────────────

/// A constructed module plus its lifecycle state and line lock.
pub struct ModuleHandle {
    name: String,
    capabilities: BTreeSet<String>,
    state: Mutex<ModuleState>,
    line: Mutex<()>,
    device: Arc<dyn Module>,
}

impl ModuleHandle {
    fn new(name: String, device: Arc<dyn Module>) -> Self {
        Self {
            name,
            capabilities: device.parameters().into_iter().collect(),
            state: Mutex::new(ModuleState::Loaded),
            line: Mutex::new(()),
            device,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter names accepted by this module.  Empty means "unrestricted".
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub fn state(&self) -> ModuleState {
        *lock(&self.state)
    }

    pub fn status(&self) -> Result<ModuleStatus, TuneError> {
        self.device.status()
    }

    fn unavailable_in(&self, state: ModuleState) -> TuneError {
        TuneError::ModuleUnavailable(format!("module '{}' is {state}", self.name))
    }

    fn write(&self, param: &str, value: f64, mode: WriteMode) -> Result<(), TuneError> {
        if !self.capabilities.is_empty() && !self.capabilities.contains(param) {
            return Err(TuneError::ModuleUnavailable(format!(
                "module '{}' does not expose parameter '{param}'",
                self.name
            )));
        }

        let _line = lock(&self.line);
        let before = self.state();
        if mode == WriteMode::Normal && matches!(before, ModuleState::Stopped | ModuleState::Faulted)
        {
            return Err(self.unavailable_in(before));
        }

        match self.device.set_parameter(param, value) {
            Ok(()) => {
                if mode == WriteMode::Normal {
                    self.promote();
                }
                debug!(module = %self.name, param, value, ?mode, "write applied");
                Ok(())
            }
            Err(e) => {
                self.fault(&e);
                Err(e)
            }
        }
    }

    fn calibrate(&self, config: &CalibrationConfig) -> Result<(), TuneError> {
        let _line = lock(&self.line);
        let before = self.state();
        if matches!(before, ModuleState::Stopped | ModuleState::Faulted) {
            return Err(self.unavailable_in(before));
        }
        match self.device.calibrate(config) {
            Ok(()) => {
                self.promote();
                Ok(())
            }
            Err(e) => {
                self.fault(&e);
                Err(e)
            }
        }
    }

    fn reset(&self) -> Result<(), TuneError> {
        let _line = lock(&self.line);
        let before = self.state();
        if !matches!(before, ModuleState::Stopped | ModuleState::Faulted) {
            return Ok(());
        }
        self.device.reset()?;
        *lock(&self.state) = ModuleState::Loaded;
        info!(module = %self.name, from = %before, "module reset");
        Ok(())
    }

    /// Returns `true` only on the transition into `Stopped`.
    fn emergency_stop(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == ModuleState::Stopped {
                return false;
            }
            *state = ModuleState::Stopped;
        }
        self.device.emergency_stop();
        true
    }

    // Loaded → Active on the first successful operation.
    fn promote(&self) {
        let mut state = lock(&self.state);
        if *state == ModuleState::Loaded {
            *state = ModuleState::Active;
            info!(module = %self.name, "module active");
        }
    }

    // Any state except Stopped → Faulted on a device error.
    fn fault(&self, err: &TuneError) {
        let mut state = lock(&self.state);
        if *state != ModuleState::Stopped {
            *state = ModuleState::Faulted;
        }
        error!(module = %self.name, error = %err, "device fault");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

enum ModuleSlot {
    Ready(Arc<ModuleHandle>),
    Unavailable { reason: String },
}

/// Name-indexed table of module handles, resolved once at startup.
pub struct ModuleRegistry {
    slots: BTreeMap<String, ModuleSlot>,
    dependents: BTreeMap<String, Vec<String>>,
}

impl ModuleRegistry {
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::default()
    }

    /// The handle registered under `name`, or `None` when the module is
    /// unknown or failed construction.
    pub fn handle(&self, name: &str) -> Option<Arc<ModuleHandle>> {
        match self.slots.get(name) {
            Some(ModuleSlot::Ready(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    fn require(&self, name: &str) -> Result<Arc<ModuleHandle>, TuneError> {
        match self.slots.get(name) {
            Some(ModuleSlot::Ready(handle)) => Ok(Arc::clone(handle)),
            Some(ModuleSlot::Unavailable { reason }) => Err(TuneError::ModuleUnavailable(
                format!("module '{name}' failed construction: {reason}"),
            )),
            None => Err(TuneError::ModuleUnavailable(format!(
                "module '{name}' is not registered"
            ))),
        }
    }

    /// Every registered name, including unavailable ones, in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Names of modules that constructed successfully.
    pub fn available(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, ModuleSlot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.handle(name).map(|h| h.state())
    }

    pub fn status(&self, name: &str) -> Result<ModuleStatus, TuneError> {
        self.require(name)?.status()
    }

    /// Forward a write to `name` under its line lock.
    ///
    /// # Errors
    ///
    /// - [`TuneError::ModuleUnavailable`] – absent, stopped/faulted (for
    ///   [`WriteMode::Normal`]), or the parameter is not exposed.
    /// - [`TuneError::DeviceFault`] – the device rejected the write.
    pub fn write(
        &self,
        name: &str,
        param: &str,
        value: f64,
        mode: WriteMode,
    ) -> Result<(), TuneError> {
        self.require(name)?.write(param, value, mode)
    }

    pub fn calibrate(&self, name: &str, config: &CalibrationConfig) -> Result<(), TuneError> {
        self.require(name)?.calibrate(config)
    }

    /// Explicitly bring `name` out of `Stopped` or `Faulted`.
    pub fn reset(&self, name: &str) -> Result<(), TuneError> {
        self.require(name)?.reset()
    }

    /// Deliver an emergency stop to `name`, bypassing the line lock.
    ///
    /// Returns `true` when the module moved into `Stopped`, `false` when it
    /// was already stopped or is absent.
    pub fn emergency_stop(&self, name: &str) -> bool {
        match self.handle(name) {
            Some(handle) => {
                let stopped = handle.emergency_stop();
                if stopped {
                    warn!(module = name, "emergency stop delivered");
                }
                stopped
            }
            None => {
                debug!(module = name, "emergency stop on absent module ignored");
                false
            }
        }
    }

    /// Modules declared as depending directly on `name`.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Builder collecting constructors and dependency declarations.
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    constructors: BTreeMap<String, ModuleConstructor>,
    dependencies: Vec<(String, String)>,
}

impl ModuleRegistryBuilder {
    /// Register a constructor under `name`.  A later constructor with the
    /// same name replaces the earlier one, which is never run.
    pub fn with_module<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(PlatformProfile) -> Result<Arc<dyn Module>, TuneError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    /// Declare that `dependent` acts on the output of `source`: stopping
    /// `source` must also stop `dependent`.
    pub fn depends_on(mut self, dependent: impl Into<String>, source: impl Into<String>) -> Self {
        self.dependencies.push((dependent.into(), source.into()));
        self
    }

    /// Run every constructor for `profile`.  Never fails.
    pub fn build(self, profile: PlatformProfile) -> ModuleRegistry {
        let mut slots = BTreeMap::new();
        for (name, constructor) in self.constructors {
            let slot = match constructor(profile) {
                Ok(device) => {
                    info!(module = %name, platform = %profile, "module loaded");
                    ModuleSlot::Ready(Arc::new(ModuleHandle::new(name.clone(), device)))
                }
                Err(e) => {
                    warn!(module = %name, platform = %profile, error = %e, "module unavailable");
                    ModuleSlot::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
            slots.insert(name, slot);
        }

        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (dependent, source) in self.dependencies {
            let list = dependents.entry(source).or_default();
            if !list.contains(&dependent) {
                list.push(dependent);
            }
        }

        ModuleRegistry { slots, dependents }
    }
}
