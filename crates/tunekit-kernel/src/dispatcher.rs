//! [`ControlDispatcher`] – single interception point between a tuning request
//! and the hardware.
//!
//! Every request passes through [`ControlDispatcher::set_operation`], which
//! applies the same gate to every operation, in order:
//!
//! 1. **Capability** ([`CapabilityRegistry`]): the platform must support the
//!    operation, else `Declined(CapabilityUnavailable)` (or
//!    `Declined(PlatformUnknown)` on the generic fallback).
//! 2. **Policy** ([`SafetyPolicy`]): the value must lie inside the effective
//!    bound, else `Declined(PolicyViolation)`.
//! 3. **Routing** ([`TunerBackend`]): the platform's backend names the module
//!    and parameter; an absent or stopped module gives
//!    `Declined(ModuleUnavailable)`.
//! 4. **Write**: forwarded once under the module's line lock.  Never retried.
//!    A device error gives `Declined(DeviceFault)`.
//!
//! No module method is invoked unless steps 1–3 pass.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tunekit_hal::sim::SimRegistry;
//! use tunekit_kernel::{CapabilityRegistry, ControlDispatcher, SafetyPolicy};
//! use tunekit_types::{DeclineReason, Operation, PlatformProfile};
//!
//! let profile = PlatformProfile::RaspberryPi;
//! let caps = Arc::new(CapabilityRegistry::new(profile));
//! let policy = SafetyPolicy::for_platform(&caps).unwrap();
//! let rig = SimRegistry::builder().with_platform_tuner(profile).build(profile);
//! let dispatcher = ControlDispatcher::new(caps, policy, Arc::clone(&rig.registry));
//!
//! assert!(dispatcher.set_operation(Operation::CpuVoltage, 1.3).is_applied());
//! assert_eq!(
//!     dispatcher.set_operation(Operation::CpuVoltage, 1.5).reason(),
//!     Some(DeclineReason::PolicyViolation)
//! );
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};
use tunekit_hal::backend::TunerBackend;
use tunekit_hal::registry::{ModuleRegistry, WriteMode};
use tunekit_types::{OpOutcome, Operation, TuneError};

use crate::capability_registry::CapabilityRegistry;
use crate::safety_policy::{PolicyLayer, SafetyPolicy};

// ─────────────────────────────────────────────────────────────────────────────
// Baselines
// ─────────────────────────────────────────────────────────────────────────────

/// Documented baseline value for each tunable operation.  Every experiment
/// ends by writing these back.
#[derive(Debug, Clone, PartialEq)]
pub struct Baselines {
    values: BTreeMap<Operation, f64>,
}

impl Default for Baselines {
    fn default() -> Self {
        Self {
            values: BTreeMap::from([
                (Operation::CpuClock, 1500.0),
                (Operation::CpuVoltage, 1.2),
                (Operation::GpuClock, 500.0),
                (Operation::PowerLimit, 30.0),
            ]),
        }
    }
}

impl Baselines {
    pub fn get(&self, op: Operation) -> Option<f64> {
        self.values.get(&op).copied()
    }

    pub fn set(&mut self, op: Operation, value: f64) {
        self.values.insert(op, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Operation, f64)> + '_ {
        self.values.iter().map(|(op, v)| (*op, *v))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlDispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Routes tuning requests through capability and policy gates to the module
/// owning the control line.
pub struct ControlDispatcher {
    capabilities: Arc<CapabilityRegistry>,
    policy: SafetyPolicy,
    registry: Arc<ModuleRegistry>,
    backend: Option<TunerBackend>,
}

impl ControlDispatcher {
    /// The tuner backend is selected here, once, from the capability
    /// registry's platform.
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        policy: SafetyPolicy,
        registry: Arc<ModuleRegistry>,
    ) -> Self {
        let backend = TunerBackend::for_profile(capabilities.profile());
        Self {
            capabilities,
            policy,
            registry,
            backend,
        }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Tighten the live policy.  See [`SafetyPolicy::narrow`].
    ///
    /// The narrowed policy is committed only if every baseline still lies
    /// inside its effective bound; on error the live policy is unchanged.
    pub fn narrow_policy(&mut self, layer: PolicyLayer, baselines: &Baselines) -> Result<(), TuneError> {
        let mut candidate = self.policy.clone();
        candidate.narrow(layer)?;
        check_baselines(&self.capabilities, &candidate, baselines)?;
        self.policy = candidate;
        Ok(())
    }

    /// Apply `value` to `op`.  One-shot: a failed write is reported, never
    /// retried.
    #[instrument(skip(self), fields(platform = %self.capabilities.profile()))]
    pub fn set_operation(&self, op: Operation, value: f64) -> OpOutcome {
        let outcome = self.gate(op, value).and_then(|(module, param)| {
            self.registry.write(module, param, value, WriteMode::Normal)
        });
        match outcome {
            Ok(()) => {
                info!(%op, value, "operation applied");
                OpOutcome::Applied
            }
            Err(e) => {
                warn!(%op, value, reason = %e.reason(), error = %e, "operation declined");
                OpOutcome::from(e)
            }
        }
    }

    /// Steps 1–3: capability, policy, routing.  Touches no module.
    fn gate(&self, op: Operation, value: f64) -> Result<(&'static str, &'static str), TuneError> {
        if !self.capabilities.descriptor(op).available {
            if self.capabilities.profile().is_generic() {
                return Err(TuneError::PlatformUnknown);
            }
            return Err(TuneError::CapabilityUnavailable(op));
        }
        self.policy.check(op, value)?;
        let (module, param) = self.route(op)?;
        if self.registry.handle(module).is_none() {
            return Err(TuneError::ModuleUnavailable(format!(
                "module '{module}' for {op} is not available"
            )));
        }
        Ok((module, param))
    }

    fn route(&self, op: Operation) -> Result<(&'static str, &'static str), TuneError> {
        let backend = self.backend.ok_or_else(|| {
            TuneError::ModuleUnavailable(format!(
                "no tuner backend for platform {}",
                self.capabilities.profile()
            ))
        })?;
        let param = backend.parameter_for(op).ok_or_else(|| {
            TuneError::ModuleUnavailable(format!(
                "backend '{}' has no control line for {op}",
                backend.module_name()
            ))
        })?;
        Ok((backend.module_name(), param))
    }

    /// Write every available operation's baseline back to its module.
    ///
    /// Runs through [`WriteMode::Restore`], so stopped or faulted modules are
    /// still restored.  Operations without a baseline are skipped.
    pub fn restore_baseline(&self, baselines: &Baselines) -> Vec<(Operation, OpOutcome)> {
        let mut restored = Vec::new();
        for op in self.capabilities.available_operations() {
            let Some(value) = baselines.get(op) else {
                continue;
            };
            let result = self
                .policy
                .check(op, value)
                .and_then(|()| self.route(op))
                .and_then(|(module, param)| self.registry.write(module, param, value, WriteMode::Restore));
            let outcome = match result {
                Ok(()) => OpOutcome::Applied,
                Err(e) => {
                    warn!(%op, value, error = %e, "baseline restoration failed");
                    OpOutcome::from(e)
                }
            };
            restored.push((op, outcome));
        }
        info!(count = restored.len(), "baseline restored");
        restored
    }

    /// Ensure every available operation's baseline lies inside its effective
    /// bound.
    pub fn validate_baselines(&self, baselines: &Baselines) -> Result<(), TuneError> {
        check_baselines(&self.capabilities, &self.policy, baselines)
    }
}

fn check_baselines(
    capabilities: &CapabilityRegistry,
    policy: &SafetyPolicy,
    baselines: &Baselines,
) -> Result<(), TuneError> {
    for op in capabilities.available_operations() {
        let (Some(value), Some(bound)) = (baselines.get(op), policy.effective_bound(op)) else {
            continue;
        };
        if !bound.contains(value) {
            return Err(TuneError::PolicyConfig(format!(
                "baseline {op} = {value} is outside effective bound {bound}"
            )));
        }
    }
    Ok(())
}
