//! [`SafetyPolicy`] – layered bound checker.
//!
//! The policy is an ordered chain of [`PolicyLayer`]s folded left to right:
//!
//! 1. **Base** – nothing is permitted.
//! 2. **Platform override** – the static per-platform safety table.  It may
//!    only open operations the hardware supports, and never beyond the
//!    hardware bound.
//! 3. **Custom layers** – from configuration or [`SafetyPolicy::narrow`].
//!    Each may only tighten the bound left by the layers before it.
//!
//! Violating the tightening rule is a construction-time
//! [`TuneError::PolicyConfig`], never a runtime surprise.
//!
//! | Platform | cpu_clock | cpu_voltage | gpu_clock | power_limit |
//! |---|---|---|---|---|
//! | raspberry_pi | 600–1800 | 0.8–1.4 | 250–600 | – |
//! | jetson_orin | 115–2000 | – | 306–1100 | 7–40 |
//! | x86_workstation | 800–4500 | 0.7–1.35 | – | 15–200 |
//!
//! # Example
//!
//! ```
//! use tunekit_kernel::capability_registry::CapabilityRegistry;
//! use tunekit_kernel::safety_policy::{PolicyLayer, SafetyPolicy};
//! use tunekit_types::{Bound, Operation, PlatformProfile};
//!
//! let caps = CapabilityRegistry::new(PlatformProfile::RaspberryPi);
//! let policy = SafetyPolicy::for_platform(&caps)
//!     .unwrap()
//!     .with_layer(PolicyLayer::new("lab").rule(Operation::CpuClock, Bound::new(600.0, 1600.0)))
//!     .unwrap();
//!
//! assert!(policy.check(Operation::CpuClock, 1500.0).is_ok());
//! assert!(policy.check(Operation::CpuClock, 1700.0).is_err());
//!
//! // Loosening is rejected.
//! let loose = PolicyLayer::new("yolo").rule(Operation::CpuClock, Bound::new(600.0, 1900.0));
//! assert!(policy.clone().with_layer(loose).is_err());
//! ```

use std::collections::BTreeMap;

use tracing::info;
use tunekit_types::{Bound, Operation, PlatformProfile, TuneError};

use crate::capability_registry::{CapabilityRegistry, CapabilityTable};

/// One named set of per-operation safety rules.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyLayer {
    pub name: String,
    pub rules: BTreeMap<Operation, Bound>,
}

impl PolicyLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: BTreeMap::new(),
        }
    }

    pub fn rule(mut self, op: Operation, bound: Bound) -> Self {
        self.rules.insert(op, bound);
        self
    }
}

/// Static safety override for `profile`.  Empty for platforms without one.
pub fn platform_layer(profile: PlatformProfile) -> PolicyLayer {
    use Operation::*;
    let layer = PolicyLayer::new(format!("platform:{profile}"));
    match profile {
        PlatformProfile::RaspberryPi => layer
            .rule(CpuClock, Bound::new(600.0, 1800.0))
            .rule(CpuVoltage, Bound::new(0.8, 1.4))
            .rule(GpuClock, Bound::new(250.0, 600.0)),
        PlatformProfile::JetsonOrin => layer
            .rule(CpuClock, Bound::new(115.0, 2000.0))
            .rule(GpuClock, Bound::new(306.0, 1100.0))
            .rule(PowerLimit, Bound::new(7.0, 40.0)),
        PlatformProfile::X86Workstation => layer
            .rule(CpuClock, Bound::new(800.0, 4500.0))
            .rule(CpuVoltage, Bound::new(0.7, 1.35))
            .rule(PowerLimit, Bound::new(15.0, 200.0)),
        PlatformProfile::CloudVm | PlatformProfile::Generic => layer,
    }
}

/// The effective safety policy for one platform.
///
/// Constructed once at startup and handed to the dispatcher by value.  The
/// only mutation is [`narrow`][SafetyPolicy::narrow], which enforces the
/// tightening invariant and logs the change.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    hardware: CapabilityTable,
    platform: PolicyLayer,
    custom: Vec<PolicyLayer>,
    effective: BTreeMap<Operation, Bound>,
}

impl SafetyPolicy {
    /// Build the base and platform-override layers for `caps`' platform.
    ///
    /// # Errors
    ///
    /// [`TuneError::PolicyConfig`] if the platform table opens an operation
    /// the hardware lacks or exceeds a hardware bound.
    pub fn for_platform(caps: &CapabilityRegistry) -> Result<Self, TuneError> {
        Self::with_platform_layer(caps, platform_layer(caps.profile()))
    }

    /// Like [`for_platform`][Self::for_platform] with an explicit override
    /// layer in place of the static table.
    pub fn with_platform_layer(
        caps: &CapabilityRegistry,
        platform: PolicyLayer,
    ) -> Result<Self, TuneError> {
        let hardware = caps.table().clone();
        let mut effective = BTreeMap::new();
        for (op, bound) in &platform.rules {
            let hw = hardware
                .get(op)
                .and_then(|d| d.bound())
                .ok_or_else(|| {
                    TuneError::PolicyConfig(format!(
                        "layer '{}' permits {op}, which the hardware does not support",
                        platform.name
                    ))
                })?;
            if !bound.within(&hw) {
                return Err(TuneError::PolicyConfig(format!(
                    "layer '{}' sets {op} to {bound}, outside hardware bound {hw}",
                    platform.name
                )));
            }
            effective.insert(*op, *bound);
        }
        Ok(Self {
            hardware,
            platform,
            custom: Vec::new(),
            effective,
        })
    }

    /// Append a custom layer (builder form).
    ///
    /// # Errors
    ///
    /// [`TuneError::PolicyConfig`] if the layer loosens any bound.
    pub fn with_layer(mut self, layer: PolicyLayer) -> Result<Self, TuneError> {
        self.push_layer(layer)?;
        Ok(self)
    }

    /// Tighten the live policy with `layer`.  The change is logged; a layer
    /// that would loosen anything is rejected and the policy is unchanged.
    pub fn narrow(&mut self, layer: PolicyLayer) -> Result<(), TuneError> {
        let name = layer.name.clone();
        let ops: Vec<String> = layer.rules.keys().map(|op| op.to_string()).collect();
        self.push_layer(layer)?;
        info!(layer = %name, operations = ?ops, "safety policy narrowed");
        Ok(())
    }

    fn push_layer(&mut self, layer: PolicyLayer) -> Result<(), TuneError> {
        for (op, bound) in &layer.rules {
            let current = self.effective.get(op).ok_or_else(|| {
                TuneError::PolicyConfig(format!(
                    "layer '{}' names {op}, which earlier layers deny",
                    layer.name
                ))
            })?;
            if !bound.within(current) {
                return Err(TuneError::PolicyConfig(format!(
                    "layer '{}' loosens {op}: {bound} is not within {current}",
                    layer.name
                )));
            }
        }
        for (op, bound) in &layer.rules {
            self.effective.insert(*op, *bound);
        }
        self.custom.push(layer);
        Ok(())
    }

    /// The bound left after folding every layer, or `None` when `op` is
    /// denied.  Always within the hardware bound.
    pub fn effective_bound(&self, op: Operation) -> Option<Bound> {
        let hw = self.hardware.get(&op).and_then(|d| d.bound())?;
        self.effective.get(&op).and_then(|b| b.intersect(&hw))
    }

    /// Allow or deny `value` for `op`.
    ///
    /// # Errors
    ///
    /// [`TuneError::PolicyViolation`] when `op` is denied or `value` is
    /// outside (or not a finite number within) the effective bound.
    pub fn check(&self, op: Operation, value: f64) -> Result<(), TuneError> {
        match self.effective_bound(op) {
            Some(bound) if bound.contains(value) => Ok(()),
            Some(bound) => Err(TuneError::PolicyViolation {
                op,
                value,
                bound: bound.to_string(),
            }),
            None => Err(TuneError::PolicyViolation {
                op,
                value,
                bound: "none (denied)".to_string(),
            }),
        }
    }

    /// Layer names in fold order, starting with the base layer.
    pub fn layers(&self) -> Vec<String> {
        std::iter::once("base:deny-all".to_string())
            .chain(std::iter::once(self.platform.name.clone()))
            .chain(self.custom.iter().map(|l| l.name.clone()))
            .collect()
    }
}
