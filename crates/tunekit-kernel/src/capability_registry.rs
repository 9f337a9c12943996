//! [`CapabilityRegistry`] – which operations a platform supports, and within
//! what hardware bound.
//!
//! The table is static and derived solely from the
//! [`PlatformProfile`]; the registry performs no I/O.  Platforms without an
//! entry (cloud VMs, the generic fallback) map every operation to
//! `available = false`.
//!
//! | Platform | cpu_clock (MHz) | cpu_voltage (V) | gpu_clock (MHz) | power_limit (W) |
//! |---|---|---|---|---|
//! | raspberry_pi | 600–2000 | 0.8–1.4 | 250–750 | – |
//! | jetson_orin | 115–2201 | – | 306–1300 | 7–60 |
//! | x86_workstation | 800–5000 | 0.7–1.45 | – | 15–250 |
//! | cloud_vm, generic | – | – | – | – |
//!
//! # Example
//!
//! ```
//! use tunekit_kernel::capability_registry::CapabilityRegistry;
//! use tunekit_types::{Operation, PlatformProfile};
//!
//! let caps = CapabilityRegistry::new(PlatformProfile::RaspberryPi);
//! assert!(caps.descriptor(Operation::CpuVoltage).available);
//! assert!(!caps.descriptor(Operation::PowerLimit).available);
//! ```

use std::collections::BTreeMap;

use tunekit_types::{CapabilityDescriptor, Operation, PlatformProfile};

/// Operation → descriptor mapping for one platform.
pub type CapabilityTable = BTreeMap<Operation, CapabilityDescriptor>;

/// Hardware descriptor for `op` on `profile`.
fn hardware_descriptor(profile: PlatformProfile, op: Operation) -> CapabilityDescriptor {
    use Operation::*;
    use PlatformProfile::*;
    match (profile, op) {
        (RaspberryPi, CpuClock) => CapabilityDescriptor::supported(600.0, 2000.0),
        (RaspberryPi, CpuVoltage) => CapabilityDescriptor::supported(0.8, 1.4),
        (RaspberryPi, GpuClock) => CapabilityDescriptor::supported(250.0, 750.0),

        (JetsonOrin, CpuClock) => CapabilityDescriptor::supported(115.0, 2201.0),
        (JetsonOrin, GpuClock) => CapabilityDescriptor::supported(306.0, 1300.0),
        (JetsonOrin, PowerLimit) => CapabilityDescriptor::supported(7.0, 60.0),

        (X86Workstation, CpuClock) => CapabilityDescriptor::supported(800.0, 5000.0),
        (X86Workstation, CpuVoltage) => CapabilityDescriptor::supported(0.7, 1.45),
        (X86Workstation, PowerLimit) => CapabilityDescriptor::supported(15.0, 250.0),

        _ => CapabilityDescriptor::unavailable(),
    }
}

/// Full capability table for `profile`.  Pure with respect to its input.
pub fn capabilities_for(profile: PlatformProfile) -> CapabilityTable {
    Operation::ALL
        .into_iter()
        .map(|op| (op, hardware_descriptor(profile, op)))
        .collect()
}

/// Capability table derived once for the detected platform and shared
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    profile: PlatformProfile,
    table: CapabilityTable,
}

impl CapabilityRegistry {
    pub fn new(profile: PlatformProfile) -> Self {
        Self {
            profile,
            table: capabilities_for(profile),
        }
    }

    pub fn profile(&self) -> PlatformProfile {
        self.profile
    }

    /// Descriptor for `op`.  Operations missing from the table are reported
    /// unavailable.
    pub fn descriptor(&self, op: Operation) -> CapabilityDescriptor {
        self.table
            .get(&op)
            .copied()
            .unwrap_or_else(CapabilityDescriptor::unavailable)
    }

    pub fn available_operations(&self) -> Vec<Operation> {
        self.table
            .iter()
            .filter(|(_, d)| d.available)
            .map(|(op, _)| *op)
            .collect()
    }

    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_and_cloud_deny_everything() {
        for profile in [PlatformProfile::Generic, PlatformProfile::CloudVm] {
            let caps = CapabilityRegistry::new(profile);
            assert!(caps.available_operations().is_empty(), "{profile} must deny all");
            for op in Operation::ALL {
                assert_eq!(caps.descriptor(op), CapabilityDescriptor::unavailable());
            }
        }
    }

    #[test]
    fn every_platform_lists_every_operation() {
        for profile in PlatformProfile::ALL {
            assert_eq!(capabilities_for(profile).len(), Operation::ALL.len());
        }
    }

    #[test]
    fn raspberry_pi_voltage_bound() {
        let caps = CapabilityRegistry::new(PlatformProfile::RaspberryPi);
        let d = caps.descriptor(Operation::CpuVoltage);
        assert!(d.available);
        assert_eq!((d.min, d.max), (0.8, 1.4));
    }

    #[test]
    fn jetson_has_no_voltage_control() {
        let caps = CapabilityRegistry::new(PlatformProfile::JetsonOrin);
        assert!(!caps.descriptor(Operation::CpuVoltage).available);
        assert_eq!(
            caps.available_operations(),
            vec![Operation::CpuClock, Operation::GpuClock, Operation::PowerLimit]
        );
    }

    #[test]
    fn available_bounds_are_well_formed() {
        for profile in PlatformProfile::ALL {
            for (op, d) in capabilities_for(profile) {
                if d.available {
                    assert!(d.min < d.max, "{profile}/{op} bound inverted");
                }
            }
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(
            capabilities_for(PlatformProfile::X86Workstation),
            capabilities_for(PlatformProfile::X86Workstation)
        );
    }
}
