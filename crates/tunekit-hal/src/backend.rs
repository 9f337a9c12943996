//! [`TunerBackend`] – which module implements a tuning operation on each
//! platform.
//!
//! One backend variant exists per tunable platform and is selected once at
//! startup from the detected [`PlatformProfile`].  Each variant names the
//! module that owns the clock/voltage lines and the parameter that carries a
//! given [`Operation`] on that module.
//!
//! | Platform | Module | cpu_clock | cpu_voltage | gpu_clock | power_limit |
//! |---|---|---|---|---|---|
//! | raspberry_pi | `pi_firmware` | `arm_freq` | `over_voltage` | `gpu_freq` | – |
//! | jetson_orin | `tegra_dvfs` | `cpu_max_freq` | – | `gpu_max_freq` | `power_budget` |
//! | x86_workstation | `intel_pstate` | `max_perf_mhz` | `vcore` | – | `pl1_watts` |

use tunekit_types::{Operation, PlatformProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunerBackend {
    PiFirmware,
    TegraDvfs,
    IntelPstate,
}

impl TunerBackend {
    /// The backend for `profile`, or `None` for platforms with nothing to tune.
    pub fn for_profile(profile: PlatformProfile) -> Option<Self> {
        match profile {
            PlatformProfile::RaspberryPi => Some(TunerBackend::PiFirmware),
            PlatformProfile::JetsonOrin => Some(TunerBackend::TegraDvfs),
            PlatformProfile::X86Workstation => Some(TunerBackend::IntelPstate),
            PlatformProfile::CloudVm | PlatformProfile::Generic => None,
        }
    }

    /// Registry name of the module owning this backend's control lines.
    pub fn module_name(&self) -> &'static str {
        match self {
            TunerBackend::PiFirmware => "pi_firmware",
            TunerBackend::TegraDvfs => "tegra_dvfs",
            TunerBackend::IntelPstate => "intel_pstate",
        }
    }

    /// Module parameter carrying `op`, or `None` when this backend has no
    /// control line for it.
    pub fn parameter_for(&self, op: Operation) -> Option<&'static str> {
        use Operation::*;
        match (self, op) {
            (TunerBackend::PiFirmware, CpuClock) => Some("arm_freq"),
            (TunerBackend::PiFirmware, CpuVoltage) => Some("over_voltage"),
            (TunerBackend::PiFirmware, GpuClock) => Some("gpu_freq"),
            (TunerBackend::TegraDvfs, CpuClock) => Some("cpu_max_freq"),
            (TunerBackend::TegraDvfs, GpuClock) => Some("gpu_max_freq"),
            (TunerBackend::TegraDvfs, PowerLimit) => Some("power_budget"),
            (TunerBackend::IntelPstate, CpuClock) => Some("max_perf_mhz"),
            (TunerBackend::IntelPstate, CpuVoltage) => Some("vcore"),
            (TunerBackend::IntelPstate, PowerLimit) => Some("pl1_watts"),
            _ => None,
        }
    }

    /// Every parameter this backend's module exposes.
    pub fn parameters(&self) -> Vec<&'static str> {
        Operation::ALL
            .iter()
            .filter_map(|op| self.parameter_for(*op))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untunable_platforms_have_no_backend() {
        assert_eq!(TunerBackend::for_profile(PlatformProfile::CloudVm), None);
        assert_eq!(TunerBackend::for_profile(PlatformProfile::Generic), None);
    }

    #[test]
    fn pi_backend_routes_voltage_to_over_voltage() {
        let backend = TunerBackend::for_profile(PlatformProfile::RaspberryPi).unwrap();
        assert_eq!(backend.module_name(), "pi_firmware");
        assert_eq!(backend.parameter_for(Operation::CpuVoltage), Some("over_voltage"));
        assert_eq!(backend.parameter_for(Operation::PowerLimit), None);
    }

    #[test]
    fn backend_parameters_cover_routed_operations() {
        assert_eq!(
            TunerBackend::TegraDvfs.parameters(),
            vec!["cpu_max_freq", "gpu_max_freq", "power_budget"]
        );
    }
}
