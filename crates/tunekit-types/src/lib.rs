use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier assigned to the host after platform detection.
///
/// The set is closed; anything the detector cannot place is `Generic`, which
/// every downstream table treats as "nothing permitted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformProfile {
    RaspberryPi,
    JetsonOrin,
    X86Workstation,
    CloudVm,
    Generic,
}

impl PlatformProfile {
    pub const ALL: [PlatformProfile; 5] = [
        PlatformProfile::RaspberryPi,
        PlatformProfile::JetsonOrin,
        PlatformProfile::X86Workstation,
        PlatformProfile::CloudVm,
        PlatformProfile::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformProfile::RaspberryPi => "raspberry_pi",
            PlatformProfile::JetsonOrin => "jetson_orin",
            PlatformProfile::X86Workstation => "x86_workstation",
            PlatformProfile::CloudVm => "cloud_vm",
            PlatformProfile::Generic => "generic",
        }
    }

    /// `true` for the fallback profile produced when no signature matched.
    pub fn is_generic(&self) -> bool {
        matches!(self, PlatformProfile::Generic)
    }
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformProfile {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlatformProfile::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| TuneError::Config(format!("unknown platform profile '{s}'")))
    }
}

/// A tunable hardware operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// CPU core clock in MHz.
    CpuClock,
    /// CPU core voltage in volts.
    CpuVoltage,
    /// GPU core clock in MHz.
    GpuClock,
    /// Package power limit in watts.
    PowerLimit,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::CpuClock,
        Operation::CpuVoltage,
        Operation::GpuClock,
        Operation::PowerLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CpuClock => "cpu_clock",
            Operation::CpuVoltage => "cpu_voltage",
            Operation::GpuClock => "gpu_clock",
            Operation::PowerLimit => "power_limit",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Operation::CpuClock | Operation::GpuClock => "MHz",
            Operation::CpuVoltage => "V",
            Operation::PowerLimit => "W",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| TuneError::Config(format!("unknown operation '{s}'")))
    }
}

/// Inclusive numeric range `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `true` when `value` is finite and lies inside the range.
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// `true` when every value of `self` is also inside `outer`.
    pub fn within(&self, outer: &Bound) -> bool {
        self.min <= self.max && self.min >= outer.min && self.max <= outer.max
    }

    /// Overlap of two ranges, or `None` when they are disjoint.
    pub fn intersect(&self, other: &Bound) -> Option<Bound> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min <= max).then_some(Bound { min, max })
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Per-operation availability and hardware bound for a given platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub available: bool,
    pub min: f64,
    pub max: f64,
}

impl CapabilityDescriptor {
    pub const fn supported(min: f64, max: f64) -> Self {
        Self {
            available: true,
            min,
            max,
        }
    }

    pub const fn unavailable() -> Self {
        Self {
            available: false,
            min: 0.0,
            max: 0.0,
        }
    }

    /// The hardware bound, or `None` when the operation is unavailable.
    pub fn bound(&self) -> Option<Bound> {
        self.available.then_some(Bound::new(self.min, self.max))
    }
}

/// Lifecycle state of a peripheral module handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Unloaded,
    /// Construction succeeded; no operation has run yet.
    Loaded,
    /// At least one operation succeeded.
    Active,
    /// The device reported an error.
    Faulted,
    /// Emergency-stopped.  Terminal until an explicit reset.
    Stopped,
}

impl ModuleState {
    /// `Stopped` stays put until an explicit reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModuleState::Stopped)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::Loaded => "loaded",
            ModuleState::Active => "active",
            ModuleState::Faulted => "faulted",
            ModuleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why an operation was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclineReason {
    PlatformUnknown,
    CapabilityUnavailable,
    PolicyViolation,
    ModuleUnavailable,
    DeviceFault,
    EmergencyTriggered,
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeclineReason::PlatformUnknown => "PlatformUnknown",
            DeclineReason::CapabilityUnavailable => "CapabilityUnavailable",
            DeclineReason::PolicyViolation => "PolicyViolation",
            DeclineReason::ModuleUnavailable => "ModuleUnavailable",
            DeclineReason::DeviceFault => "DeviceFault",
            DeclineReason::EmergencyTriggered => "EmergencyTriggered",
        };
        f.write_str(s)
    }
}

/// Result of a single tuning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OpOutcome {
    Applied,
    Declined { reason: DeclineReason, detail: String },
}

impl OpOutcome {
    pub fn declined(reason: DeclineReason, detail: impl Into<String>) -> Self {
        OpOutcome::Declined {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, OpOutcome::Applied)
    }

    pub fn reason(&self) -> Option<DeclineReason> {
        match self {
            OpOutcome::Applied => None,
            OpOutcome::Declined { reason, .. } => Some(*reason),
        }
    }
}

impl From<TuneError> for OpOutcome {
    fn from(err: TuneError) -> Self {
        OpOutcome::declined(err.reason(), err.to_string())
    }
}

/// Record of one emergency cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// The module whose reading breached its limit, or `"operator"`.
    pub source: String,
    pub reason: String,
    /// Every module moved into `Stopped` by this event, in stop order.
    pub affected: Vec<String>,
}

impl EmergencyEvent {
    pub fn new(source: impl Into<String>, reason: impl Into<String>, affected: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            reason: reason.into(),
            affected,
        }
    }
}

/// One telemetry reading from a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub module: String,
    pub metric: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn new(module: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            module: module.into(),
            metric: metric.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Error type shared by every TuneKit crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TuneError {
    #[error("Platform unknown: no signature matched")]
    PlatformUnknown,

    #[error("Capability unavailable: {0} is not supported on this platform")]
    CapabilityUnavailable(Operation),

    #[error("Policy violation: {op} = {value} outside effective bound {bound}")]
    PolicyViolation {
        op: Operation,
        value: f64,
        bound: String,
    },

    #[error("Module unavailable: {0}")]
    ModuleUnavailable(String),

    #[error("Device fault on {module}: {details}")]
    DeviceFault { module: String, details: String },

    #[error("Emergency triggered by {0}")]
    EmergencyTriggered(String),

    #[error("Invalid safety policy: {0}")]
    PolicyConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TuneError {
    /// Map the error onto the declined-operation vocabulary.
    ///
    /// Setup errors (`PolicyConfig`, `Config`) mean the configured limits
    /// cannot be honoured, so an operation they block is reported as a
    /// policy decline.
    pub fn reason(&self) -> DeclineReason {
        match self {
            TuneError::PlatformUnknown => DeclineReason::PlatformUnknown,
            TuneError::CapabilityUnavailable(_) => DeclineReason::CapabilityUnavailable,
            TuneError::PolicyViolation { .. } | TuneError::PolicyConfig(_) | TuneError::Config(_) => {
                DeclineReason::PolicyViolation
            }
            TuneError::ModuleUnavailable(_) => DeclineReason::ModuleUnavailable,
            TuneError::DeviceFault { .. } => DeclineReason::DeviceFault,
            TuneError::EmergencyTriggered(_) => DeclineReason::EmergencyTriggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_profile_parses_snake_case_ids() {
        assert_eq!(
            "raspberry_pi".parse::<PlatformProfile>().unwrap(),
            PlatformProfile::RaspberryPi
        );
        assert_eq!(
            "cloud_vm".parse::<PlatformProfile>().unwrap(),
            PlatformProfile::CloudVm
        );
        assert!(matches!(
            "commodore_64".parse::<PlatformProfile>(),
            Err(TuneError::Config(_))
        ));
    }

    #[test]
    fn platform_profile_serializes_as_identifier() {
        let json = serde_json::to_string(&PlatformProfile::JetsonOrin).unwrap();
        assert_eq!(json, "\"jetson_orin\"");
    }

    #[test]
    fn bound_contains_is_inclusive_and_rejects_nan() {
        let b = Bound::new(0.8, 1.4);
        assert!(b.contains(0.8));
        assert!(b.contains(1.4));
        assert!(!b.contains(1.5));
        assert!(!b.contains(f64::NAN));
        assert!(!b.contains(f64::INFINITY));
    }

    #[test]
    fn bound_within_and_intersect() {
        let hw = Bound::new(600.0, 2000.0);
        let safe = Bound::new(600.0, 1800.0);
        assert!(safe.within(&hw));
        assert!(!hw.within(&safe));
        assert_eq!(hw.intersect(&safe), Some(safe));
        assert_eq!(Bound::new(0.0, 1.0).intersect(&Bound::new(2.0, 3.0)), None);
    }

    #[test]
    fn unavailable_descriptor_has_no_bound() {
        assert_eq!(CapabilityDescriptor::unavailable().bound(), None);
        assert_eq!(
            CapabilityDescriptor::supported(1.0, 2.0).bound(),
            Some(Bound::new(1.0, 2.0))
        );
    }

    #[test]
    fn error_maps_to_decline_reason() {
        let err = TuneError::CapabilityUnavailable(Operation::CpuVoltage);
        assert_eq!(err.reason(), DeclineReason::CapabilityUnavailable);
        assert!(err.to_string().contains("cpu_voltage"));

        let outcome: OpOutcome = TuneError::DeviceFault {
            module: "pi_firmware".into(),
            details: "write failed".into(),
        }
        .into();
        assert_eq!(outcome.reason(), Some(DeclineReason::DeviceFault));
        assert!(!outcome.is_applied());
    }

    #[test]
    fn setup_errors_decline_as_policy_violations() {
        assert_eq!(
            TuneError::Config("bad platform".into()).reason(),
            DeclineReason::PolicyViolation
        );
        assert_eq!(
            TuneError::PolicyConfig("loosens cpu_clock".into()).reason(),
            DeclineReason::PolicyViolation
        );
        assert_eq!(
            TuneError::ModuleUnavailable("fpga".into()).reason(),
            DeclineReason::ModuleUnavailable
        );
    }

    #[test]
    fn only_stopped_is_terminal() {
        assert!(ModuleState::Stopped.is_terminal());
        for state in [
            ModuleState::Unloaded,
            ModuleState::Loaded,
            ModuleState::Active,
            ModuleState::Faulted,
        ] {
            assert!(!state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn emergency_event_roundtrip() {
        let event = EmergencyEvent::new(
            "thermal_sensor",
            "temperature_c 92 above 85",
            vec!["thermal_sensor".into(), "cooling_fan".into()],
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: EmergencyEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
