//! End-to-end safety properties exercised through the public runtime API
//! against simulated hardware.

use std::collections::BTreeMap;
use std::sync::Arc;

use tunekit_hal::sim::{SimRegistry, SimRig};
use tunekit_kernel::TelemetryLimit;
use tunekit_runtime::Orchestrator;
use tunekit_types::{DeclineReason, ModuleState, Operation, PlatformProfile, TelemetrySample};

fn rig_for(profile: PlatformProfile) -> SimRig {
    SimRegistry::builder()
        .with_platform_tuner(profile)
        .with_sensor("thermal_sensor", "temperature_c", 45.0)
        .with_actuator("cooling_fan")
        .with_actuator("pump")
        .depends_on("cooling_fan", "thermal_sensor")
        .depends_on("pump", "cooling_fan")
        .build(profile)
}

fn orchestrator_for(profile: PlatformProfile, rig: &SimRig) -> Orchestrator {
    Orchestrator::builder(profile, Arc::clone(&rig.registry))
        .limit(TelemetryLimit::max("thermal_sensor", "temperature_c", 85.0))
        .build()
        .expect("built-in policy is valid")
}

fn single(op: Operation, value: f64) -> BTreeMap<Operation, f64> {
    BTreeMap::from([(op, value)])
}

#[test]
fn cloud_vm_voltage_request_never_reaches_a_module() {
    let rig = rig_for(PlatformProfile::CloudVm);
    let orch = orchestrator_for(PlatformProfile::CloudVm, &rig);

    let report = orch.run(&single(Operation::CpuVoltage, 1.5));
    let reason = report.outcomes[0].1.reason();
    assert!(
        matches!(reason, Some(DeclineReason::CapabilityUnavailable | DeclineReason::PolicyViolation)),
        "got {reason:?}"
    );
    assert!(report.restored.is_empty());
    assert_eq!(rig.total_calls(), 0);
}

#[test]
fn raspberry_pi_voltage_within_bound_is_applied() {
    let rig = rig_for(PlatformProfile::RaspberryPi);
    let orch = orchestrator_for(PlatformProfile::RaspberryPi, &rig);

    let report = orch.run(&single(Operation::CpuVoltage, 1.3));
    assert!(report.outcomes[0].1.is_applied());
    assert_eq!(rig.tuner("pi_firmware").unwrap().probe().writes(), 1 + report.restored.len());
}

#[test]
fn cpu_clock_returns_to_baseline_after_any_run() {
    let rig = rig_for(PlatformProfile::X86Workstation);
    let orch = orchestrator_for(PlatformProfile::X86Workstation, &rig);
    let tuner = rig.tuner("intel_pstate").unwrap();

    orch.run(&single(Operation::CpuClock, 4200.0));
    assert_eq!(tuner.value("max_perf_mhz"), Some(1500.0));

    // The out-of-policy request is declined and the line still ends at baseline.
    let report = orch.run(&single(Operation::CpuClock, 4900.0));
    assert_eq!(report.outcomes[0].1.reason(), Some(DeclineReason::PolicyViolation));
    assert_eq!(tuner.value("max_perf_mhz"), Some(1500.0));
}

#[test]
fn breach_stops_source_and_dependents_exactly_once_then_restores() {
    let rig = rig_for(PlatformProfile::JetsonOrin);
    let orch = orchestrator_for(PlatformProfile::JetsonOrin, &rig);
    let mut alerts = orch.alerts().subscribe();
    let ops = BTreeMap::from([(Operation::CpuClock, 1900.0), (Operation::PowerLimit, 35.0)]);

    rig.sensor("thermal_sensor").unwrap().set_reading(97.0);
    let report = orch.run(&ops);

    let event = report.emergency.clone().expect("breach detected during run");
    assert_eq!(event.source, "thermal_sensor");
    assert_eq!(event.affected, vec!["thermal_sensor", "cooling_fan", "pump"]);
    assert_eq!(report.outcomes[1].1.reason(), Some(DeclineReason::EmergencyTriggered));
    assert!(report.fully_restored());

    // The supervisor path sees the same hot reading again: no second stop.
    assert!(orch.ingest(TelemetrySample::new("thermal_sensor", "temperature_c", 97.0)).is_none());

    for module in ["thermal_sensor", "cooling_fan", "pump"] {
        assert_eq!(rig.registry.state(module), Some(ModuleState::Stopped));
    }
    assert!(rig.sensor("thermal_sensor").unwrap().is_stopped());
    assert!(!rig.tuner("tegra_dvfs").unwrap().is_stopped(), "tuner is not a dependent");
    assert_eq!(rig.sensor("thermal_sensor").unwrap().probe().stops(), 1);
    assert_eq!(rig.actuator("cooling_fan").unwrap().probe().stops(), 1);
    assert_eq!(rig.actuator("pump").unwrap().probe().stops(), 1);
    assert_eq!(alerts.try_recv().map(|e| e.id), Some(event.id));
    assert!(alerts.try_recv().is_none());

    let tuner = rig.tuner("tegra_dvfs").unwrap();
    assert_eq!(tuner.value("cpu_max_freq"), Some(1500.0));
    assert_eq!(tuner.value("power_budget"), Some(30.0));
}

#[test]
fn emergency_stop_twice_is_harmless() {
    let rig = rig_for(PlatformProfile::RaspberryPi);
    let orch = orchestrator_for(PlatformProfile::RaspberryPi, &rig);

    assert!(rig.registry.emergency_stop("cooling_fan"));
    assert!(!rig.registry.emergency_stop("cooling_fan"));
    assert_eq!(rig.actuator("cooling_fan").unwrap().probe().stops(), 1);

    let event = orch.emergency_stop_all("operator interrupt").expect("others newly stopped");
    assert!(!event.affected.contains(&"cooling_fan".to_string()));
    assert!(orch.emergency_stop_all("operator interrupt").is_none());
}

#[test]
fn unavailable_capability_invokes_no_module_method() {
    let rig = rig_for(PlatformProfile::JetsonOrin);
    let orch = orchestrator_for(PlatformProfile::JetsonOrin, &rig);
    let calls_before = rig.tuner("tegra_dvfs").unwrap().probe().total_calls();

    let outcome = orch.dispatcher().set_operation(Operation::CpuVoltage, 1.0);
    assert_eq!(outcome.reason(), Some(DeclineReason::CapabilityUnavailable));
    assert_eq!(rig.tuner("tegra_dvfs").unwrap().probe().total_calls(), calls_before);
    assert_eq!(rig.total_calls(), 0);
}

#[test]
fn generic_platform_denies_everything() {
    let rig = rig_for(PlatformProfile::Generic);
    let orch = orchestrator_for(PlatformProfile::Generic, &rig);
    let ops: BTreeMap<_, _> = Operation::ALL.into_iter().map(|op| (op, 1.0)).collect();

    let report = orch.run(&ops);
    assert!(
        report
            .outcomes
            .iter()
            .all(|(_, o)| o.reason() == Some(DeclineReason::PlatformUnknown))
    );
    assert_eq!(rig.total_calls(), 0);
}
