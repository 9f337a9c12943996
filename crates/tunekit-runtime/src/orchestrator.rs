//! [`Orchestrator`] – runs one tuning experiment end to end.
//!
//! Each [`Orchestrator::run`]:
//!
//! 1. **Gate** – every requested operation, in operation order, goes through
//!    the [`ControlDispatcher`].  Once the [`SafetyMonitor`] has tripped, the
//!    remaining operations are declined with `EmergencyTriggered` without
//!    reaching the dispatcher.
//! 2. **Watch** – after every applied write the monitor pull-polls its
//!    modules; a breach runs the emergency cascade and broadcasts the event
//!    on the [`AlertBus`].
//! 3. **Restore** – the documented baselines are written back on every exit
//!    path.  A scope guard performs the restoration if the run unwinds; the
//!    normal path reports the restoration outcomes in the [`RunReport`].
//!
//! Telemetry pushed from outside a run (the supervisor task) enters through
//! [`Orchestrator::ingest`].
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use tunekit_hal::sim::SimRegistry;
//! use tunekit_runtime::orchestrator::Orchestrator;
//! use tunekit_types::{Operation, PlatformProfile};
//!
//! let profile = PlatformProfile::RaspberryPi;
//! let rig = SimRegistry::builder().with_platform_tuner(profile).build(profile);
//! let orchestrator = Orchestrator::builder(profile, rig.registry.clone()).build().unwrap();
//!
//! let report = orchestrator.run(&BTreeMap::from([(Operation::CpuClock, 1800.0)]));
//! assert!(report.outcomes[0].1.is_applied());
//! assert_eq!(rig.tuner("pi_firmware").unwrap().value("arm_freq"), Some(1500.0));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use tunekit_hal::registry::ModuleRegistry;
use tunekit_kernel::{
    Baselines, Breach, CapabilityRegistry, ControlDispatcher, PolicyLayer, SafetyMonitor, SafetyPolicy,
    TelemetryLimit,
};
use tunekit_middleware::AlertBus;
use tunekit_types::{EmergencyEvent, OpOutcome, Operation, PlatformProfile, TelemetrySample, TuneError};

use crate::config::TuneConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// One entry per requested operation, in operation order.
    pub outcomes: Vec<(Operation, OpOutcome)>,
    /// The first emergency raised while the run was active, if any.
    pub emergency: Option<EmergencyEvent>,
    /// Baseline restoration performed before the run returned.
    pub restored: Vec<(Operation, OpOutcome)>,
}

impl RunReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_applied()).count()
    }

    /// Every restoration write succeeded.
    pub fn fully_restored(&self) -> bool {
        self.restored.iter().all(|(_, o)| o.is_applied())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles an [`Orchestrator`] for one platform and module registry.
pub struct OrchestratorBuilder {
    profile: PlatformProfile,
    registry: Arc<ModuleRegistry>,
    layers: Vec<PolicyLayer>,
    limits: Vec<TelemetryLimit>,
    baselines: Baselines,
    alerts: AlertBus,
}

impl OrchestratorBuilder {
    pub fn layer(mut self, layer: PolicyLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn limit(mut self, limit: TelemetryLimit) -> Self {
        self.limits.push(limit);
        self
    }

    pub fn baselines(mut self, baselines: Baselines) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn alerts(mut self, alerts: AlertBus) -> Self {
        self.alerts = alerts;
        self
    }

    /// Take custom layers, limits, and baselines from `config`.
    pub fn config(mut self, config: &TuneConfig) -> Result<Self, TuneError> {
        self.layers.extend(config.policy_layers()?);
        self.limits.extend(config.monitor.limits.iter().cloned());
        self.baselines = config.baselines()?;
        Ok(self)
    }

    /// Fails with `PolicyConfig` when a layer loosens the chain or a baseline
    /// sits outside its effective bound.
    pub fn build(self) -> Result<Orchestrator, TuneError> {
        let capabilities = Arc::new(CapabilityRegistry::new(self.profile));
        let policy = self
            .layers
            .into_iter()
            .try_fold(SafetyPolicy::for_platform(&capabilities)?, SafetyPolicy::with_layer)?;
        let dispatcher = ControlDispatcher::new(capabilities, policy, self.registry);
        dispatcher.validate_baselines(&self.baselines)?;

        info!(
            platform = %self.profile,
            layers = ?dispatcher.policy().layers(),
            operations = ?dispatcher.capabilities().available_operations(),
            "orchestrator ready"
        );
        Ok(Orchestrator {
            dispatcher,
            monitor: SafetyMonitor::new(self.limits),
            baselines: self.baselines,
            alerts: self.alerts,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Ties the dispatcher, safety monitor, and alert bus together.
///
/// Shared as `Arc<Orchestrator>` between the caller and the supervisor task;
/// every operation takes `&self`.
pub struct Orchestrator {
    dispatcher: ControlDispatcher,
    monitor: SafetyMonitor,
    baselines: Baselines,
    alerts: AlertBus,
}

/// Restores baselines when dropped while armed.
struct RestoreGuard<'a> {
    orchestrator: &'a Orchestrator,
    armed: bool,
}

impl RestoreGuard<'_> {
    fn finish(mut self) -> Vec<(Operation, OpOutcome)> {
        self.armed = false;
        self.orchestrator.restore_baseline()
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("run aborted; restoring baseline");
            self.orchestrator.restore_baseline();
        }
    }
}

impl Orchestrator {
    pub fn builder(profile: PlatformProfile, registry: Arc<ModuleRegistry>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            profile,
            registry,
            layers: Vec::new(),
            limits: Vec::new(),
            baselines: Baselines::default(),
            alerts: AlertBus::default(),
        }
    }

    pub fn profile(&self) -> PlatformProfile {
        self.dispatcher.capabilities().profile()
    }

    pub fn dispatcher(&self) -> &ControlDispatcher {
        &self.dispatcher
    }

    pub fn monitor(&self) -> &SafetyMonitor {
        &self.monitor
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.dispatcher.registry()
    }

    pub fn alerts(&self) -> &AlertBus {
        &self.alerts
    }

    pub fn baselines(&self) -> &Baselines {
        &self.baselines
    }

    /// Tighten the live policy.  Only possible before the orchestrator is
    /// shared.  Rejected, with the policy left as it was, when a baseline
    /// would fall outside the narrowed bound.
    pub fn narrow_policy(&mut self, layer: PolicyLayer) -> Result<(), TuneError> {
        self.dispatcher.narrow_policy(layer, &self.baselines)
    }

    /// Apply `parameters`, watch telemetry, and restore baselines.
    pub fn run(&self, parameters: &BTreeMap<Operation, f64>) -> RunReport {
        let guard = RestoreGuard {
            orchestrator: self,
            armed: true,
        };
        let history_before = self.monitor.history().len();
        let mut outcomes = Vec::with_capacity(parameters.len());

        for (&op, &value) in parameters {
            if self.monitor.tripped() {
                let err = TuneError::EmergencyTriggered(format!("{op} skipped after emergency stop"));
                outcomes.push((op, OpOutcome::from(err)));
                continue;
            }
            let outcome = self.dispatcher.set_operation(op, value);
            let applied = outcome.is_applied();
            outcomes.push((op, outcome));
            if applied {
                for breach in self.monitor.poll(self.registry()) {
                    self.escalate(&breach);
                }
            }
        }

        // Also picks up an emergency raised concurrently by the supervisor.
        let emergency = self.monitor.history().into_iter().nth(history_before);
        let restored = guard.finish();
        info!(
            requested = parameters.len(),
            applied = outcomes.iter().filter(|(_, o)| o.is_applied()).count(),
            emergency = emergency.is_some(),
            "run complete"
        );
        RunReport {
            outcomes,
            emergency,
            restored,
        }
    }

    /// Push-path entry point for one telemetry sample.
    ///
    /// A breach cascades, is broadcast, and is followed by baseline
    /// restoration.  Returns the new event, if any module was newly stopped.
    pub fn ingest(&self, sample: TelemetrySample) -> Option<EmergencyEvent> {
        debug!(module = %sample.module, metric = %sample.metric, value = sample.value, "telemetry");
        let breach = self.monitor.evaluate(&sample)?;
        let event = self.escalate(&breach);
        self.restore_baseline();
        event
    }

    fn escalate(&self, breach: &Breach) -> Option<EmergencyEvent> {
        let event = self.monitor.cascade(self.registry(), breach)?;
        self.alerts.publish(event.clone());
        Some(event)
    }

    /// Operator stop: every available module, then baseline restoration.
    pub fn emergency_stop_all(&self, reason: &str) -> Option<EmergencyEvent> {
        let event = self.monitor.emergency_stop_all(self.registry(), reason);
        if let Some(event) = &event {
            self.alerts.publish(event.clone());
        }
        self.restore_baseline();
        event
    }

    /// Write every available operation's baseline.  Idempotent.
    pub fn restore_baseline(&self) -> Vec<(Operation, OpOutcome)> {
        self.dispatcher.restore_baseline(&self.baselines)
    }

    /// Explicitly bring `name` out of `Stopped` or `Faulted`.
    ///
    /// The monitor's trip flag clears once no available module remains
    /// stopped.
    pub fn reset_module(&self, name: &str) -> Result<(), TuneError> {
        let registry = self.registry();
        registry.reset(name)?;
        let still_stopped = registry
            .available()
            .iter()
            .any(|m| registry.state(m).is_some_and(|s| s.is_terminal()));
        if !still_stopped {
            self.monitor.clear_trip();
            info!("all modules reset; emergency trip cleared");
        }
        Ok(())
    }
}
