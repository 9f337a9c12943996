//! [`SafetyMonitor`] – telemetry limits and the emergency cascade.
//!
//! The monitor holds a set of [`TelemetryLimit`]s.  Each incoming
//! [`TelemetrySample`] is compared against the limit for its module and
//! metric; a reading outside the limit (or a non-finite reading) is a
//! [`Breach`].
//!
//! [`SafetyMonitor::cascade`] then stops the breaching module and every module
//! that depends on it, transitively, through the registry's lock-free stop
//! path.  Each module is stopped at most once per cascade and modules that
//! were already stopped are left alone, so overlapping cascades never stop a
//! module twice.
//!
//! A failed telemetry read is *not* a breach: the module is treated as
//! unavailable for that poll and no stop is issued.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use tunekit_hal::registry::ModuleRegistry;
use tunekit_types::{EmergencyEvent, TelemetrySample};

/// Source recorded on operator-initiated stops.
pub const OPERATOR_SOURCE: &str = "operator";

// ────────────────────────────────────────────────────────────────────────────
// Limits
// ────────────────────────────────────────────────────────────────────────────

/// Acceptable range for one metric reported by one module.  Either side may
/// be open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryLimit {
    pub module: String,
    pub metric: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl TelemetryLimit {
    /// Upper limit only, the common case for temperatures and currents.
    pub fn max(module: impl Into<String>, metric: impl Into<String>, max: f64) -> Self {
        Self {
            module: module.into(),
            metric: metric.into(),
            min: None,
            max: Some(max),
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    fn applies_to(&self, module: &str, metric: &str) -> bool {
        self.module == module && self.metric == metric
    }

    /// `true` when `value` lies outside this limit.
    pub fn is_breached_by(&self, value: f64) -> bool {
        if !value.is_finite() {
            return true;
        }
        self.min.is_some_and(|min| value < min) || self.max.is_some_and(|max| value > max)
    }
}

impl fmt::Display for TelemetryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
        write!(
            f,
            "{}.{} in [{}, {}]",
            self.module,
            self.metric,
            side(self.min),
            side(self.max)
        )
    }
}

/// A reading that violated its limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub sample: TelemetrySample,
    pub limit: TelemetryLimit,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} violates {}",
            self.sample.metric, self.sample.value, self.limit
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Evaluates telemetry against limits and runs emergency cascades.
///
/// Shareable across threads: the event history sits behind a mutex and the
/// trip flag is atomic.
///
/// # Example
///
/// ```
/// use tunekit_hal::sim::SimRegistry;
/// use tunekit_kernel::safety_monitor::{SafetyMonitor, TelemetryLimit};
/// use tunekit_types::{PlatformProfile, TelemetrySample};
///
/// let rig = SimRegistry::builder()
///     .with_sensor("thermal_sensor", "temperature_c", 40.0)
///     .with_actuator("cooling_fan")
///     .depends_on("cooling_fan", "thermal_sensor")
///     .build(PlatformProfile::RaspberryPi);
/// let monitor = SafetyMonitor::new(vec![TelemetryLimit::max("thermal_sensor", "temperature_c", 85.0)]);
///
/// let breach = monitor
///     .evaluate(&TelemetrySample::new("thermal_sensor", "temperature_c", 92.0))
///     .expect("92 °C breaches an 85 °C limit");
/// let event = monitor.cascade(&rig.registry, &breach).expect("modules newly stopped");
/// assert_eq!(event.affected, vec!["thermal_sensor", "cooling_fan"]);
/// assert!(monitor.tripped());
/// ```
#[derive(Debug, Default)]
pub struct SafetyMonitor {
    limits: Vec<TelemetryLimit>,
    history: Mutex<Vec<EmergencyEvent>>,
    tripped: AtomicBool,
}

impl SafetyMonitor {
    pub fn new(limits: Vec<TelemetryLimit>) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &[TelemetryLimit] {
        &self.limits
    }

    /// Modules with at least one limit, deduplicated and sorted.
    pub fn monitored_modules(&self) -> Vec<String> {
        self.limits
            .iter()
            .map(|l| l.module.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Compare `sample` against every matching limit.  Samples with no
    /// matching limit never breach.
    pub fn evaluate(&self, sample: &TelemetrySample) -> Option<Breach> {
        self.limits
            .iter()
            .find(|l| l.applies_to(&sample.module, &sample.metric) && l.is_breached_by(sample.value))
            .map(|limit| Breach {
                sample: sample.clone(),
                limit: limit.clone(),
            })
    }

    /// Read every monitored module's status once and collect every breach.
    ///
    /// Read failures are logged and skipped.
    pub fn poll(&self, registry: &ModuleRegistry) -> Vec<Breach> {
        let mut breaches = Vec::new();
        for module in self.monitored_modules() {
            let status = match registry.status(&module) {
                Ok(status) => status,
                Err(e) => {
                    debug!(module = %module, error = %e, "telemetry unavailable");
                    continue;
                }
            };
            breaches.extend(status.into_iter().filter_map(|(metric, value)| {
                self.evaluate(&TelemetrySample::new(module.clone(), metric, value))
            }));
        }
        breaches
    }

    /// Stop the breaching module and its transitive dependents.
    ///
    /// Returns the recorded event, or `None` when every module involved was
    /// already stopped.  Trips the monitor either way.
    pub fn cascade(&self, registry: &ModuleRegistry, breach: &Breach) -> Option<EmergencyEvent> {
        self.tripped.store(true, Ordering::SeqCst);
        let source = breach.sample.module.as_str();

        let mut affected = Vec::new();
        let mut visited = BTreeSet::from([source.to_string()]);
        let mut queue = VecDeque::from([source.to_string()]);
        while let Some(name) = queue.pop_front() {
            if registry.emergency_stop(&name) {
                affected.push(name.clone());
            }
            for dependent in registry.dependents_of(&name) {
                if visited.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }

        self.record(source, breach.to_string(), affected)
    }

    /// Stop every available module.  Used for operator interrupts.
    pub fn emergency_stop_all(&self, registry: &ModuleRegistry, reason: &str) -> Option<EmergencyEvent> {
        self.tripped.store(true, Ordering::SeqCst);
        let affected = registry
            .available()
            .into_iter()
            .filter(|name| registry.emergency_stop(name))
            .collect();
        self.record(OPERATOR_SOURCE, reason.to_string(), affected)
    }

    fn record(&self, source: &str, reason: String, affected: Vec<String>) -> Option<EmergencyEvent> {
        if affected.is_empty() {
            warn!(source, reason = %reason, "emergency cascade found nothing left to stop");
            return None;
        }
        let event = EmergencyEvent::new(source, reason, affected);
        error!(
            event_id = %event.id,
            source = %event.source,
            reason = %event.reason,
            affected = ?event.affected,
            "emergency stop"
        );
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Some(event)
    }

    pub fn history(&self) -> Vec<EmergencyEvent> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `true` once any cascade has run and until [`clear_trip`](Self::clear_trip).
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn clear_trip(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }
}
