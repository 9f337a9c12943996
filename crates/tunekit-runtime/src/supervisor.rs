//! Background tasks feeding telemetry into the [`Orchestrator`].
//!
//! - [`spawn_sampler`] pull-samples monitored modules on a fixed interval and
//!   pushes readings onto the bounded telemetry queue.  Each read runs on the
//!   blocking pool under a timeout; a slow or failing device is logged as
//!   unavailable and never triggers a stop.
//! - [`spawn_supervisor`] drains the queue one sample at a time into
//!   [`Orchestrator::ingest`], so cascades are serialized.
//!
//! Both tasks end on their own once the other side of the queue is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tunekit_hal::registry::ModuleRegistry;
use tunekit_middleware::{TelemetryPublisher, TelemetryReceiver};
use tunekit_types::TelemetrySample;

use crate::orchestrator::Orchestrator;

/// Run every queued sample through [`Orchestrator::ingest`].
pub fn spawn_supervisor(orchestrator: Arc<Orchestrator>, mut samples: TelemetryReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(sample) = samples.recv().await {
            let orchestrator = Arc::clone(&orchestrator);
            // Cascades and restoration call into devices; keep them off the
            // async workers.
            match tokio::task::spawn_blocking(move || orchestrator.ingest(sample)).await {
                Ok(Some(event)) => {
                    warn!(event_id = %event.id, source = %event.source, "supervisor raised emergency stop");
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "telemetry ingestion panicked"),
            }
        }
        info!(dropped = samples.dropped(), "telemetry queue closed; supervisor exiting");
    })
}

/// Sample `monitored` every `interval`, giving each status read at most
/// `read_timeout`.
///
/// Stopped modules are skipped until they are reset.
pub fn spawn_sampler(
    registry: Arc<ModuleRegistry>,
    publisher: TelemetryPublisher,
    monitored: Vec<String>,
    interval: Duration,
    read_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for module in &monitored {
                if registry.state(module).is_some_and(|s| s.is_terminal()) {
                    continue;
                }
                let Some(status) = read_status(&registry, module, read_timeout).await else {
                    continue;
                };
                for (metric, value) in status {
                    if publisher.publish(TelemetrySample::new(module.clone(), metric, value)).await.is_err() {
                        info!("telemetry queue closed; sampler exiting");
                        return;
                    }
                }
            }
        }
    })
}

async fn read_status(
    registry: &Arc<ModuleRegistry>,
    module: &str,
    read_timeout: Duration,
) -> Option<tunekit_hal::ModuleStatus> {
    let reader = Arc::clone(registry);
    let name = module.to_string();
    let read = tokio::task::spawn_blocking(move || reader.status(&name));
    match tokio::time::timeout(read_timeout, read).await {
        Ok(Ok(Ok(status))) => Some(status),
        Ok(Ok(Err(e))) => {
            debug!(module, error = %e, "telemetry unavailable");
            None
        }
        Ok(Err(e)) => {
            warn!(module, error = %e, "telemetry read panicked");
            None
        }
        Err(_) => {
            debug!(module, timeout_ms = read_timeout.as_millis() as u64, "telemetry read timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunekit_hal::module::{CalibrationConfig, Module, ModuleStatus};
    use tunekit_hal::sim::{SimRegistry, SimRig};
    use tunekit_kernel::TelemetryLimit;
    use tunekit_middleware::telemetry_channel;
    use tunekit_types::{ModuleState, PlatformProfile, TuneError};

    fn rig() -> SimRig {
        SimRegistry::builder()
            .with_platform_tuner(PlatformProfile::JetsonOrin)
            .with_sensor("thermal_sensor", "temperature_c", 50.0)
            .with_actuator("cooling_fan")
            .depends_on("cooling_fan", "thermal_sensor")
            .build(PlatformProfile::JetsonOrin)
    }

    fn orchestrator(rig: &SimRig) -> Arc<Orchestrator> {
        Arc::new(
            Orchestrator::builder(PlatformProfile::JetsonOrin, Arc::clone(&rig.registry))
                .limit(TelemetryLimit::max("thermal_sensor", "temperature_c", 80.0))
                .build()
                .unwrap(),
        )
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn supervisor_cascades_on_queued_breach() {
        let rig = rig();
        let orch = orchestrator(&rig);
        let (tx, rx) = telemetry_channel(8);
        let handle = spawn_supervisor(Arc::clone(&orch), rx);

        tx.publish(TelemetrySample::new("thermal_sensor", "temperature_c", 55.0)).await.unwrap();
        tx.publish(TelemetrySample::new("thermal_sensor", "temperature_c", 91.0)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(orch.monitor().history().len(), 1);
        assert_eq!(rig.registry.state("cooling_fan"), Some(ModuleState::Stopped));
        assert_eq!(rig.tuner("tegra_dvfs").unwrap().value("power_budget"), Some(30.0));
    }

    #[tokio::test]
    async fn sampler_and_supervisor_catch_overheating() {
        let rig = rig();
        let orch = orchestrator(&rig);
        let monitored = orch.monitor().monitored_modules();
        let (tx, rx) = telemetry_channel(16);
        let supervisor = spawn_supervisor(Arc::clone(&orch), rx);
        let sampler = spawn_sampler(
            Arc::clone(&rig.registry),
            tx,
            monitored,
            Duration::from_millis(5),
            Duration::from_millis(200),
        );

        rig.sensor("thermal_sensor").unwrap().set_reading(95.0);
        let registry = Arc::clone(&rig.registry);
        assert!(
            wait_for(|| registry.state("thermal_sensor") == Some(ModuleState::Stopped)).await,
            "sensor never stopped"
        );
        assert_eq!(rig.sensor("thermal_sensor").unwrap().probe().stops(), 1);

        sampler.abort();
        let _ = sampler.await;
        supervisor.await.unwrap();
    }

    /// A sensor whose reads take far longer than the sampler allows.
    struct StuckSensor;

    impl Module for StuckSensor {
        fn id(&self) -> &str {
            "stuck_sensor"
        }
        fn status(&self) -> Result<ModuleStatus, TuneError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(ModuleStatus::from([("temperature_c".to_string(), 150.0)]))
        }
        fn set_parameter(&self, _name: &str, _value: f64) -> Result<(), TuneError> {
            Ok(())
        }
        fn emergency_stop(&self) {}
        fn calibrate(&self, _config: &CalibrationConfig) -> Result<(), TuneError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn timed_out_read_publishes_nothing() {
        let registry = Arc::new(
            ModuleRegistry::builder()
                .with_module("stuck_sensor", |_| Ok(Arc::new(StuckSensor) as Arc<dyn Module>))
                .build(PlatformProfile::X86Workstation),
        );
        let (tx, mut rx) = telemetry_channel(4);
        let sampler = spawn_sampler(
            Arc::clone(&registry),
            tx,
            vec!["stuck_sensor".to_string()],
            Duration::from_millis(10),
            Duration::from_millis(20),
        );

        let received = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(received.is_err(), "hot reading from a timed-out read must not be published");
        assert_ne!(registry.state("stuck_sensor"), Some(ModuleState::Stopped));
        sampler.abort();
    }

    #[tokio::test]
    async fn sampler_skips_failing_reads() {
        let rig = rig();
        rig.sensor("thermal_sensor").unwrap().set_fail_reads(true);
        let (tx, mut rx) = telemetry_channel(4);
        let sampler = spawn_sampler(
            Arc::clone(&rig.registry),
            tx,
            vec!["thermal_sensor".to_string(), "cooling_fan".to_string()],
            Duration::from_millis(5),
            Duration::from_millis(100),
        );

        let sample = rx.recv().await.expect("fan still reports");
        assert_eq!(sample.module, "cooling_fan");
        sampler.abort();
    }
}
