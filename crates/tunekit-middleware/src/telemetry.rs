//! Bounded telemetry queue.
//!
//! Producers (samplers, device callbacks) hold a cloneable
//! [`TelemetryPublisher`]; the supervisor owns the single
//! [`TelemetryReceiver`].  The queue never grows past its capacity: the async
//! [`publish`](TelemetryPublisher::publish) waits for room, and the
//! non-blocking [`try_publish`](TelemetryPublisher::try_publish) reports the
//! full queue to the producer and counts the dropped sample.
//!
//! # Example
//!
//! ```
//! use tunekit_middleware::telemetry_channel;
//! use tunekit_types::TelemetrySample;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let (tx, mut rx) = telemetry_channel(8);
//!     tx.publish(TelemetrySample::new("thermal_sensor", "temperature_c", 61.5)).await.unwrap();
//!     assert_eq!(rx.recv().await.map(|s| s.value), Some(61.5));
//! });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use tunekit_types::{TelemetrySample, TuneError};

const QUEUE: &str = "telemetry";

/// Create a telemetry queue holding at most `capacity` samples.
///
/// A zero capacity is raised to one.
pub fn telemetry_channel(capacity: usize) -> (TelemetryPublisher, TelemetryReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        TelemetryPublisher {
            sender,
            dropped: Arc::clone(&dropped),
        },
        TelemetryReceiver { receiver, dropped },
    )
}

/// Sending half of the telemetry queue.
#[derive(Clone, Debug)]
pub struct TelemetryPublisher {
    sender: mpsc::Sender<TelemetrySample>,
    dropped: Arc<AtomicU64>,
}

fn closed() -> TuneError {
    TuneError::ModuleUnavailable("telemetry queue closed".to_string())
}

impl TelemetryPublisher {
    /// Enqueue `sample`, waiting while the queue is full.
    pub async fn publish(&self, sample: TelemetrySample) -> Result<(), TuneError> {
        self.sender.send(sample).await.map_err(|_| closed())
    }

    /// Enqueue `sample` without waiting.  A full queue drops the sample and
    /// returns a device fault attributed to the queue.
    pub fn try_publish(&self, sample: TelemetrySample) -> Result<(), TuneError> {
        match self.sender.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(sample)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(module = %sample.module, metric = %sample.metric, "telemetry queue full, sample dropped");
                Err(TuneError::DeviceFault {
                    module: QUEUE.to_string(),
                    details: format!("queue full, dropped {}.{}", sample.module, sample.metric),
                })
            }
            Err(TrySendError::Closed(_)) => Err(closed()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of the telemetry queue.
#[derive(Debug)]
pub struct TelemetryReceiver {
    receiver: mpsc::Receiver<TelemetrySample>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryReceiver {
    /// Next sample, or `None` once every publisher is gone and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<TelemetrySample> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TelemetrySample> {
        self.receiver.try_recv().ok()
    }

    /// Samples rejected by [`TelemetryPublisher::try_publish`] so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
