//! `tunekit-middleware` – The Nervous System
//!
//! Moves data between modules, the safety monitor, and operators without
//! caring what the data means.
//!
//! # Modules
//!
//! - [`telemetry`] – bounded many-producer telemetry queue feeding the
//!   supervisor.  A full queue reports back-pressure instead of growing.
//! - [`bus`] – broadcast bus for [`EmergencyEvent`][tunekit_types::EmergencyEvent]
//!   alerts, delivered to every subscriber.

pub mod bus;
pub mod telemetry;

pub use bus::{AlertBus, AlertReceiver};
pub use telemetry::{TelemetryPublisher, TelemetryReceiver, telemetry_channel};
