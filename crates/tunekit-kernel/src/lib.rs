//! `tunekit-kernel` – Safety & Dispatch
//!
//! Nothing reaches a control line without passing through this crate.  It
//! does not decide what to tune; it enforces what may be tuned and stops
//! hardware when telemetry says so.
//!
//! # Modules
//!
//! - [`capability_registry`] – [`CapabilityRegistry`][capability_registry::CapabilityRegistry]:
//!   the static per-platform table of supported operations and their
//!   hardware bounds.
//! - [`safety_policy`] – [`SafetyPolicy`][safety_policy::SafetyPolicy]:
//!   the layered deny-all → platform → custom rule chain producing one
//!   effective bound per operation.
//! - [`dispatcher`] – [`ControlDispatcher`][dispatcher::ControlDispatcher]:
//!   the single interception point between a tuning request and the module
//!   registry.  Combines capability, policy, and routing checks in one call.
//! - [`safety_monitor`] – [`SafetyMonitor`][safety_monitor::SafetyMonitor]:
//!   telemetry limits and the dependency-ordered emergency cascade.

pub mod capability_registry;
pub mod dispatcher;
pub mod safety_monitor;
pub mod safety_policy;

pub use capability_registry::{CapabilityRegistry, CapabilityTable, capabilities_for};
pub use dispatcher::{Baselines, ControlDispatcher};
pub use safety_monitor::{Breach, OPERATOR_SOURCE, SafetyMonitor, TelemetryLimit};
pub use safety_policy::{PolicyLayer, SafetyPolicy, platform_layer};
