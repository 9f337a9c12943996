//! `tunekit-hal` – Hardware Abstraction Layer
//!
//! Everything that touches the host or a peripheral lives here, behind
//! uniform interfaces so the kernel never speaks a device protocol.
//!
//! # Modules
//!
//! - [`platform`] – [`probe`][platform::probe] / [`detect`][platform::detect]:
//!   ordered, fail-closed signature checks producing the process-wide
//!   [`PlatformProfile`][tunekit_types::PlatformProfile].
//! - [`module`] – the [`Module`][module::Module] capability interface
//!   (`status`, `set_parameter`, `emergency_stop`, `calibrate`).
//! - [`registry`] – [`ModuleRegistry`][registry::ModuleRegistry]:
//!   best-effort construction and name-indexed lookup of module handles,
//!   per-module line locks, and the lock-free emergency stop path.
//! - [`backend`] – [`TunerBackend`][backend::TunerBackend]: the per-platform
//!   strategy table mapping operations onto module parameters.
//! - [`sim`] – simulated tuners, sensors, and actuators for CI and dry runs.

pub mod backend;
pub mod module;
pub mod platform;
pub mod registry;
pub mod sim;

pub use backend::TunerBackend;
pub use module::{CalibrationConfig, Module, ModuleStatus};
pub use platform::{HostSignatureSource, SignatureSource, detect, probe};
pub use registry::{ModuleConstructor, ModuleHandle, ModuleRegistry, ModuleRegistryBuilder, WriteMode};
pub use sim::{SimActuator, SimProbe, SimRegistry, SimRig, SimSensor, SimTuner};
