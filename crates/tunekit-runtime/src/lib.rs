//! `tunekit-runtime` – Experiment Orchestration
//!
//! Drives tuning experiments and keeps the hardware watched while they run.
//!
//! # Modules
//!
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]:
//!   applies a set of operations through the kernel's
//!   [`ControlDispatcher`], polls the safety monitor after every write, and
//!   restores the documented baselines on every exit path.
//! - [`supervisor`] – background tasks: a pull sampler with per-read
//!   timeouts and a supervisor that serializes telemetry into
//!   [`Orchestrator::ingest`][orchestrator::Orchestrator::ingest].
//! - [`config`] – [`TuneConfig`][config::TuneConfig]: `~/.tunekit/config.toml`
//!   with `TUNEKIT_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP span export.
//!
//! # Kernel gating
//!
//! Every write an experiment issues passes through
//! [`ControlDispatcher::set_operation`].  [`ControlDispatcher`] is re-exported
//! here so callers can inspect the live policy without a direct dependency on
//! `tunekit-kernel`.

pub mod config;
pub mod orchestrator;
pub mod supervisor;
pub mod telemetry;

pub use config::TuneConfig;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunReport};
pub use supervisor::{spawn_sampler, spawn_supervisor};
pub use telemetry::{TracerProviderGuard, init_tracing};

pub use tunekit_kernel::ControlDispatcher;
