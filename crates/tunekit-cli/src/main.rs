//! `tunekit-cli` – TuneKit Command Line Interface
//!
//! The experiment-invocation surface for the TuneKit stack.  It:
//!
//! 1. Loads `~/.tunekit/config.toml` (or `--config PATH`) and resolves the
//!    platform profile, by override or by probing the host.
//! 2. Wires the platform's tuner together with a thermal sensor and cooling
//!    fan, using the simulation backends.
//! 3. Runs `detect`, `run op=value…`, `stop`, or `init`.
//! 4. Intercepts **Ctrl-C** to stop every module and restore baselines.

mod args;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tracing::warn;

use args::{Cli, Command};
use tunekit_hal::sim::{SimRegistry, SimRig};
use tunekit_kernel::TelemetryLimit;
use tunekit_middleware::telemetry_channel;
use tunekit_runtime::{Orchestrator, RunReport, TuneConfig, config, spawn_sampler, spawn_supervisor};
use tunekit_types::{EmergencyEvent, OpOutcome, Operation, PlatformProfile, TuneError};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); TUNEKIT_LOG_FORMAT=json switches to
    // newline-delimited JSON.  User-facing output still goes through println!.
    let _guard = tunekit_runtime::init_tracing("tunekit");

    let cli = match args::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::from(2);
        }
    };

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> CliResult<ExitCode> {
    if cli.command == Command::Help {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    }
    if cli.command == Command::Init {
        return init_config(&cli);
    }

    let cfg = load_config(&cli)?;
    let profile = cfg.resolve_platform();
    let rig = wire_rig(profile, &cfg);
    let orchestrator = Arc::new(
        Orchestrator::builder(profile, Arc::clone(&rig.registry))
            .config(&cfg)?
            .build()?,
    );

    match cli.command {
        Command::Detect => {
            print_detect(&orchestrator);
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop => {
            let event = orchestrator.emergency_stop_all("operator stop command");
            print_emergency(event.as_ref());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { parameters } => {
            install_ctrlc(Arc::clone(&orchestrator));
            let report = run_experiment(&orchestrator, &cfg, parameters)?;
            print_report(&report);
            Ok(exit_code_for(&report))
        }
        Command::Help | Command::Init => Ok(ExitCode::SUCCESS),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

const THERMAL_SENSOR: &str = "thermal_sensor";
const COOLING_FAN: &str = "cooling_fan";

fn load_config(cli: &Cli) -> CliResult<TuneConfig> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_from(path)?
            .ok_or_else(|| TuneError::Config(format!("no config file at {}", path.display())))?,
        None => config::load()?,
    };
    if cfg.monitor.limits.is_empty() {
        cfg.monitor
            .limits
            .push(TelemetryLimit::max(THERMAL_SENSOR, "temperature_c", 85.0));
    }
    Ok(cfg)
}

fn wire_rig(profile: PlatformProfile, cfg: &TuneConfig) -> SimRig {
    let mut builder = SimRegistry::builder()
        .with_platform_tuner(profile)
        .with_sensor(THERMAL_SENSOR, "temperature_c", 45.0)
        .with_actuator(COOLING_FAN)
        .depends_on(COOLING_FAN, THERMAL_SENSOR);
    for dep in &cfg.dependencies {
        builder = builder.depends_on(dep.dependent.clone(), dep.source.clone());
    }
    builder.build(profile)
}

fn install_ctrlc(orchestrator: Arc<Orchestrator>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping all modules …".yellow().bold());
        let event = orchestrator.emergency_stop_all("operator interrupt (Ctrl-C)");
        print_emergency(event.as_ref());
        println!("{}", "  ✓ Baselines restored.  Exiting TuneKit.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; interrupts will not stop modules");
    }
}

fn run_experiment(
    orchestrator: &Arc<Orchestrator>,
    cfg: &TuneConfig,
    parameters: std::collections::BTreeMap<Operation, f64>,
) -> CliResult<RunReport> {
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        let (publisher, receiver) = telemetry_channel(cfg.telemetry.queue_capacity);
        let supervisor = spawn_supervisor(Arc::clone(orchestrator), receiver);
        let sampler = spawn_sampler(
            Arc::clone(orchestrator.registry()),
            publisher,
            orchestrator.monitor().monitored_modules(),
            cfg.telemetry.sample_interval(),
            cfg.telemetry.read_timeout(),
        );

        let worker = Arc::clone(orchestrator);
        let report = tokio::task::spawn_blocking(move || worker.run(&parameters)).await;

        sampler.abort();
        let _ = sampler.await;
        let _ = supervisor.await;
        report
    })?;
    Ok(report)
}

fn init_config(cli: &Cli) -> CliResult<ExitCode> {
    let path = cli.config.clone().unwrap_or_else(config::config_path);
    if path.exists() {
        println!("  Config already exists at {}", path.display().to_string().bold());
        return Ok(ExitCode::SUCCESS);
    }
    config::save_to(&TuneConfig::default(), &path)?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(ExitCode::SUCCESS)
}

fn exit_code_for(report: &RunReport) -> ExitCode {
    if report.emergency.is_some() || !report.fully_restored() {
        ExitCode::from(3)
    } else if report.applied() < report.outcomes.len() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_usage() {
    println!();
    println!("  {} {}", "TuneKit".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Safety-gated hardware tuning");
    println!();
    println!("  {}", "USAGE".bold());
    println!("    tunekit [--config PATH] <command>");
    println!();
    println!("  {}", "COMMANDS".bold());
    println!("    {}                      platform, capabilities, effective policy", "detect".cyan());
    println!("    {} op=value …              apply, watch, restore baselines", "run".cyan());
    println!("    {}                        stop every module and restore baselines", "stop".cyan());
    println!("    {}                        write a default config file", "init".cyan());
    println!();
    let ops: Vec<_> = Operation::ALL.iter().map(|op| op.as_str()).collect();
    println!("  Operations: {}", ops.join(", ").dimmed());
    println!();
}

fn print_detect(orchestrator: &Orchestrator) {
    let dispatcher = orchestrator.dispatcher();
    let profile = orchestrator.profile();
    println!();
    let label = profile.to_string();
    if profile.is_generic() {
        println!("  Platform: {}  {}", label.yellow().bold(), "(unknown – everything denied)".dimmed());
    } else {
        println!("  Platform: {}", label.green().bold());
    }
    println!("  Policy:   {}", dispatcher.policy().layers().join(" → ").dimmed());
    println!();
    println!("  {:<12} {:<22} {:<22} {}", "operation".bold(), "hardware".bold(), "effective".bold(), "baseline".bold());
    for op in Operation::ALL {
        let hardware = dispatcher
            .capabilities()
            .descriptor(op)
            .bound()
            .map_or_else(|| "—".to_string(), |b| format!("{b} {}", op.unit()));
        let effective = dispatcher
            .policy()
            .effective_bound(op)
            .map_or_else(|| "denied".red().to_string(), |b| format!("{b} {}", op.unit()).green().to_string());
        let baseline = orchestrator
            .baselines()
            .get(op)
            .map_or_else(|| "—".to_string(), |v| format!("{v} {}", op.unit()));
        println!("  {:<12} {:<22} {:<22} {}", op.as_str(), hardware, effective, baseline.dimmed());
    }
    println!();
    println!("  Modules:");
    let registry = orchestrator.registry();
    for name in registry.names() {
        match registry.state(&name) {
            Some(state) => println!("    • {} ({state})", name.bold()),
            None => println!("    • {} {}", name.bold(), "(unavailable)".red()),
        }
    }
    println!();
}

fn outcome_line(op: Operation, outcome: &OpOutcome) -> String {
    match outcome {
        OpOutcome::Applied => format!("    {} {op}", "✓".green().bold()),
        OpOutcome::Declined { reason, detail } => {
            format!("    {} {op}  {}  {}", "✗".red().bold(), reason.to_string().yellow(), detail.dimmed())
        }
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("  {}", "Operations".bold());
    for (op, outcome) in &report.outcomes {
        println!("{}", outcome_line(*op, outcome));
    }
    if report.emergency.is_some() {
        print_emergency(report.emergency.as_ref());
    }
    println!("  {}", "Baseline restoration".bold());
    if report.restored.is_empty() {
        println!("    {}", "nothing to restore".dimmed());
    }
    for (op, outcome) in &report.restored {
        println!("{}", outcome_line(*op, outcome));
    }
    println!();
}

fn print_emergency(event: Option<&EmergencyEvent>) {
    match event {
        Some(event) => {
            println!("  {} {}", "EMERGENCY STOP".red().bold(), event.reason);
            println!("    source:   {}", event.source.bold());
            println!("    stopped:  {}", event.affected.join(", "));
            println!("    event id: {}", event.id.to_string().dimmed());
        }
        None => println!("  {}", "No module left to stop.".dimmed()),
    }
}
