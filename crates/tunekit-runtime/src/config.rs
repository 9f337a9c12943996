//! Configuration – reads/writes `~/.tunekit/config.toml`.
//!
//! ```toml
//! platform = "raspberry_pi"          # optional; skips detection
//!
//! [baseline]
//! cpu_clock = 1500.0
//!
//! [[policy.layer]]
//! name = "lab-bench"
//! rules = { cpu_clock = { min = 600.0, max = 1600.0 } }
//!
//! [[monitor.limit]]
//! module = "thermal_sensor"
//! metric = "temperature_c"
//! max = 85.0
//!
//! [[dependency]]
//! dependent = "cooling_fan"
//! source = "thermal_sensor"
//!
//! [telemetry]
//! queue_capacity = 256
//! sample_interval_ms = 250
//! read_timeout_ms = 100
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use tunekit_kernel::{Baselines, PolicyLayer, TelemetryLimit};
use tunekit_types::{Bound, Operation, PlatformProfile, TuneError};

/// Persisted TuneKit configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TuneConfig {
    /// Forces the platform profile instead of probing the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformProfile>,

    /// Per-operation baseline overrides keyed by operation name.
    #[serde(default)]
    pub baseline: BTreeMap<String, f64>,

    #[serde(default)]
    pub policy: PolicySection,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencyEntry>,

    #[serde(default)]
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicySection {
    #[serde(default, rename = "layer")]
    pub layers: Vec<LayerEntry>,
}

/// One custom policy layer.  Rules are keyed by operation name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub name: String,
    #[serde(default)]
    pub rules: BTreeMap<String, Bound>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorSection {
    #[serde(default, rename = "limit")]
    pub limits: Vec<TelemetryLimit>,
}

/// `dependent` is stopped whenever `source` is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub dependent: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_sample_interval_ms() -> u64 {
    250
}
fn default_read_timeout_ms() -> u64 {
    100
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            sample_interval_ms: default_sample_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl TelemetrySection {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

fn parse_operation(name: &str, context: &str) -> Result<Operation, TuneError> {
    Operation::from_str(name).map_err(|_| TuneError::Config(format!("{context}: unknown operation '{name}'")))
}

impl TuneConfig {
    /// Default baselines with this file's overrides applied.
    pub fn baselines(&self) -> Result<Baselines, TuneError> {
        let mut baselines = Baselines::default();
        for (name, value) in &self.baseline {
            baselines.set(parse_operation(name, "[baseline]")?, *value);
        }
        Ok(baselines)
    }

    /// Custom policy layers in file order.
    pub fn policy_layers(&self) -> Result<Vec<PolicyLayer>, TuneError> {
        let mut layers = Vec::with_capacity(self.policy.layers.len());
        for entry in &self.policy.layers {
            let context = format!("policy layer '{}'", entry.name);
            let mut layer = PolicyLayer::new(entry.name.clone());
            for (op, bound) in &entry.rules {
                layer = layer.rule(parse_operation(op, &context)?, *bound);
            }
            layers.push(layer);
        }
        Ok(layers)
    }

    /// The configured platform, or the detected one.
    pub fn resolve_platform(&self) -> PlatformProfile {
        self.platform.unwrap_or_else(tunekit_hal::detect)
    }
}

/// Return the path to `~/.tunekit/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tunekit").join("config.toml")
}

/// Load from the default path.  A missing file yields defaults; the
/// `TUNEKIT_*` overrides apply either way.
pub fn load() -> Result<TuneConfig, TuneError> {
    load_for_home(&home_dir())
}

pub(crate) fn load_for_home(home: &str) -> Result<TuneConfig, TuneError> {
    let mut cfg = read_file(&config_path_for_home(home))?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load from `path` and apply the environment overrides.  Returns `None` if
/// the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<TuneConfig>, TuneError> {
    let Some(mut cfg) = read_file(path)? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

fn read_file(path: &Path) -> Result<Option<TuneConfig>, TuneError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| TuneError::Config(format!("failed to read config at {}: {e}", path.display())))?;
    parse(&raw).map(Some)
}

/// Parse TOML text without touching the environment.
pub fn parse(raw: &str) -> Result<TuneConfig, TuneError> {
    toml::from_str(raw).map_err(|e| TuneError::Config(format!("failed to parse config: {e}")))
}

/// Apply `TUNEKIT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TUNEKIT_PLATFORM` | `platform` |
/// | `TUNEKIT_QUEUE_CAPACITY` | `telemetry.queue_capacity` |
/// | `TUNEKIT_SAMPLE_INTERVAL_MS` | `telemetry.sample_interval_ms` |
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(cfg: &mut TuneConfig) {
    if let Ok(v) = std::env::var("TUNEKIT_PLATFORM") {
        match v.parse::<PlatformProfile>() {
            Ok(profile) => cfg.platform = Some(profile),
            Err(e) => warn!(value = %v, error = %e, "ignoring TUNEKIT_PLATFORM"),
        }
    }
    if let Ok(v) = std::env::var("TUNEKIT_QUEUE_CAPACITY")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.telemetry.queue_capacity = n;
    }
    if let Ok(v) = std::env::var("TUNEKIT_SAMPLE_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.telemetry.sample_interval_ms = ms;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &TuneConfig, path: &Path) -> Result<(), TuneError> {
    let io_err = |what: &str, e: std::io::Error| TuneError::Config(format!("{what} {}: {e}", path.display()));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create directory for", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to set permissions for", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| TuneError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err("failed to write config at", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("failed to write config at", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    const SAMPLE: &str = r#"
platform = "raspberry_pi"

[baseline]
cpu_clock = 1400.0

[[policy.layer]]
name = "lab-bench"
rules = { cpu_clock = { min = 600.0, max = 1600.0 } }

[[monitor.limit]]
module = "thermal_sensor"
metric = "temperature_c"
max = 85.0

[[dependency]]
dependent = "cooling_fan"
source = "thermal_sensor"

[telemetry]
sample_interval_ms = 500
"#;

    #[test]
    fn parses_every_section() {
        let cfg = parse(SAMPLE).expect("valid config");
        assert_eq!(cfg.platform, Some(PlatformProfile::RaspberryPi));
        assert_eq!(cfg.baselines().unwrap().get(Operation::CpuClock), Some(1400.0));
        assert_eq!(cfg.baselines().unwrap().get(Operation::CpuVoltage), Some(1.2));

        let layers = cfg.policy_layers().unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name, "lab-bench");
        assert_eq!(layers[0].rules[&Operation::CpuClock], Bound::new(600.0, 1600.0));

        assert_eq!(cfg.monitor.limits, vec![TelemetryLimit::max("thermal_sensor", "temperature_c", 85.0)]);
        assert_eq!(cfg.dependencies[0].dependent, "cooling_fan");
        assert_eq!(cfg.telemetry.sample_interval(), Duration::from_millis(500));
        assert_eq!(cfg.telemetry.queue_capacity, 256);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg, TuneConfig::default());
        assert_eq!(cfg.baselines().unwrap(), Baselines::default());
    }

    #[test]
    fn unknown_platform_is_a_config_error() {
        assert!(matches!(parse("platform = \"mainframe\""), Err(TuneError::Config(_))));
    }

    #[test]
    fn unknown_operation_in_baseline_is_rejected() {
        let cfg = parse("[baseline]\nfan_speed = 3.0").unwrap();
        assert!(matches!(cfg.baselines(), Err(TuneError::Config(_))));
    }

    #[test]
    fn unknown_operation_in_layer_is_rejected() {
        let cfg = parse("[[policy.layer]]\nname = \"x\"\nrules = { warp = { min = 1.0, max = 2.0 } }").unwrap();
        assert!(matches!(cfg.policy_layers(), Err(TuneError::Config(_))));
    }

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = parse(SAMPLE).unwrap();
        save_to(&cfg, &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.baseline, cfg.baseline);
        assert_eq!(loaded.policy, cfg.policy);
        assert_eq!(loaded.monitor, cfg.monitor);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&TuneConfig::default(), &path).expect("save");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_tunekit_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.ends_with(".tunekit/config.toml"));
    }

    // Tests that set TUNEKIT_* variables hold this lock so they never
    // observe each other's values.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let _env = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        // SAFETY: every test touching these variables holds ENV_LOCK.
        unsafe {
            std::env::set_var("TUNEKIT_PLATFORM", "jetson_orin");
            std::env::set_var("TUNEKIT_QUEUE_CAPACITY", "not-a-number");
            std::env::set_var("TUNEKIT_SAMPLE_INTERVAL_MS", "40");
        }
        let mut cfg = TuneConfig::default();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("TUNEKIT_PLATFORM");
            std::env::remove_var("TUNEKIT_QUEUE_CAPACITY");
            std::env::remove_var("TUNEKIT_SAMPLE_INTERVAL_MS");
        }
        assert_eq!(cfg.platform, Some(PlatformProfile::JetsonOrin));
        assert_eq!(cfg.telemetry.queue_capacity, 256);
        assert_eq!(cfg.telemetry.sample_interval_ms, 40);
    }

    #[test]
    fn env_overrides_apply_without_a_config_file() {
        let _env = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let home = tempfile::tempdir().expect("tmp dir");
        // SAFETY: every test touching these variables holds ENV_LOCK.
        unsafe {
            std::env::set_var("TUNEKIT_PLATFORM", "jetson_orin");
            std::env::set_var("TUNEKIT_QUEUE_CAPACITY", "32");
        }
        let loaded = load_for_home(&home.path().to_string_lossy());
        unsafe {
            std::env::remove_var("TUNEKIT_PLATFORM");
            std::env::remove_var("TUNEKIT_QUEUE_CAPACITY");
        }
        let cfg = loaded.expect("missing file is not an error");
        assert_eq!(cfg.platform, Some(PlatformProfile::JetsonOrin));
        assert_eq!(cfg.resolve_platform(), PlatformProfile::JetsonOrin);
        assert_eq!(cfg.telemetry.queue_capacity, 32);
        assert_eq!(cfg.baseline, TuneConfig::default().baseline);
    }

    #[test]
    fn load_without_file_or_overrides_gives_defaults() {
        let _env = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let home = tempfile::tempdir().expect("tmp dir");
        let cfg = load_for_home(&home.path().to_string_lossy()).expect("defaults");
        assert_eq!(cfg, TuneConfig::default());
    }
}
