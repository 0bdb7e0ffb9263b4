//! Layered configuration for nbexec.
//!
//! Settings resolve in order, later layers winning:
//! 1. built-in defaults
//! 2. global file (`~/.config/nbexec/settings.json` on Linux)
//! 3. project file (`.nbexec/settings.json`)
//! 4. `NBEXEC_*` environment variables
//!
//! CLI flags sit above all of these; the binary applies them after loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};
use crate::timeout::{DEFAULT_BASE_TIMEOUT_SECS, TimeoutRule, default_rules};

/// Complete nbexec configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution-engine process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine binary invoked per job.
    pub bin: String,
    /// Fixed arguments inserted before the input/output paths.
    pub args: Vec<String>,
    /// Seconds granted between terminate and force kill.
    pub grace_period_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bin: "papermill".to_string(),
            args: Vec::new(),
            grace_period_secs: 5,
        }
    }
}

/// Background job manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum jobs pending or running at once. Zero means the default.
    pub max_concurrent: usize,
    /// Log lines returned per page when the caller gives no limit.
    pub log_page_size: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            log_page_size: 500,
        }
    }
}

/// Kernel worker and message-channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Kernel worker binary.
    pub worker_bin: String,
    /// Arguments passed to the worker binary.
    pub worker_args: Vec<String>,
    /// Per-read channel poll timeout (milliseconds).
    pub poll_timeout_ms: u64,
    /// Default per-fragment execution timeout (seconds).
    pub exec_timeout_secs: u64,
    /// Seconds granted between shutdown request and force kill.
    pub shutdown_grace_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            worker_bin: "jupyter-kernel".to_string(),
            worker_args: Vec::new(),
            poll_timeout_ms: 250,
            exec_timeout_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

/// Timeout calibration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Fallback timeout when no rule matches (seconds).
    pub base_secs: u64,
    /// Calibration rules, matched in table order.
    pub rules: Vec<TimeoutRule>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base_secs: DEFAULT_BASE_TIMEOUT_SECS,
            rules: default_rules(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit structured JSON log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Resolve the effective configuration for a project directory.
///
/// Missing files are fine; an unreadable or malformed file is an error
/// rather than a silent fallback to defaults.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".nbexec").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Per-OS location of the global settings file.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".nbexec").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/nbexec/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("nbexec").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.engine = overlay.engine;
    base.jobs = overlay.jobs;
    base.kernel = overlay.kernel;
    base.logging = overlay.logging;

    // Keep the builtin calibration table when the overlay defines none.
    base.timeouts.base_secs = overlay.timeouts.base_secs;
    if !overlay.timeouts.rules.is_empty() {
        base.timeouts.rules = overlay.timeouts.rules;
    }
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

// Takes the variable lookup as a closure so tests can inject values
// without mutating process state.
fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("NBEXEC_ENGINE_BIN") {
        config.engine.bin = val;
    }
    if let Some(val) = lookup("NBEXEC_MAX_JOBS") {
        match val.parse() {
            Ok(n) => config.jobs.max_concurrent = n,
            Err(_) => warn!(value = %val, "Ignoring unparseable NBEXEC_MAX_JOBS"),
        }
    }
    if let Some(val) = lookup("NBEXEC_DEFAULT_TIMEOUT_SECS") {
        match val.parse() {
            Ok(n) => config.timeouts.base_secs = n,
            Err(_) => warn!(value = %val, "Ignoring unparseable NBEXEC_DEFAULT_TIMEOUT_SECS"),
        }
    }
    if let Some(val) = lookup("NBEXEC_WORKER_BIN") {
        config.kernel.worker_bin = val;
    }
    if let Some(val) = lookup("NBEXEC_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("NBEXEC_LOG_JSON") {
        config.logging.json = val == "1" || val.eq_ignore_ascii_case("true");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_ships_calibration_rules() {
        let config = Config::default();
        assert!(!config.timeouts.rules.is_empty());
        assert_eq!(config.timeouts.base_secs, DEFAULT_BASE_TIMEOUT_SECS);
    }

    #[test]
    fn default_config_bounds_concurrency() {
        let config = Config::default();
        assert_eq!(config.jobs.max_concurrent, 5);
        assert_eq!(config.engine.grace_period_secs, 5);
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join(".nbexec");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(
            nested.join("settings.json"),
            r#"{"jobs": {"max_concurrent": 2, "log_page_size": 10}}"#,
        )
        .expect("write settings");

        let config = load_config(Some(dir.path())).expect("load");
        assert_eq!(config.jobs.max_concurrent, 2);
        assert_eq!(config.jobs.log_page_size, 10);
        // Sections absent from the file keep their defaults.
        assert_eq!(config.engine.bin, "papermill");
        assert!(!config.timeouts.rules.is_empty());
    }

    #[test]
    fn malformed_config_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join(".nbexec");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(nested.join("settings.json"), "{not json").expect("write settings");

        let err = load_config(Some(dir.path())).expect_err("should fail");
        match err {
            Error::ConfigParse { path, .. } => assert!(path.ends_with("settings.json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    fn lookup_from<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, val)| (*val).to_string())
        }
    }

    #[test]
    fn env_overrides_apply_over_defaults() {
        let vars = [
            ("NBEXEC_ENGINE_BIN", "jupyter-execute"),
            ("NBEXEC_MAX_JOBS", "9"),
            ("NBEXEC_LOG_JSON", "true"),
        ];

        let mut config = Config::default();
        apply_overrides(&mut config, lookup_from(&vars));

        assert_eq!(config.engine.bin, "jupyter-execute");
        assert_eq!(config.jobs.max_concurrent, 9);
        assert!(config.logging.json);
        // Untouched variables keep their defaults.
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn unparseable_env_value_is_ignored() {
        let vars = [
            ("NBEXEC_MAX_JOBS", "bogus"),
            ("NBEXEC_DEFAULT_TIMEOUT_SECS", "soon"),
        ];

        let mut config = Config::default();
        apply_overrides(&mut config, lookup_from(&vars));

        assert_eq!(config.jobs.max_concurrent, 5);
        assert_eq!(config.timeouts.base_secs, DEFAULT_BASE_TIMEOUT_SECS);
    }
}
