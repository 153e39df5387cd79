//! Configuration loader
//!
//! ## Loading Strategy
//! 1. The file named by `KEELSON_CONFIG`, if set
//! 2. Otherwise the first file found by [`probe_config_paths`]
//! 3. Otherwise [`KeelsonConfig::default`]
//!
//! Environment overrides are applied on top, then every policy section is
//! validated through its runtime builder.
//!
//! ## Environment Variables
//! - `KEELSON_CONFIG`: Path to a `.toml` or `.json` config file
//! - `KEELSON_LOG_LEVEL`: Filter directive used when `RUST_LOG` is unset
//! - `KEELSON_LOG_FORMAT`: `pretty`, `compact` or `json`
//! - `KEELSON_RATE_LIMIT_DEFAULT`: Default hourly limit per key
//! - `KEELSON_HEALTH_TIMEOUT_MS`: Per-probe health check timeout
//! - `KEELSON_RETRY_JITTER`: Whether retry delays are jittered (true/false)
//! - `KEELSON_DEFAULT_ALERT_RULES`: Whether the standard alert rules load

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use keelson_core::settings::config_error;
use keelson_core::IntoRuntime;
use keelson_domain::{KeelsonConfig, KeelsonError, LogFormat, Result};
use tracing::{debug, info};

const CONFIG_PATH_VAR: &str = "KEELSON_CONFIG";

/// Load configuration from file or defaults, then apply env overrides.
///
/// # Errors
/// Returns `KeelsonError::Config` if:
/// - `KEELSON_CONFIG` names a missing file
/// - The file cannot be parsed
/// - An override has an invalid value
/// - A policy section fails validation
pub fn load() -> Result<KeelsonConfig> {
    let mut config = match env_var(CONFIG_PATH_VAR) {
        Some(path) => load_from_file(Some(PathBuf::from(path)))?,
        None => match probe_config_paths() {
            Some(path) => load_from_file(Some(path))?,
            None => {
                info!("No config file found, using defaults");
                KeelsonConfig::default()
            }
        },
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected by
/// file extension.
///
/// # Errors
/// Returns `KeelsonError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<KeelsonConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(KeelsonError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            KeelsonError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| KeelsonError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<KeelsonConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| KeelsonError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| KeelsonError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(KeelsonError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a config file
///
/// Checks `keelson.toml`, `keelson.json` and `config/keelson.toml` in the
/// working directory, then next to the executable.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf))
    {
        roots.push(exe_dir);
    }

    roots
        .iter()
        .flat_map(|root| {
            [root.join("keelson.toml"), root.join("keelson.json"), root.join("config/keelson.toml")]
        })
        .find(|path| path.exists())
}

/// Apply `KEELSON_*` environment overrides to `config`.
///
/// # Errors
/// Returns `KeelsonError::Config` when a set variable cannot be parsed.
pub fn apply_env_overrides(config: &mut KeelsonConfig) -> Result<()> {
    if let Some(level) = env_var("KEELSON_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env_parse::<LogFormat>("KEELSON_LOG_FORMAT")? {
        config.logging.format = format;
    }
    if let Some(limit) = env_parse::<u32>("KEELSON_RATE_LIMIT_DEFAULT")? {
        config.rate_limits.default_hourly_limit = limit;
    }
    if let Some(timeout_ms) = env_parse::<u64>("KEELSON_HEALTH_TIMEOUT_MS")? {
        config.health.timeout_ms = timeout_ms;
    }
    config.retry.jitter = env_bool("KEELSON_RETRY_JITTER", config.retry.jitter);
    config.monitoring.use_default_rules =
        env_bool("KEELSON_DEFAULT_ALERT_RULES", config.monitoring.use_default_rules);

    debug!(level = %config.logging.level, format = ?config.logging.format, "Environment overrides applied");
    Ok(())
}

/// Check every policy section builds a valid runtime config.
///
/// # Errors
/// Returns the first section's validation failure as `KeelsonError::Config`.
pub fn validate(config: &KeelsonConfig) -> Result<()> {
    config.retry.to_runtime().map_err(config_error)?;
    config.circuit_breaker.to_runtime().map_err(config_error)?;
    config.bulkhead.to_runtime().map_err(config_error)?;
    config.rate_limits.to_runtime().map_err(config_error)?;
    if config.health.timeout_ms == 0 {
        return Err(KeelsonError::Config("health.timeout_ms must be greater than 0".to_string()));
    }
    Ok(())
}

/// Non-empty value of an environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    env_var(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| KeelsonError::Config(format!("Invalid {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    env_var(key)
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
