//! Process-wide webhook configuration.
//!
//! Built once at startup from environment variables and shared read-only
//! behind an `Arc` for the lifetime of the process.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::policy::{PolicyConfig, PolicyMode};
use crate::report::Severity;
use crate::scanner::DEFAULT_MAX_OUTPUT_BYTES;

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Default health/metrics server port
pub const HEALTH_PORT: u16 = 8080;

/// Default scanner binary
pub const DEFAULT_SCANNER_PATH: &str = "kubescape";
/// Default scanner arguments
pub const DEFAULT_SCANNER_ARGS: &str = "scan - --format json --logger error";
/// Default scanner timeout, matching the API server's default webhook timeout
pub const DEFAULT_SCANNER_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while loading configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// How to run the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_SCANNER_PATH),
            args: split_args(DEFAULT_SCANNER_ARGS),
            timeout: DEFAULT_SCANNER_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Listener and TLS settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub webhook_port: u16,
    pub health_port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            webhook_port: WEBHOOK_PORT,
            health_port: HEALTH_PORT,
            cert_path: PathBuf::from(WEBHOOK_CERT_PATH),
            key_path: PathBuf::from(WEBHOOK_KEY_PATH),
        }
    }
}

/// Complete webhook configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookConfig {
    pub scanner: ScannerConfig,
    pub policy: PolicyConfig,
    pub server: ServerConfig,
}

impl WebhookConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let args = match get("SCANNER_ARGS") {
            Some(raw) => split_args(&raw),
            None => defaults.scanner.args,
        };

        let timeout_secs: f64 = parse_var(&get, "SCANNER_TIMEOUT_SECS")?
            .unwrap_or(defaults.scanner.timeout.as_secs_f64());
        let timeout = Duration::try_from_secs_f64(timeout_secs)
            .ok()
            .filter(|t| !t.is_zero())
            .ok_or_else(|| {
                invalid(
                    "SCANNER_TIMEOUT_SECS",
                    timeout_secs.to_string(),
                    "must be a positive number of seconds",
                )
            })?;

        let max_output_bytes: usize = parse_var(&get, "SCANNER_MAX_OUTPUT_BYTES")?
            .unwrap_or(defaults.scanner.max_output_bytes);
        if max_output_bytes == 0 {
            return Err(invalid(
                "SCANNER_MAX_OUTPUT_BYTES",
                "0".to_string(),
                "must be greater than zero",
            ));
        }

        let max_severity_score: f64 = parse_var(&get, "MAX_SEVERITY_SCORE")?
            .unwrap_or(defaults.policy.max_severity_score);
        if !max_severity_score.is_finite() || max_severity_score < 0.0 {
            return Err(invalid(
                "MAX_SEVERITY_SCORE",
                max_severity_score.to_string(),
                "must be a finite non-negative number",
            ));
        }

        let count_only_failing_controls = match get("COUNT_ONLY_FAILING_CONTROLS") {
            Some(raw) => parse_bool("COUNT_ONLY_FAILING_CONTROLS", &raw)?,
            None => defaults.policy.count_only_failing_controls,
        };

        Ok(Self {
            scanner: ScannerConfig {
                program: get("SCANNER_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.scanner.program),
                args,
                timeout,
                max_output_bytes,
            },
            policy: PolicyConfig {
                mode: parse_var::<PolicyMode, _>(&get, "POLICY_MODE")?
                    .unwrap_or(defaults.policy.mode),
                severity_cutoff: parse_var::<Severity, _>(&get, "SEVERITY_CUTOFF")?
                    .unwrap_or(defaults.policy.severity_cutoff),
                max_severity_score,
                count_only_failing_controls,
            },
            server: ServerConfig {
                webhook_port: parse_var(&get, "WEBHOOK_PORT")?
                    .unwrap_or(defaults.server.webhook_port),
                health_port: parse_var(&get, "HEALTH_PORT")?
                    .unwrap_or(defaults.server.health_port),
                cert_path: get("WEBHOOK_CERT_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.server.cert_path),
                key_path: get("WEBHOOK_KEY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.server.key_path),
            },
        })
    }
}

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.into(),
    }
}

fn parse_var<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(var, raw.clone(), e.to_string())),
        None => Ok(None),
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(var, raw.to_string(), "expected true or false")),
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
