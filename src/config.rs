pub mod manifest;

use crate::error::Result;
use crate::gate::GateMode;
use crate::probe::{ProbeSpec, DEFAULT_ATTEMPT_TIMEOUT};
use crate::retry::{FixedRetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use config::{Config, Environment, File};
use humantime::parse_duration;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use url::Url;

pub use manifest::ProbeManifest;

pub const DEFAULT_CLICKHOUSE_HEALTH_URL: &str = "http://clickhouse:8123/ping";
pub const DEFAULT_MINIO_HEALTH_URL: &str = "http://minio:9000/minio/health/live";
pub const DEFAULT_RABBITMQ_HOST: &str = "rabbitmq";
pub const DEFAULT_RABBITMQ_PORT: u16 = 5672;

const CONFIG_FILE: &str = "config/readiness-gate";

/// Every problem found while resolving a configuration source, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub origin: String,
    pub errors: Vec<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is invalid", self.origin)?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Attempt budget and timings applied to probes that do not set their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeDefaults {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for ProbeDefaults {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl ProbeDefaults {
    pub fn apply(&self, spec: ProbeSpec) -> ProbeSpec {
        spec.with_retry_policy(FixedRetryPolicy::new(self.max_attempts, self.retry_delay))
            .with_attempt_timeout(self.attempt_timeout)
    }
}

/// Process-wide settings, resolved once at startup and passed into the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateConfig {
    pub clickhouse_health_url: Url,
    pub minio_health_url: Url,
    pub rabbitmq_host: String,
    pub rabbitmq_port: u16,
    pub probe_defaults: ProbeDefaults,
    pub mode: GateMode,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGateConfig {
    #[serde(default)]
    clickhouse_health_url: Option<String>,
    #[serde(default)]
    minio_health_url: Option<String>,
    #[serde(default)]
    rabbitmq_host: Option<String>,
    #[serde(default)]
    rabbitmq_port: Option<String>,
    #[serde(default)]
    gate_max_attempts: Option<String>,
    #[serde(default)]
    gate_retry_delay: Option<String>,
    #[serde(default)]
    gate_attempt_timeout: Option<String>,
    #[serde(default)]
    gate_mode: Option<String>,
    #[serde(default)]
    gate_deadline: Option<String>,
}

impl GateConfig {
    /// Reads `config/readiness-gate.{toml,yaml}` when present, then the process environment.
    pub fn load() -> Result<Self> {
        let raw: RawGateConfig = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;
        Self::resolve(raw, "environment")
    }

    /// Resolves settings from an explicit variable set instead of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source: config::Map<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        let raw: RawGateConfig = Config::builder()
            .add_source(Environment::default().source(Some(source)))
            .build()?
            .try_deserialize()?;
        Self::resolve(raw, "environment")
    }

    fn resolve(raw: RawGateConfig, origin: &str) -> Result<Self> {
        let mut errors = Vec::new();

        let clickhouse_health_url = parse_http_url(
            "CLICKHOUSE_HEALTH_URL",
            raw.clickhouse_health_url
                .as_deref()
                .unwrap_or(DEFAULT_CLICKHOUSE_HEALTH_URL),
            &mut errors,
        );
        let minio_health_url = parse_http_url(
            "MINIO_HEALTH_URL",
            raw.minio_health_url
                .as_deref()
                .unwrap_or(DEFAULT_MINIO_HEALTH_URL),
            &mut errors,
        );

        let rabbitmq_host = match raw.rabbitmq_host.map(|host| host.trim().to_string()) {
            Some(host) if host.is_empty() => {
                errors.push("RABBITMQ_HOST must not be empty".to_string());
                String::new()
            }
            Some(host) => host,
            None => DEFAULT_RABBITMQ_HOST.to_string(),
        };

        let rabbitmq_port = match raw.rabbitmq_port.as_deref().map(str::trim) {
            None => DEFAULT_RABBITMQ_PORT,
            Some(value) => match value.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    errors.push(format!("RABBITMQ_PORT must be a port number, got `{value}`"));
                    DEFAULT_RABBITMQ_PORT
                }
            },
        };

        let defaults = ProbeDefaults::default();
        let max_attempts = match raw.gate_max_attempts.as_deref().map(str::trim) {
            None => defaults.max_attempts,
            Some(value) => match value.parse::<u32>() {
                Ok(attempts) if attempts > 0 => attempts,
                _ => {
                    errors.push(format!(
                        "GATE_MAX_ATTEMPTS must be a positive integer, got `{value}`"
                    ));
                    defaults.max_attempts
                }
            },
        };
        let retry_delay = parse_duration_value("GATE_RETRY_DELAY", raw.gate_retry_delay, &mut errors)
            .unwrap_or(defaults.retry_delay);
        let attempt_timeout =
            parse_duration_value("GATE_ATTEMPT_TIMEOUT", raw.gate_attempt_timeout, &mut errors)
                .unwrap_or(defaults.attempt_timeout);
        if attempt_timeout.is_zero() {
            errors.push("GATE_ATTEMPT_TIMEOUT must be greater than zero".to_string());
        }

        let mode = match raw.gate_mode {
            None => GateMode::default(),
            Some(value) => value.parse::<GateMode>().unwrap_or_else(|err| {
                errors.push(format!("GATE_MODE: {err}"));
                GateMode::default()
            }),
        };

        let deadline = parse_duration_value("GATE_DEADLINE", raw.gate_deadline, &mut errors);

        match (clickhouse_health_url, minio_health_url) {
            (Some(clickhouse_health_url), Some(minio_health_url)) if errors.is_empty() => {
                Ok(Self {
                    clickhouse_health_url,
                    minio_health_url,
                    rabbitmq_host,
                    rabbitmq_port,
                    probe_defaults: ProbeDefaults {
                        max_attempts,
                        retry_delay,
                        attempt_timeout,
                    },
                    mode,
                    deadline,
                })
            }
            _ => Err(ValidationError {
                origin: origin.to_string(),
                errors,
            }
            .into()),
        }
    }

    /// ClickHouse, MinIO and RabbitMQ, in the order the service depends on them.
    pub fn default_probes(&self) -> Vec<ProbeSpec> {
        vec![
            self.probe_defaults
                .apply(ProbeSpec::http("ClickHouse", self.clickhouse_health_url.clone())),
            self.probe_defaults
                .apply(ProbeSpec::http("MinIO", self.minio_health_url.clone())),
            self.probe_defaults.apply(ProbeSpec::tcp(
                "RabbitMQ",
                self.rabbitmq_host.clone(),
                self.rabbitmq_port,
            )),
        ]
    }
}

fn parse_http_url(label: &str, value: &str, errors: &mut Vec<String>) -> Option<Url> {
    match validate_http_url(value.trim()) {
        Ok(url) => Some(url),
        Err(reason) => {
            errors.push(format!("{label}: {reason}"));
            None
        }
    }
}

pub(crate) fn validate_http_url(value: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(value).map_err(|err| format!("`{value}` is not a valid URL: {err}"))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(format!("`{value}` has no host")),
        other => Err(format!("`{value}` uses unsupported scheme `{other}`")),
    }
}

pub(crate) fn parse_duration_value(
    field_label: &str,
    raw: Option<String>,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    let raw_value = raw?;
    let trimmed = raw_value.trim();
    if trimmed.is_empty() {
        errors.push(format!("{field_label} must not be empty"));
        return None;
    }

    match parse_duration(trimmed) {
        Ok(duration) => Some(duration),
        Err(err) => {
            errors.push(format!(
                "{field_label}: `{trimmed}` is not a valid duration ({err})"
            ));
            None
        }
    }
}
