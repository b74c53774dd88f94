//! YAML probe manifests.
//!
//! A manifest replaces the built-in ClickHouse/MinIO/RabbitMQ probe set with an explicit
//! list. Values missing from a probe fall back to the manifest `defaults` block, then to
//! the process-wide [`ProbeDefaults`].

use super::{parse_duration_value, validate_http_url, ProbeDefaults, ValidationError};
use crate::error::{Context, Result};
use crate::probe::{ProbeSpec, ProbeTarget};
use crate::retry::FixedRetryPolicy;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    defaults: Option<RawDefaults>,
    #[serde(default)]
    probes: Vec<RawProbe>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefaults {
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    retry_delay: Option<String>,
    #[serde(default)]
    attempt_timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProbe {
    #[serde(default)]
    name: String,
    #[serde(default)]
    http: Option<String>,
    #[serde(default)]
    tcp: Option<String>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    retry_delay: Option<String>,
    #[serde(default)]
    attempt_timeout: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeManifest {
    probes: Vec<ProbeSpec>,
}

impl ProbeManifest {
    pub fn from_path(path: impl AsRef<Path>, defaults: &ProbeDefaults) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read probe manifest {}", path.display()))?;
        Self::parse(&raw, &path.display().to_string(), defaults)
    }

    pub fn from_reader<R: Read>(mut reader: R, defaults: &ProbeDefaults) -> Result<Self> {
        let mut raw = String::new();
        reader
            .read_to_string(&mut raw)
            .context("failed to read probe manifest")?;
        Self::parse(&raw, "manifest input", defaults)
    }

    pub fn probes(&self) -> &[ProbeSpec] {
        &self.probes
    }

    pub fn into_probes(self) -> Vec<ProbeSpec> {
        self.probes
    }

    fn parse(raw: &str, origin: &str, defaults: &ProbeDefaults) -> Result<Self> {
        let manifest: RawManifest = serde_yaml::from_str(raw)
            .with_context(|| format!("{origin} is not a valid probe manifest"))?;

        let mut errors = Vec::new();
        let defaults = resolve_defaults(manifest.defaults.unwrap_or_default(), defaults, &mut errors);

        if manifest.probes.is_empty() {
            errors.push("probes: at least one probe must be declared".to_string());
        }

        let mut seen = BTreeSet::new();
        let mut probes = Vec::with_capacity(manifest.probes.len());
        for (index, raw_probe) in manifest.probes.into_iter().enumerate() {
            let name = raw_probe.name.trim().to_string();
            let label = if name.is_empty() {
                format!("probes[{index}]")
            } else {
                format!("probes[{index}] ({name})")
            };
            if !name.is_empty() && !seen.insert(name.clone()) {
                errors.push(format!("{label}: duplicate probe name `{name}`"));
            }
            if let Some(spec) = resolve_probe(raw_probe, &label, &defaults, &mut errors) {
                probes.push(spec);
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError {
                origin: origin.to_string(),
                errors,
            }
            .into());
        }

        Ok(Self { probes })
    }
}

fn resolve_defaults(
    raw: RawDefaults,
    fallback: &ProbeDefaults,
    errors: &mut Vec<String>,
) -> ProbeDefaults {
    let max_attempts = match raw.max_attempts {
        Some(0) => {
            errors.push("defaults.max_attempts must be at least 1".to_string());
            fallback.max_attempts
        }
        Some(value) => value,
        None => fallback.max_attempts,
    };
    let retry_delay = parse_duration_value("defaults.retry_delay", raw.retry_delay, errors)
        .unwrap_or(fallback.retry_delay);
    let attempt_timeout =
        parse_duration_value("defaults.attempt_timeout", raw.attempt_timeout, errors)
            .unwrap_or(fallback.attempt_timeout);

    ProbeDefaults {
        max_attempts,
        retry_delay,
        attempt_timeout,
    }
}

fn resolve_probe(
    raw: RawProbe,
    label: &str,
    defaults: &ProbeDefaults,
    errors: &mut Vec<String>,
) -> Option<ProbeSpec> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        errors.push(format!("{label}: name must not be empty"));
    }

    let target = match (raw.http.as_deref(), raw.tcp.as_deref()) {
        (Some(url), None) => match validate_http_url(url.trim()) {
            Ok(url) => Some(ProbeTarget::Http(url)),
            Err(reason) => {
                errors.push(format!("{label}: http: {reason}"));
                None
            }
        },
        (None, Some(address)) => {
            let target = ProbeTarget::parse_tcp(address);
            if target.is_none() {
                errors.push(format!(
                    "{label}: tcp: `{address}` must be written as host:port"
                ));
            }
            target
        }
        (Some(_), Some(_)) => {
            errors.push(format!("{label}: set exactly one of `http` or `tcp`, not both"));
            None
        }
        (None, None) => {
            errors.push(format!("{label}: one of `http` or `tcp` is required"));
            None
        }
    };

    let max_attempts = match raw.max_attempts {
        Some(0) => {
            errors.push(format!("{label}: max_attempts must be at least 1"));
            None
        }
        Some(value) => Some(value),
        None => Some(defaults.max_attempts),
    };
    let retry_delay = parse_duration_value(&format!("{label}: retry_delay"), raw.retry_delay, errors)
        .unwrap_or(defaults.retry_delay);
    let attempt_timeout = parse_duration_value(
        &format!("{label}: attempt_timeout"),
        raw.attempt_timeout,
        errors,
    )
    .unwrap_or(defaults.attempt_timeout);
    if attempt_timeout.is_zero() {
        errors.push(format!("{label}: attempt_timeout must be greater than zero"));
    }

    if name.is_empty() {
        return None;
    }

    Some(
        ProbeSpec::new(name, target?)
            .with_retry_policy(FixedRetryPolicy::new(max_attempts?, retry_delay))
            .with_attempt_timeout(attempt_timeout),
    )
}
