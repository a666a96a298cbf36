use crate::backoff::ReconnectPolicy;
use cadence_runtime::{parse_duration_setting, resolve_config_value, ConfigError};
use config::Config;
use serde::Deserialize;
use std::time::Duration;

/// Config key holding the reconnect settings.
pub const RECONNECT_KEY: &str = "transport.reconnect";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReconnectSettings {
    initial_delay: Option<String>,
    max_delay: Option<String>,
    growth_factor: Option<f64>,
    jitter_factor: Option<f64>,
    max_retries: Option<u32>,
}

impl ReconnectPolicy {
    /// Read `transport.reconnect` from `config`, falling back to the
    /// defaults for anything not set.
    ///
    /// ```toml
    /// [transport.reconnect]
    /// initial_delay = "250ms"
    /// max_delay = "${app.max_backoff:30s}"
    /// growth_factor = 2.0
    /// jitter_factor = 0.1
    /// max_retries = 10
    /// ```
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let settings = match config.get::<ReconnectSettings>(RECONNECT_KEY) {
            Ok(settings) => settings,
            Err(config::ConfigError::NotFound(_)) => ReconnectSettings::default(),
            Err(e) => return Err(e.into()),
        };
        let defaults = ReconnectPolicy::default();

        let policy = ReconnectPolicy {
            initial_delay: duration_or(config, "initial_delay", settings.initial_delay, defaults.initial_delay)?,
            max_delay: duration_or(config, "max_delay", settings.max_delay, defaults.max_delay)?,
            growth_factor: settings.growth_factor.unwrap_or(defaults.growth_factor),
            jitter_factor: settings.jitter_factor.unwrap_or(defaults.jitter_factor),
            max_retries: settings.max_retries.or(defaults.max_retries),
        };

        if !(policy.growth_factor >= 1.0 && policy.growth_factor.is_finite()) {
            return Err(invalid("growth_factor", policy.growth_factor, "must be at least 1.0"));
        }
        if !(policy.jitter_factor >= 0.0 && policy.jitter_factor.is_finite()) {
            return Err(invalid("jitter_factor", policy.jitter_factor, "must not be negative"));
        }
        tracing::debug!(?policy, "reconnect policy loaded");
        Ok(policy)
    }
}

fn duration_or(
    config: &Config,
    field: &str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let resolved = resolve_config_value(&raw, config)?;
    parse_duration_setting(&resolved).ok_or_else(|| ConfigError::InvalidDuration {
        key: format!("{RECONNECT_KEY}.{field}"),
        value: resolved,
    })
}

fn invalid(field: &str, value: f64, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("{RECONNECT_KEY}.{field}"),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
