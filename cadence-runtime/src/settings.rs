use crate::error::ConfigError;
use crate::time_unit::parse_duration_setting;
use config::{Config, File, FileFormat};
use std::path::Path;
use std::time::Duration;

/// Load config from a TOML file, with `APP_` environment overrides.
pub fn load_toml_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    load_config(path.as_ref(), FileFormat::Toml)
}

/// Load config from a YAML file, with `APP_` environment overrides.
pub fn load_yaml_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    load_config(path.as_ref(), FileFormat::Yaml)
}

fn load_config(path: &Path, format: FileFormat) -> Result<Config, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path).format(format))
        .add_source(config::Environment::with_prefix("APP").separator("_"))
        .build()?;
    Ok(config)
}

/// Resolve a placeholder like `${scheduler.tick}` or `${scheduler.tick:16ms}`.
/// Anything else is returned as-is.
pub fn resolve_config_value(value: &str, config: &Config) -> Result<String, ConfigError> {
    let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) else {
        return Ok(value.to_string());
    };

    match inner.split_once(':') {
        Some((key, default_value)) => match config.get_string(key) {
            Ok(resolved) => Ok(resolved),
            Err(_) => Ok(default_value.to_string()),
        },
        None => config
            .get_string(inner)
            .map_err(|_| ConfigError::MissingKey(inner.to_string())),
    }
}

/// Look up `key` and interpret it as a duration. Missing keys yield `None`.
pub fn get_duration(config: &Config, key: &str) -> Result<Option<Duration>, ConfigError> {
    let raw = match config.get_string(key) {
        Ok(raw) => raw,
        Err(config::ConfigError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let resolved = resolve_config_value(&raw, config)?;
    parse_duration_setting(&resolved)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidDuration {
            key: key.to_string(),
            value: resolved,
        })
}
