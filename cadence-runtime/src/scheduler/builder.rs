use super::clock::{Clock, SystemClock};
use super::scheduler::Scheduler;
use crate::settings::{get_duration, load_toml_config, load_yaml_config};
use crate::error::ConfigError;
use config::Config;
use std::rc::Rc;
use std::time::Duration;

/// Pause between two ticks when nothing else is configured; roughly one
/// animation frame.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Builder for the scheduler
pub struct SchedulerBuilder {
    config: Config,
    clock: Option<Rc<dyn Clock>>,
    tick_interval: Option<Duration>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    /// Create a new scheduler builder with default config (empty)
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create with TOML config file
    pub fn with_toml(path: &str) -> Result<Self, ConfigError> {
        Ok(Self::with_config(load_toml_config(path)?))
    }

    /// Create with YAML config file
    pub fn with_yaml(path: &str) -> Result<Self, ConfigError> {
        Ok(Self::with_config(load_yaml_config(path)?))
    }

    /// Create with custom config
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            clock: None,
            tick_interval: None,
        }
    }

    /// Use `clock` instead of the wall clock.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Rc::new(clock));
        self
    }

    /// Override `scheduler.tick_interval` from the config.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Read the configuration the scheduler needs. Nothing runs until
    /// [`Scheduler::run`] is called.
    pub fn build(self) -> Result<Scheduler, ConfigError> {
        let tick_interval = match self.tick_interval {
            Some(interval) => interval,
            None => get_duration(&self.config, "scheduler.tick_interval")?
                .unwrap_or(DEFAULT_TICK_INTERVAL),
        };
        let clock = self.clock.unwrap_or_else(|| Rc::new(SystemClock));

        tracing::debug!(tick_interval_ms = tick_interval.as_millis() as u64, "scheduler configured");
        Ok(Scheduler::from_parts(clock, tick_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    #[test]
    fn tick_interval_from_config() {
        let config = Config::builder()
            .add_source(File::from_str(
                "[scheduler]\ntick_interval = \"${app.frame:40ms}\"\n",
                FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let scheduler = SchedulerBuilder::with_config(config).build().unwrap();
        assert_eq!(scheduler.tick_interval(), Duration::from_millis(40));
    }

    #[test]
    fn explicit_interval_wins() {
        let scheduler = SchedulerBuilder::new()
            .tick_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        assert_eq!(scheduler.tick_interval(), Duration::from_millis(5));
    }

    #[test]
    fn defaults_without_config() {
        let scheduler = SchedulerBuilder::new().build().unwrap();
        assert_eq!(scheduler.tick_interval(), DEFAULT_TICK_INTERVAL);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            SchedulerBuilder::with_toml("does/not/exist.toml"),
            Err(ConfigError::Load(_))
        ));
    }
}
