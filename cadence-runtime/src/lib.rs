//! Cadence Runtime - cooperative scheduling core
//!
//! A single-threaded run-loop with an immediate queue and a deadline queue
//! backed by an indexable skip list, plus the configuration plumbing used to
//! build it.

mod settings;
mod error;
mod time_unit;
pub mod scheduler;
pub mod store;

// Re-export public API
pub use settings::{get_duration, load_toml_config, load_yaml_config, resolve_config_value};
pub use error::{BoxError, ConfigError, TaskResult};
pub use scheduler::{
    Clock, ManualClock, RunState, Scheduler, SchedulerBuilder, SystemClock, TaskFault, TaskHandle,
    TaskId, DEFAULT_TICK_INTERVAL,
};
pub use store::SkipList;
pub use time_unit::{parse_duration_setting, TimeUnit};
