//! # Cadence - cooperative scheduling and reconnecting transports
//!
//! Client-side plumbing for keeping models in sync with a backend:
//!
//! - **Scheduler**: a single-threaded run-loop with `call_soon`,
//!   `call_later`, `call_at`, `call_every` and `call_interval`, each returning
//!   a cancellable [`TaskHandle`]
//! - **Deadline store**: an indexable skip list keeps timed work ordered by
//!   deadline, ties in scheduling order
//! - **Transports**: a stateless request/response form and a duplex form that
//!   correlates replies by id and reconnects with exponential backoff
//! - **Config support**: TOML/YAML files with `APP_` environment overrides
//!   and `${key:default}` placeholders
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cadence::{
//!     Channel, DuplexTransport, ReconnectPolicy, Request, SchedulerBuilder, Transport,
//!     TransportError, Verb,
//! };
//!
//! struct Socket;
//!
//! impl Channel for Socket {
//!     fn open(&self) -> Result<(), TransportError> { Ok(()) }
//!     fn send(&self, _frame: &str) -> Result<(), TransportError> { Ok(()) }
//!     fn close(&self) {}
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let local = tokio::task::LocalSet::new();
//!     local.run_until(async {
//!         let scheduler = SchedulerBuilder::with_toml("config/application.toml")?.build()?;
//!         let policy = ReconnectPolicy::from_config(&cadence::load_toml_config("config/application.toml")?)?;
//!         let transport = DuplexTransport::new(Socket, scheduler.clone(), policy);
//!
//!         scheduler.run();
//!         transport.connect();
//!         transport.execute(
//!             Request::new(Verb::Read, "page")
//!                 .on_success(|reply| println!("page: {}", reply.data)),
//!         );
//!         Ok::<_, Box<dyn std::error::Error>>(())
//!     }).await
//! }
//! ```
//!
//! ## Configuration
//!
//! Create `config/application.toml`:
//!
//! ```toml
//! [scheduler]
//! tick_interval = "16ms"
//!
//! [transport.reconnect]
//! initial_delay = "500ms"
//! max_delay = "${app.max_backoff:30s}"
//! growth_factor = 2.0
//! jitter_factor = 0.1
//! max_retries = 20
//! ```
//!
//! Environment variables with the `APP_` prefix override file values, with
//! `_` separating key segments (`APP_APP_CAP=10s` sets `app.cap`).

// Re-export core types
pub use cadence_runtime::{
    get_duration, load_toml_config, load_yaml_config, resolve_config_value, BoxError, Clock,
    ConfigError, ManualClock, RunState, Scheduler, SchedulerBuilder, SkipList, SystemClock,
    TaskFault, TaskHandle, TaskId, TaskResult, TimeUnit, DEFAULT_TICK_INTERVAL,
};

// Re-export transports
pub use cadence_transport::{
    Backoff, Channel, ConnectionState, CorrelationIds, DuplexTransport, DuplexTransportBuilder,
    Exchange, InboundEnvelope, OutboundEnvelope, ReconnectPolicy, Reply, Request, Respond,
    StatelessTransport, Transport, TransportError, Verb,
};

pub use cadence_runtime;
pub use cadence_transport;
