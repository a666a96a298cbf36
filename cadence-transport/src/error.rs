use std::time::Duration;
use thiserror::Error;

/// Failures delivered to a request's error callback.
///
/// Connection drops on their own never reach callers: they are handled by
/// the reconnect policy. Only a permanent give-up or an explicit shutdown
/// turns into `ConnectionLost` / `Shutdown` for whatever was still pending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection lost before a reply arrived")]
    ConnectionLost,

    #[error("transport has been shut down")]
    Shutdown,

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("remote error: {0}")]
    Application(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("no free correlation id after {0} attempts")]
    IdSpaceExhausted(usize),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("exchange failed: {0}")]
    Exchange(String),
}
