//! Cadence Transport - request/response plumbing for model sync
//!
//! Every transport implements [`Transport::execute`]. Two forms exist:
//!
//! - [`StatelessTransport`]: one exchange per request, failures go straight
//!   to the error callback.
//! - [`DuplexTransport`]: a persistent channel with correlation ids, an
//!   outbound queue while disconnected, and exponential backoff with jitter
//!   on reconnect.
//!
//! Both deliver results through the callbacks attached to each [`Request`].

mod backoff;
mod correlation;
mod duplex;
mod envelope;
mod error;
mod settings;
mod stateless;
mod transport;

// Re-export public API
pub use backoff::{Backoff, ReconnectPolicy};
pub use correlation::{CorrelationIds, MAX_ID_ATTEMPTS};
pub use duplex::{Channel, ConnectionState, DuplexTransport, DuplexTransportBuilder};
pub use envelope::{InboundEnvelope, OutboundEnvelope};
pub use error::TransportError;
pub use settings::RECONNECT_KEY;
pub use stateless::{Exchange, Respond, StatelessTransport};
pub use transport::{ErrorCallback, Reply, Request, SuccessCallback, Transport, Verb};
