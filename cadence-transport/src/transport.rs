use crate::envelope::{InboundEnvelope, OutboundEnvelope};
use crate::error::TransportError;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Uniform contract implemented by every transport.
pub trait Transport {
    /// Send `request`. Results, if any, arrive through the request's
    /// callbacks on a later tick; this never blocks and never fails.
    fn execute(&self, request: Request);

    fn is_open(&self) -> bool;
}

/// Intent of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
    /// Anything outside CRUD, such as `ping`.
    Custom(String),
}

impl Verb {
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Create => "create",
            Verb::Read => "read",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Custom(action) => action,
        }
    }
}

impl From<&str> for Verb {
    fn from(action: &str) -> Self {
        match action {
            "create" => Verb::Create,
            "read" => Verb::Read,
            "update" => Verb::Update,
            "delete" => Verb::Delete,
            other => Verb::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful reply handed to `on_success`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub data: Value,
    pub envelope: InboundEnvelope,
}

pub type SuccessCallback = Box<dyn FnOnce(Reply)>;
pub type ErrorCallback = Box<dyn FnOnce(TransportError, Option<InboundEnvelope>)>;

/// A request for a transport.
///
/// ```rust
/// use cadence_transport::{Request, Verb};
/// use serde_json::json;
///
/// let request = Request::new(Verb::Update, "page")
///     .payload(vec![json!({"id": 1, "title": "Home"})])
///     .on_success(|reply| println!("saved: {}", reply.data))
///     .on_error(|error, _| eprintln!("save failed: {error}"));
/// assert!(request.expects_reply());
/// ```
pub struct Request {
    pub verb: Verb,
    pub model: String,
    pub payload: Vec<Value>,
    pub timeout: Option<Duration>,
    callbacks: Callbacks,
}

impl Request {
    pub fn new(verb: impl Into<Verb>, model: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            model: model.into(),
            payload: Vec::new(),
            timeout: None,
            callbacks: Callbacks::default(),
        }
    }

    pub fn payload(mut self, payload: Vec<Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Reply) + 'static,
    {
        self.callbacks.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(TransportError, Option<InboundEnvelope>) + 'static,
    {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    /// Fail the request with [`TransportError::Timeout`] if no reply arrives
    /// within `after`.
    pub fn timeout(mut self, after: Duration) -> Self {
        self.timeout = Some(after);
        self
    }

    /// A request expects a reply when it has somewhere to deliver it.
    pub fn expects_reply(&self) -> bool {
        self.callbacks.on_success.is_some() || self.callbacks.on_error.is_some()
    }

    pub(crate) fn into_parts(self, mid: Option<String>) -> (OutboundEnvelope, Callbacks, Option<Duration>) {
        let envelope = OutboundEnvelope {
            mid,
            action: self.verb.as_str().to_string(),
            model: self.model,
            data: self.payload,
        };
        (envelope, self.callbacks, self.timeout)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("verb", &self.verb)
            .field("model", &self.model)
            .field("payload", &self.payload)
            .field("timeout", &self.timeout)
            .field("expects_reply", &self.expects_reply())
            .finish()
    }
}

/// The pair of callbacks attached to a request; consumed by whichever
/// outcome happens first.
#[derive(Default)]
pub(crate) struct Callbacks {
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub(crate) fn succeed(self, reply: Reply) {
        if let Some(on_success) = self.on_success {
            on_success(reply);
        }
    }

    pub(crate) fn fail(self, error: TransportError, envelope: Option<InboundEnvelope>) {
        match self.on_error {
            Some(on_error) => on_error(error, envelope),
            None => tracing::debug!(%error, "request failed without an error callback"),
        }
    }

    /// Route a reply envelope to the matching callback.
    pub(crate) fn settle(self, envelope: InboundEnvelope) {
        match envelope.error.clone() {
            Some(error) => self.fail(TransportError::Application(error), Some(envelope)),
            None => self.succeed(Reply {
                data: envelope.data.clone(),
                envelope,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn verbs_round_trip_through_action_strings() {
        for verb in [Verb::Create, Verb::Read, Verb::Update, Verb::Delete] {
            assert_eq!(Verb::from(verb.as_str()), verb);
        }
        assert_eq!(Verb::from("ping"), Verb::Custom("ping".into()));
        assert_eq!(Verb::Custom("ping".into()).to_string(), "ping");
    }

    #[test]
    fn requests_without_callbacks_are_fire_and_forget() {
        let request = Request::new("delete", "block").payload(vec![json!(3)]);
        assert!(!request.expects_reply());
        let (envelope, _, timeout) = request.into_parts(None);
        assert_eq!(envelope.action, "delete");
        assert_eq!(envelope.data, vec![json!(3)]);
        assert_eq!(timeout, None);
    }

    #[test]
    fn settle_routes_remote_errors_to_on_error() {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let ok = seen.clone();
        let err = seen.clone();
        let request = Request::new(Verb::Read, "page")
            .on_success(move |reply| ok.borrow_mut().push(format!("ok {}", reply.data)))
            .on_error(move |error, envelope| {
                err.borrow_mut()
                    .push(format!("err {error} {}", envelope.is_some()))
            });
        let (_, callbacks, _) = request.into_parts(Some("m1".into()));
        callbacks.settle(InboundEnvelope::failure("m1", "forbidden"));

        assert_eq!(*seen.borrow(), vec!["err remote error: forbidden true".to_string()]);
    }
}
