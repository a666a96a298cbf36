use crate::envelope::{InboundEnvelope, OutboundEnvelope};
use crate::error::TransportError;
use crate::transport::{Callbacks, Request, Transport};
use cadence_runtime::Scheduler;
use std::cell::RefCell;
use std::rc::Rc;

/// Completion hook handed to an [`Exchange`].
pub type Respond = Box<dyn FnOnce(Result<InboundEnvelope, TransportError>)>;

/// One request/response round trip, performed by the host (an HTTP call,
/// for instance). `respond` must be called at most once.
pub trait Exchange {
    fn exchange(&self, envelope: OutboundEnvelope, respond: Respond);
}

/// Transport that performs one independent exchange per request.
///
/// There is no retry and no connection state: any failure goes straight to
/// the request's error callback. Outcomes are always delivered from a later
/// scheduler tick, even when the exchange answers synchronously.
pub struct StatelessTransport<E> {
    exchange: E,
    scheduler: Scheduler,
}

impl<E: Exchange> StatelessTransport<E> {
    pub fn new(exchange: E, scheduler: Scheduler) -> Self {
        Self {
            exchange,
            scheduler,
        }
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }
}

impl<E: Exchange> Transport for StatelessTransport<E> {
    fn execute(&self, request: Request) {
        let (envelope, callbacks, timeout) = request.into_parts(None);
        tracing::debug!(action = %envelope.action, model = %envelope.model, "exchange");

        // Shared between the response path and the optional timeout; whichever
        // takes the callbacks first settles the request.
        let slot = Rc::new(RefCell::new(Some(callbacks)));

        let timer = timeout.map(|after| {
            let slot = slot.clone();
            self.scheduler.call_later(after, move |_| {
                if let Some(callbacks) = slot.borrow_mut().take() {
                    callbacks.fail(TransportError::Timeout(after), None);
                }
                Ok(())
            })
        });

        let scheduler = self.scheduler.clone();
        self.exchange.exchange(
            envelope,
            Box::new(move |outcome| {
                scheduler.call_soon(move |_| {
                    let Some(callbacks) = slot.borrow_mut().take() else {
                        tracing::debug!("response arrived after the request timed out");
                        return Ok(());
                    };
                    if let Some(timer) = timer {
                        timer.cancel();
                    }
                    deliver(callbacks, outcome);
                    Ok(())
                });
            }),
        );
    }

    fn is_open(&self) -> bool {
        true
    }
}

fn deliver(callbacks: Callbacks, outcome: Result<InboundEnvelope, TransportError>) {
    match outcome {
        Ok(envelope) => callbacks.settle(envelope),
        Err(error) => callbacks.fail(error, None),
    }
}
