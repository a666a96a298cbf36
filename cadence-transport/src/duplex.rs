use crate::backoff::{Backoff, ReconnectPolicy};
use crate::correlation::CorrelationIds;
use crate::envelope::InboundEnvelope;
use crate::error::TransportError;
use crate::transport::{Callbacks, Request, Transport};
use cadence_runtime::{Scheduler, TaskHandle};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The persistent channel underneath a [`DuplexTransport`], typically a
/// websocket owned by the host.
///
/// `open` only starts connecting. The host reports what happens next through
/// [`DuplexTransport::on_open`], [`DuplexTransport::on_message`] and
/// [`DuplexTransport::on_close`]. A `send` that fails while the transport is
/// open counts as a close: the frame stays queued and the transport
/// reconnects through `open`.
pub trait Channel {
    fn open(&self) -> Result<(), TransportError>;
    fn send(&self, frame: &str) -> Result<(), TransportError>;
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// The reconnect policy gave up, or the transport was shut down.
    Closed,
}

struct QueuedFrame {
    mid: Option<String>,
    frame: String,
}

struct PendingRequest {
    seq: u64,
    callbacks: Callbacks,
    timeout: Option<TaskHandle>,
}

struct Inner<C> {
    channel: C,
    scheduler: Scheduler,
    state: Cell<ConnectionState>,
    shut_down: Cell<bool>,
    next_seq: Cell<u64>,
    pending: RefCell<HashMap<String, PendingRequest>>,
    outbound: RefCell<VecDeque<QueuedFrame>>,
    backoff: RefCell<Backoff>,
    ids: RefCell<CorrelationIds>,
    reconnect_timer: RefCell<Option<TaskHandle>>,
}

/// Duplex transport that survives disconnects.
///
/// Requests that expect a reply get a correlation id and wait in the pending
/// table until an inbound envelope with the same `mid` arrives. While the
/// channel is not open, frames wait in an outbound queue and are flushed in
/// order once it opens. Closes are answered with exponential backoff, timed
/// by the scheduler.
///
/// Clones share the same connection.
pub struct DuplexTransport<C> {
    inner: Rc<Inner<C>>,
}

impl<C> Clone for DuplexTransport<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Builder for [`DuplexTransport`].
pub struct DuplexTransportBuilder<C> {
    channel: C,
    scheduler: Scheduler,
    policy: ReconnectPolicy,
    ids: CorrelationIds,
    seed: Option<u64>,
}

impl<C: Channel + 'static> DuplexTransportBuilder<C> {
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn correlation_ids(mut self, ids: CorrelationIds) -> Self {
        self.ids = ids;
        self
    }

    /// Seed the jitter generator.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> DuplexTransport<C> {
        let backoff = match self.seed {
            Some(seed) => Backoff::with_seed(self.policy, seed),
            None => Backoff::new(self.policy),
        };
        DuplexTransport {
            inner: Rc::new(Inner {
                channel: self.channel,
                scheduler: self.scheduler,
                state: Cell::new(ConnectionState::Disconnected),
                shut_down: Cell::new(false),
                next_seq: Cell::new(0),
                pending: RefCell::new(HashMap::new()),
                outbound: RefCell::new(VecDeque::new()),
                backoff: RefCell::new(backoff),
                ids: RefCell::new(self.ids),
                reconnect_timer: RefCell::new(None),
            }),
        }
    }
}

impl<C: Channel + 'static> DuplexTransport<C> {
    pub fn builder(channel: C, scheduler: Scheduler) -> DuplexTransportBuilder<C> {
        DuplexTransportBuilder {
            channel,
            scheduler,
            policy: ReconnectPolicy::default(),
            ids: CorrelationIds::random(),
            seed: None,
        }
    }

    pub fn new(channel: C, scheduler: Scheduler, policy: ReconnectPolicy) -> Self {
        Self::builder(channel, scheduler).policy(policy).build()
    }

    pub fn channel(&self) -> &C {
        &self.inner.channel
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.outbound.borrow().len()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.backoff.borrow().retry_count()
    }

    pub fn is_pending(&self, mid: &str) -> bool {
        self.inner.pending.borrow().contains_key(mid)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "connection state");
        }
    }

    /// Start opening the channel. Ignored while already open or connecting,
    /// and after [`DuplexTransport::shutdown`].
    pub fn connect(&self) {
        if self.inner.shut_down.get() {
            warn!("connect after shutdown ignored");
            return;
        }
        if matches!(self.state(), ConnectionState::Open | ConnectionState::Connecting) {
            return;
        }
        self.cancel_reconnect();
        self.set_state(ConnectionState::Connecting);
        info!(attempt = self.retry_count() + 1, "connecting");

        if let Err(error) = self.inner.channel.open() {
            warn!(%error, "channel failed to open");
            self.on_close();
        }
    }

    /// The channel is open: reset the backoff and flush queued frames.
    pub fn on_open(&self) {
        if self.inner.shut_down.get() {
            return;
        }
        self.cancel_reconnect();
        self.set_state(ConnectionState::Open);
        self.inner.backoff.borrow_mut().reset();
        info!(queued = self.queued_count(), "connection open");
        self.flush();
    }

    fn flush(&self) {
        while self.state() == ConnectionState::Open {
            let Some(queued) = self.inner.outbound.borrow_mut().pop_front() else {
                break;
            };
            if let Err(error) = self.inner.channel.send(&queued.frame) {
                warn!(%error, "send failed while flushing; reconnecting");
                self.inner.outbound.borrow_mut().push_front(queued);
                self.on_close();
                return;
            }
        }
    }

    fn transmit(&self, mid: Option<String>, frame: String) {
        let queued = QueuedFrame { mid, frame };
        if self.state() != ConnectionState::Open || !self.inner.outbound.borrow().is_empty() {
            self.inner.outbound.borrow_mut().push_back(queued);
            return;
        }
        if let Err(error) = self.inner.channel.send(&queued.frame) {
            warn!(%error, "send failed; queueing frame and reconnecting");
            self.inner.outbound.borrow_mut().push_back(queued);
            self.on_close();
        }
    }

    /// Dispatch one inbound frame to the request it answers.
    pub fn on_message(&self, text: &str) {
        let envelope = match InboundEnvelope::decode(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%error, "dropping malformed message");
                return;
            }
        };
        let Some(mid) = envelope.mid.clone() else {
            warn!("dropping message without a correlation id");
            return;
        };

        // The entry leaves the table before its callback runs, so the
        // callback is free to execute or receive more messages.
        let entry = self.inner.pending.borrow_mut().remove(&mid);
        let Some(pending) = entry else {
            warn!(%mid, "dropping reply for unknown correlation id");
            return;
        };
        if let Some(timer) = pending.timeout {
            timer.cancel();
        }
        debug!(%mid, failed = envelope.error.is_some(), "reply");
        pending.callbacks.settle(envelope);
    }

    /// The channel closed or failed to open. Schedules the next attempt, or
    /// gives up for good when the policy says so.
    pub fn on_close(&self) {
        if self.inner.shut_down.get() || self.state() == ConnectionState::Closed {
            return;
        }
        self.cancel_reconnect();

        let next = self.inner.backoff.borrow_mut().next_delay();
        match next {
            Some(delay) => {
                self.set_state(ConnectionState::Reconnecting);
                info!(
                    delay_ms = delay.as_millis() as u64,
                    retry = self.retry_count(),
                    "connection closed; reconnect scheduled"
                );
                let weak: Weak<Inner<C>> = Rc::downgrade(&self.inner);
                let timer = self.inner.scheduler.call_later(delay, move |_| {
                    if let Some(inner) = weak.upgrade() {
                        DuplexTransport { inner }.connect();
                    }
                    Ok(())
                });
                *self.inner.reconnect_timer.borrow_mut() = Some(timer);
            }
            None => {
                self.set_state(ConnectionState::Closed);
                let dropped = std::mem::take(&mut *self.inner.outbound.borrow_mut());
                warn!(
                    retries = self.retry_count(),
                    pending = self.pending_count(),
                    dropped_frames = dropped.len(),
                    "giving up on reconnecting"
                );
                self.reject_pending(TransportError::ConnectionLost);
            }
        }
    }

    /// Tear down: close the channel, stop reconnecting and reject everything
    /// still pending with [`TransportError::Shutdown`].
    pub fn shutdown(&self) {
        if self.inner.shut_down.replace(true) {
            return;
        }
        self.cancel_reconnect();
        self.set_state(ConnectionState::Closed);
        self.inner.channel.close();
        self.inner.outbound.borrow_mut().clear();
        info!(pending = self.pending_count(), "transport shut down");
        self.reject_pending(TransportError::Shutdown);
    }

    fn cancel_reconnect(&self) {
        if let Some(timer) = self.inner.reconnect_timer.borrow_mut().take() {
            timer.cancel();
        }
    }

    /// Fail every pending request, oldest first, from a later tick.
    fn reject_pending(&self, error: TransportError) {
        let mut drained: Vec<PendingRequest> = self
            .inner
            .pending
            .borrow_mut()
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        drained.sort_by_key(|pending| pending.seq);

        for pending in drained {
            if let Some(timer) = pending.timeout {
                timer.cancel();
            }
            self.fail_later(pending.callbacks, error.clone());
        }
    }

    fn fail_later(&self, callbacks: Callbacks, error: TransportError) {
        self.inner.scheduler.call_soon(move |_| {
            callbacks.fail(error, None);
            Ok(())
        });
    }

    /// Time out `mid`. A frame still waiting in the outbound queue is
    /// withdrawn so the remote side never sees the request.
    fn expire(&self, mid: &str, after: Duration) {
        let entry = self.inner.pending.borrow_mut().remove(mid);
        if let Some(pending) = entry {
            self.inner
                .outbound
                .borrow_mut()
                .retain(|queued| queued.mid.as_deref() != Some(mid));
            warn!(%mid, timeout_ms = after.as_millis() as u64, "request timed out");
            pending.callbacks.fail(TransportError::Timeout(after), None);
        }
    }

    fn register(&self, mid: String, callbacks: Callbacks, timeout: Option<Duration>) {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);

        let timeout = timeout.map(|after| {
            let weak = Rc::downgrade(&self.inner);
            let key = mid.clone();
            self.inner.scheduler.call_later(after, move |_| {
                if let Some(inner) = weak.upgrade() {
                    DuplexTransport { inner }.expire(&key, after);
                }
                Ok(())
            })
        });

        self.inner.pending.borrow_mut().insert(
            mid,
            PendingRequest {
                seq,
                callbacks,
                timeout,
            },
        );
    }
}

impl<C: Channel + 'static> Transport for DuplexTransport<C> {
    fn execute(&self, request: Request) {
        if self.inner.shut_down.get() {
            let (_, callbacks, _) = request.into_parts(None);
            self.fail_later(callbacks, TransportError::Shutdown);
            return;
        }
        if self.state() == ConnectionState::Closed {
            let (_, callbacks, _) = request.into_parts(None);
            self.fail_later(callbacks, TransportError::ConnectionLost);
            return;
        }

        if !request.expects_reply() {
            let (envelope, _, _) = request.into_parts(None);
            match envelope.encode() {
                Ok(frame) => self.transmit(None, frame),
                Err(error) => warn!(%error, "dropping unencodable request"),
            }
            return;
        }

        let minted = {
            let pending = self.inner.pending.borrow();
            let mut ids = self.inner.ids.borrow_mut();
            ids.mint(|id| pending.contains_key(id))
        };
        let mid = match minted {
            Ok(mid) => mid,
            Err(error) => {
                let (_, callbacks, _) = request.into_parts(None);
                warn!(%error, "could not assign a correlation id");
                self.fail_later(callbacks, error);
                return;
            }
        };

        let (envelope, callbacks, timeout) = request.into_parts(Some(mid.clone()));
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(error) => {
                self.fail_later(callbacks, error);
                return;
            }
        };

        debug!(%mid, action = %envelope.action, model = %envelope.model, "request");
        self.register(mid.clone(), callbacks, timeout);
        self.transmit(Some(mid), frame);
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}
