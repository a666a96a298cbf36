//! Keeps a page model in sync with a simulated server that drops the
//! connection now and then.
//!
//! ```bash
//! RUST_LOG=info cargo run -p cadence --example model-sync
//! ```

use cadence::{
    Channel, DuplexTransport, InboundEnvelope, OutboundEnvelope, ReconnectPolicy, Request,
    SchedulerBuilder, Transport, TransportError, Verb,
};
use chrono::Local;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// The far end of the socket. Frames sent by the client land in `inbox` and
/// are answered on the next server turn.
#[derive(Default)]
struct Server {
    inbox: RefCell<VecDeque<String>>,
    connecting: Cell<bool>,
    up: Cell<bool>,
    handled: Cell<u32>,
}

#[derive(Clone, Default)]
struct SimulatedSocket(Rc<Server>);

impl Channel for SimulatedSocket {
    fn open(&self) -> Result<(), TransportError> {
        self.0.connecting.set(true);
        Ok(())
    }

    fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.0.up.get() {
            return Err(TransportError::Channel("socket is down".into()));
        }
        self.0.inbox.borrow_mut().push_back(frame.to_string());
        Ok(())
    }

    fn close(&self) {
        self.0.up.set(false);
        self.0.connecting.set(false);
    }
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

/// One server turn: accept a pending connection, answer what arrived, and
/// drop the link every fifth request.
fn serve(server: &Server, transport: &DuplexTransport<SimulatedSocket>) {
    if server.connecting.replace(false) {
        server.up.set(true);
        transport.on_open();
    }
    while server.up.get() {
        let Some(frame) = server.inbox.borrow_mut().pop_front() else {
            break;
        };
        let Ok(request) = serde_json::from_str::<OutboundEnvelope>(&frame) else {
            continue;
        };
        let handled = server.handled.get() + 1;
        server.handled.set(handled);

        if let Some(mid) = request.mid {
            let reply = InboundEnvelope::reply(mid, json!({ "revision": handled, "data": request.data }));
            if let Ok(text) = reply.encode() {
                transport.on_message(&text);
            }
        }
        if handled % 5 == 0 {
            println!("[{}] [SERVER] dropping the connection", stamp());
            server.up.set(false);
            transport.on_close();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(false)
        .init();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = SchedulerBuilder::new()
                .tick_interval(Duration::from_millis(10))
                .build()?;
            let socket = SimulatedSocket::default();
            let server = socket.0.clone();
            let transport = DuplexTransport::new(
                socket,
                scheduler.clone(),
                ReconnectPolicy {
                    initial_delay: Duration::from_millis(50),
                    max_delay: Duration::from_millis(400),
                    ..ReconnectPolicy::default()
                },
            );

            let peer = transport.clone();
            scheduler.call_interval(Duration::from_millis(20), move |_| {
                serve(&server, &peer);
                Ok(())
            });

            let editor = transport.clone();
            let edits = Rc::new(Cell::new(0u32));
            let counter = edits.clone();
            scheduler.call_interval(Duration::from_millis(75), move |_| {
                let edit = counter.get() + 1;
                counter.set(edit);
                editor.execute(
                    Request::new(Verb::Update, "page")
                        .payload(vec![json!({ "title": format!("draft {edit}") })])
                        .on_success(move |reply| {
                            println!("[{}] [CLIENT] edit {edit} saved: {}", stamp(), reply.data)
                        })
                        .on_error(move |error, _| println!("[{}] [CLIENT] edit {edit} failed: {error}", stamp())),
                );
                Ok(())
            });

            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            scheduler.call_later(Duration::from_secs(3), move |s| {
                s.stop(move |_| {
                    let _ = done_tx.send(());
                });
                Ok(())
            });

            println!("[{}] starting; edits every 75ms, server drops every 5th request\n", stamp());
            scheduler.run();
            transport.connect();

            done_rx.await?;
            transport.shutdown();
            println!(
                "\n[{}] stopped after {} ticks and {} edits",
                stamp(),
                scheduler.tick_count(),
                edits.get()
            );
            Ok::<_, Box<dyn std::error::Error>>(())
        })
        .await
}
