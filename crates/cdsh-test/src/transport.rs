use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use cdsh_client::transport::{
    ConnectRequest, Connection, ConnectionEvent, DuplexConnection, DuplexTransport,
    TransportError,
};
use cdsh_protocol::ClientResponse;
use prost::Message;
use tokio::sync::mpsc;

use crate::FakeEnclave;

enum Script {
    Events {
        events: Vec<ConnectionEvent>,
        keep_open: bool,
    },
    Refuse(TransportError),
    Hang,
}

#[derive(Default)]
struct State {
    scripts: VecDeque<Script>,
    requests: Vec<ConnectRequest>,
    sent: Vec<Vec<u8>>,
    closes: Vec<(u16, String)>,
    open: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

/// A [`DuplexTransport`] that replays one script per connection and records what the client
/// sends.
///
/// Scripted events are queued as soon as the connection opens; the session processes them in
/// order after sending its handshake. Unless kept open, the event channel ends after the script.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose next connection replays `events`
    pub fn with_events(events: Vec<ConnectionEvent>) -> Self {
        let transport = Self::new();
        transport.push_events(events);
        transport
    }

    /// Script the next connection to deliver `events` and end
    pub fn push_events(&self, events: Vec<ConnectionEvent>) {
        self.lock().scripts.push_back(Script::Events {
            events,
            keep_open: false,
        });
    }

    /// Script the next connection to deliver `events` and then stay open
    pub fn push_events_keep_open(&self, events: Vec<ConnectionEvent>) {
        self.lock().scripts.push_back(Script::Events {
            events,
            keep_open: true,
        });
    }

    /// Script the next connection attempt to fail
    pub fn push_refusal(&self, error: TransportError) {
        self.lock().scripts.push_back(Script::Refuse(error));
    }

    /// Script the next connection attempt to never finish
    pub fn push_hang(&self) {
        self.lock().scripts.push_back(Script::Hang);
    }

    /// Every connection request made so far
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.lock().requests.clone()
    }

    /// Every message the client sent, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Every close the client initiated, in order
    pub fn closes(&self) -> Vec<(u16, String)> {
        self.lock().closes.clone()
    }

    /// Wait until the client initiated at least `count` closes, giving up after a second
    pub async fn wait_for_closes(&self, count: usize) -> Vec<(u16, String)> {
        for _ in 0..200 {
            if self.lock().closes.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.closes()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("state lock poisoned")
    }
}

#[async_trait]
impl DuplexTransport for ScriptedTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, TransportError> {
        let script = {
            let mut state = self.lock();
            state.requests.push(request);
            state.scripts.pop_front()
        };

        let (events, keep_open) = match script {
            Some(Script::Events { events, keep_open }) => (events, keep_open),
            Some(Script::Refuse(error)) => return Err(error),
            Some(Script::Hang) => std::future::pending().await,
            None => return Err(TransportError::new(0, "No scripted connection")),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            let _ = tx.send(event);
        }
        if keep_open {
            self.lock().open.push(tx);
        }

        Ok(Connection {
            handle: Box::new(ScriptedConnection {
                state: self.state.clone(),
            }),
            events: rx,
        })
    }
}

struct ScriptedConnection {
    state: Arc<Mutex<State>>,
}

impl DuplexConnection for ScriptedConnection {
    fn send(&self, message: Vec<u8>) {
        self.state
            .lock()
            .expect("state lock poisoned")
            .sent
            .push(message);
    }

    fn close(&self, code: u16, reason: &str) {
        self.state
            .lock()
            .expect("state lock poisoned")
            .closes
            .push((code, reason.to_string()));
    }
}

/// A server message carrying `response`, sealed for a [`FakeEnclave`]
pub fn sealed_response(response: &ClientResponse) -> ConnectionEvent {
    ConnectionEvent::Message(FakeEnclave::seal(&response.encode_to_vec()))
}
