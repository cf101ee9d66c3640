//! Duplex message transport used by the socket session.
//!
//! A transport opens one connection per discovery call. The connection handle is fire-and-forget:
//! sends and closes are queued and never block. Everything the remote side does is reported as a
//! [`ConnectionEvent`] on a single ordered channel, which ends when the transport stops
//! delivering.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

mod websocket;

pub use websocket::WebSocketTransport;

/// Websocket close code for a normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Parameters for opening a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Websocket URL, `ws://` or `wss://`
    pub url: String,
    /// Extra handshake headers
    pub headers: Vec<(String, String)>,
}

/// Failure to establish or keep a connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{cause} (status {status})")]
pub struct TransportError {
    /// HTTP status of a rejected upgrade, 0 if none
    pub status: u16,
    /// Description of the failure
    pub cause: String,
}

impl TransportError {
    #[allow(missing_docs)]
    pub fn new(status: u16, cause: impl Into<String>) -> Self {
        Self {
            status,
            cause: cause.into(),
        }
    }
}

/// Something the remote side did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A binary message arrived
    Message(Vec<u8>),
    /// The remote side started closing the connection
    Closing {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// The connection broke down
    Failure(TransportError),
}

/// Handle to an open connection
pub trait DuplexConnection: Send + Sync {
    /// Queue a binary message
    fn send(&self, message: Vec<u8>);

    /// Queue a close frame
    fn close(&self, code: u16, reason: &str);
}

/// An open connection and the events it produces
pub struct Connection {
    /// Outgoing half
    pub handle: Box<dyn DuplexConnection>,
    /// Incoming events, in the order they happened
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Opens duplex connections
#[async_trait]
pub trait DuplexTransport: Send + Sync {
    /// Open a connection
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, TransportError>;
}
