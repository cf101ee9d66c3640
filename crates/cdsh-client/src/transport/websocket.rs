use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use super::{
    Connection, ConnectionEvent, ConnectRequest, DuplexConnection, DuplexTransport,
    TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;

/// Close code reported when the server closes without a status
const NO_STATUS_RECEIVED: u16 = 1005;

/// [`DuplexTransport`] over a websocket, with TLS through rustls and the platform's root
/// certificates.
///
/// Connection attempts are not bounded here; [`crate::CdshSocket`] applies the connect timeout.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl DuplexTransport for WebSocketTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, TransportError> {
        let mut ws_request = request.url.as_str().into_client_request()?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::new(0, format!("Invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::new(0, format!("Invalid header value: {e}")))?;
            ws_request.headers_mut().insert(name, value);
        }

        let (ws_stream, response) = connect_async(ws_request).await?;
        debug!("Websocket upgraded with status {}", response.status());

        let (ws_sink, ws_source) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ConnectionEvent>();

        tokio::spawn(write_task(ws_sink, outgoing_rx, events_tx.clone()));
        tokio::spawn(read_task(ws_source, events_tx));

        Ok(Connection {
            handle: Box::new(WebSocketConnection { outgoing_tx }),
            events: events_rx,
        })
    }
}

struct WebSocketConnection {
    outgoing_tx: mpsc::UnboundedSender<Message>,
}

impl DuplexConnection for WebSocketConnection {
    fn send(&self, message: Vec<u8>) {
        if self.outgoing_tx.send(Message::Binary(message)).is_err() {
            debug!("Dropping outgoing message, the writer has stopped");
        }
    }

    fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if self.outgoing_tx.send(Message::Close(Some(frame))).is_err() {
            debug!("Dropping close frame, the writer has stopped");
        }
    }
}

/// Write task: sends queued messages to the websocket until a close frame has gone out
async fn write_task(
    mut ws_sink: WsSink,
    mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
) {
    while let Some(msg) = outgoing_rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = ws_sink.send(msg).await {
            if !matches!(e, WsError::ConnectionClosed | WsError::AlreadyClosed) {
                let _ = events_tx.send(ConnectionEvent::Failure(e.into()));
            }
            break;
        }
        if closing {
            break;
        }
    }
}

/// Read task: forwards what the server does as connection events. Ends with exactly one
/// `Closing` or `Failure` event unless the receiver is gone.
async fn read_task<S>(mut ws_source: S, events_tx: mpsc::UnboundedSender<ConnectionEvent>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = ws_source.next().await {
        let event = match msg {
            Ok(Message::Binary(data)) => ConnectionEvent::Message(data),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.into_owned()))
                    .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                let _ = events_tx.send(ConnectionEvent::Closing { code, reason });
                return;
            }
            Ok(Message::Text(_)) => {
                warn!("Ignoring unexpected text message");
                continue;
            }
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                let _ = events_tx.send(ConnectionEvent::Failure(e.into()));
                return;
            }
        };

        if events_tx.send(event).is_err() {
            return;
        }
    }

    // The writer holds a sender too, so the channel alone would never report this
    debug!("Websocket ended without a close frame");
    let _ = events_tx.send(ConnectionEvent::Failure(TransportError::new(
        0,
        "Connection ended without a close",
    )));
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Http(response) => {
                let status = response.status();
                TransportError::new(status.as_u16(), format!("Upgrade rejected: {status}"))
            }
            e => TransportError::new(0, e.to_string()),
        }
    }
}
