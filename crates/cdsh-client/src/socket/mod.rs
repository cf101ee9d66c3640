//! Socket session for a single discovery call.
//!
//! [`CdshSocket::connect`] spawns a driver task that owns the connection and the
//! [`machine::SessionMachine`]. Decrypted pages reach the caller through a [`PageStream`], which
//! ends with `None` when the server closes normally or with exactly one error otherwise.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use cdsh_enclave::EnclaveSession;
use cdsh_protocol::ClientResponse;
use futures::Stream;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, info};

use crate::{
    transport::{
        ConnectRequest, Connection, ConnectionEvent, DuplexConnection, DuplexTransport,
        NORMAL_CLOSURE,
    },
    DiscoveryError,
};

mod machine;

use machine::{Action, SessionMachine, CLOSE_OK};
pub use machine::Stage;

/// Opens discovery sessions against one endpoint
#[derive(Clone)]
pub struct CdshSocket {
    transport: Arc<dyn DuplexTransport>,
    url: String,
    connect_timeout: Duration,
    exchange_timeout: Option<Duration>,
}

impl CdshSocket {
    /// Create a socket for the websocket endpoint at `url`
    pub fn new(
        transport: Arc<dyn DuplexTransport>,
        url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            connect_timeout,
            exchange_timeout: None,
        }
    }

    /// Bound every session, from connecting until the server closes. A session running past it
    /// closes the connection and fails with [`DiscoveryError::Timeout`].
    pub fn with_exchange_timeout(mut self, exchange_timeout: Option<Duration>) -> Self {
        self.exchange_timeout = exchange_timeout;
        self
    }

    /// The websocket endpoint sessions connect to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a session: connect with `authorization`, perform the enclave handshake, send every
    /// plaintext in `requests` and stream back the decrypted response pages.
    ///
    /// The connection is opened on a background task right away, so this must be called within a
    /// tokio runtime.
    pub fn connect<E>(
        &self,
        authorization: String,
        enclave: E,
        requests: Vec<Vec<u8>>,
    ) -> PageStream
    where
        E: EnclaveSession + 'static,
    {
        let (pages_tx, pages_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let request = ConnectRequest {
            url: self.url.clone(),
            headers: vec![("Authorization".to_string(), authorization)],
        };

        tokio::spawn(drive_session(
            self.transport.clone(),
            request,
            self.connect_timeout,
            self.exchange_timeout.map(|timeout| Instant::now() + timeout),
            SessionMachine::new(enclave, requests),
            PageSender { tx: pages_tx },
            cancel_rx,
        ));

        PageStream {
            pages: pages_rx,
            cancel: Some(cancel_tx),
            done: false,
        }
    }
}

enum PageEvent {
    Page(ClientResponse),
    Complete,
    Failed(DiscoveryError),
}

struct PageSender {
    tx: mpsc::UnboundedSender<PageEvent>,
}

impl PageSender {
    fn send(&self, event: PageEvent) {
        if self.tx.send(event).is_err() {
            debug!("Page stream dropped, discarding");
        }
    }
}

/// Decrypted response pages of one session, in arrival order.
///
/// Yields `Ok` for every page and ends with `None` after a normal close. A failed session yields
/// one `Err` and then ends. Dropping the stream cancels the session.
pub struct PageStream {
    pages: mpsc::UnboundedReceiver<PageEvent>,
    cancel: Option<oneshot::Sender<()>>,
    done: bool,
}

impl PageStream {
    /// Cancel the session and close the connection. Safe to call any number of times, also after
    /// the session has ended.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Stream for PageStream {
    type Item = Result<ClientResponse, DiscoveryError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.cancel.is_none() {
            this.done = true;
            return Poll::Ready(Some(Err(DiscoveryError::Cancelled)));
        }

        let item = match this.pages.poll_recv(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Some(PageEvent::Page(page))) => Some(Ok(page)),
            Poll::Ready(Some(PageEvent::Complete)) => {
                this.done = true;
                None
            }
            Poll::Ready(Some(PageEvent::Failed(err))) => {
                this.done = true;
                Some(Err(err))
            }
            Poll::Ready(None) => {
                this.done = true;
                Some(Err(DiscoveryError::TransportFailure {
                    status: 0,
                    cause: "Session ended unexpectedly".to_string(),
                }))
            }
        };
        Poll::Ready(item)
    }
}

/// Forwards at most one close to the connection, and none after the remote side closed normally
struct ClosingConnection {
    inner: Box<dyn DuplexConnection>,
    closed: bool,
}

impl ClosingConnection {
    fn send(&self, message: Vec<u8>) {
        if self.closed {
            debug!("Dropping a message on a closed connection");
            return;
        }
        self.inner.send(message);
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.close(code, reason);
    }
}

async fn drive_session<E: EnclaveSession>(
    transport: Arc<dyn DuplexTransport>,
    request: ConnectRequest,
    connect_timeout: Duration,
    deadline: Option<Instant>,
    mut machine: SessionMachine<E>,
    pages: PageSender,
    mut cancel: oneshot::Receiver<()>,
) {
    let expired = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    let connect = tokio::time::timeout(connect_timeout, transport.connect(request));
    let result = tokio::select! {
        result = connect => result,
        _ = &mut expired => {
            info!("Exchange timed out before the connection opened");
            pages.send(PageEvent::Failed(DiscoveryError::Timeout));
            return;
        }
        _ = &mut cancel => {
            debug!("Cancelled before the connection opened");
            return;
        }
    };

    let Connection { handle, mut events } = match result {
        Ok(Ok(connection)) => connection,
        Ok(Err(err)) => {
            info!("Failed to connect: {err}");
            pages.send(PageEvent::Failed(err.into()));
            return;
        }
        Err(_) => {
            info!("Timed out connecting after {connect_timeout:?}");
            pages.send(PageEvent::Failed(DiscoveryError::TransportFailure {
                status: 0,
                cause: "Timed out connecting".to_string(),
            }));
            return;
        }
    };

    let mut connection = ClosingConnection {
        inner: handle,
        closed: false,
    };
    apply(machine.start(), &mut connection, &pages);

    loop {
        tokio::select! {
            biased;
            event = events.recv() => {
                let Some(event) = event else {
                    apply(machine.on_disconnected(), &mut connection, &pages);
                    break;
                };
                if matches!(event, ConnectionEvent::Closing { code: NORMAL_CLOSURE, .. }) {
                    connection.closed = true;
                }
                apply(machine.handle(event), &mut connection, &pages);
                if machine.is_terminated() {
                    break;
                }
            }
            _ = &mut cancel => {
                debug!("Session cancelled in stage {:?}", machine.stage());
                connection.close(NORMAL_CLOSURE, CLOSE_OK);
                break;
            }
            _ = &mut expired => {
                apply(machine.on_timeout(), &mut connection, &pages);
                break;
            }
        }
    }
}

fn apply(actions: Vec<Action>, connection: &mut ClosingConnection, pages: &PageSender) {
    for action in actions {
        match action {
            Action::Send(message) => connection.send(message),
            Action::Close { code, reason } => connection.close(code, &reason),
            Action::Emit(page) => pages.send(PageEvent::Page(page)),
            Action::Complete => pages.send(PageEvent::Complete),
            Action::Fail(err) => pages.send(PageEvent::Failed(err)),
        }
    }
}
