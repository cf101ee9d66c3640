//! The per-call session state machine.
//!
//! The machine never touches the connection itself; it turns connection events into [`Action`]s
//! that the driver applies in order.

use cdsh_enclave::EnclaveSession;
use cdsh_protocol::{response::parse_response, ClientResponse};
use tracing::{debug, info, warn};

use crate::{
    transport::{ConnectionEvent, TransportError, NORMAL_CLOSURE},
    DiscoveryError,
};

/// Reason sent with every close this client initiates, apart from echoing a remote close
pub(crate) const CLOSE_OK: &str = "OK";

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The handshake message went out, waiting for the server's reply
    WaitingToInitialize,
    /// Requests went out, waiting for response pages
    WaitingForResponse,
    /// The server closed normally
    Finished,
    /// The session failed; nothing more is delivered
    Failure,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Action {
    Send(Vec<u8>),
    Close { code: u16, reason: String },
    Emit(ClientResponse),
    Complete,
    Fail(DiscoveryError),
}

pub(crate) struct SessionMachine<E> {
    enclave: E,
    requests: Vec<Vec<u8>>,
    stage: Stage,
    terminated: bool,
}

impl<E: EnclaveSession> SessionMachine<E> {
    pub(crate) fn new(enclave: E, requests: Vec<Vec<u8>>) -> Self {
        Self {
            enclave,
            requests,
            stage: Stage::WaitingToInitialize,
            terminated: false,
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether the terminal signal has been produced
    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Actions to take once the connection is open
    pub(crate) fn start(&mut self) -> Vec<Action> {
        debug!("Connection open, sending handshake");
        vec![Action::Send(
            self.enclave.initial_handshake_message().to_vec(),
        )]
    }

    pub(crate) fn handle(&mut self, event: ConnectionEvent) -> Vec<Action> {
        match event {
            ConnectionEvent::Message(bytes) => self.on_message(&bytes),
            ConnectionEvent::Closing { code, reason } => self.on_closing(code, &reason),
            ConnectionEvent::Failure(err) => self.on_failure(err),
        }
    }

    /// The event channel ended
    pub(crate) fn on_disconnected(&mut self) -> Vec<Action> {
        if self.terminated {
            return vec![];
        }
        warn!("Connection ended in stage {:?} without a close", self.stage);
        self.stage = Stage::Failure;
        self.terminate(Action::Fail(DiscoveryError::TransportFailure {
            status: 0,
            cause: "Connection ended without a close".to_string(),
        }))
    }

    /// The exchange ran past its deadline
    pub(crate) fn on_timeout(&mut self) -> Vec<Action> {
        if self.terminated {
            return vec![];
        }
        warn!("Exchange timed out in stage {:?}", self.stage);
        self.fail(DiscoveryError::Timeout)
    }

    fn on_message(&mut self, bytes: &[u8]) -> Vec<Action> {
        match self.stage {
            Stage::WaitingToInitialize => self.on_handshake(bytes),
            Stage::WaitingForResponse => match self.read_page(bytes) {
                Ok(page) => vec![Action::Emit(page)],
                Err(err) => self.fail(err),
            },
            Stage::Failure => {
                debug!("Received a message after failing, closing");
                vec![Action::Close {
                    code: NORMAL_CLOSURE,
                    reason: CLOSE_OK.to_string(),
                }]
            }
            Stage::Finished => {
                debug!("Ignoring a message after the session finished");
                vec![]
            }
        }
    }

    fn on_handshake(&mut self, bytes: &[u8]) -> Vec<Action> {
        if let Err(err) = self.enclave.complete_handshake(bytes) {
            warn!("Enclave handshake failed: {err}");
            return self.fail(DiscoveryError::HandshakeFailure(err));
        }

        let requests = std::mem::take(&mut self.requests);
        let ciphertexts: Result<Vec<_>, _> = requests
            .iter()
            .map(|request| self.enclave.encrypt(request))
            .collect();

        match ciphertexts {
            Ok(ciphertexts) => {
                info!("Handshake complete, sending {} request(s)", ciphertexts.len());
                self.stage = Stage::WaitingForResponse;
                ciphertexts.into_iter().map(Action::Send).collect()
            }
            Err(err) => self.fail(DiscoveryError::EnclaveFailure(err)),
        }
    }

    fn read_page(&mut self, bytes: &[u8]) -> Result<ClientResponse, DiscoveryError> {
        let plaintext = self
            .enclave
            .decrypt(bytes)
            .map_err(DiscoveryError::DecryptFailure)?;
        Ok(parse_response(&plaintext)?)
    }

    fn on_closing(&mut self, code: u16, reason: &str) -> Vec<Action> {
        if code == NORMAL_CLOSURE {
            if self.stage == Stage::Failure {
                return vec![];
            }
            debug!("Remote closed normally in stage {:?}", self.stage);
            self.stage = Stage::Finished;
            return self.terminate(Action::Complete);
        }

        warn!("Remote side is closing with non-normal code {code}: {reason}");
        self.stage = Stage::Failure;
        let mut actions = vec![Action::Close {
            code: NORMAL_CLOSURE,
            reason: format!("Remote closed with code {code}"),
        }];
        actions.extend(self.terminate(Action::Fail(DiscoveryError::NonSuccessfulClose {
            code,
        })));
        actions
    }

    fn on_failure(&mut self, err: TransportError) -> Vec<Action> {
        warn!("Connection failed: {err}");
        self.fail(err.into())
    }

    fn fail(&mut self, err: DiscoveryError) -> Vec<Action> {
        self.stage = Stage::Failure;
        let mut actions = vec![Action::Close {
            code: NORMAL_CLOSURE,
            reason: CLOSE_OK.to_string(),
        }];
        actions.extend(self.terminate(Action::Fail(err)));
        actions
    }

    /// At most one terminal signal leaves the machine
    fn terminate(&mut self, signal: Action) -> Vec<Action> {
        if self.terminated {
            return vec![];
        }
        self.terminated = true;
        vec![signal]
    }
}
