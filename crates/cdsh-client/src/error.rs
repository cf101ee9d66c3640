//! Error types for discovery calls.

use cdsh_enclave::EnclaveError;
use cdsh_protocol::ProtocolError;
use thiserror::Error;

use crate::transport::TransportError;

/// Consolidated failure of a discovery call.
///
/// Carries enough detail (close code, HTTP status, cause) for the caller to decide whether to
/// retry. Pages received before a failure are never returned alongside it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The enclave rejected the server's handshake (bad code hash or signature)
    #[error("Enclave handshake failed: {0}")]
    HandshakeFailure(EnclaveError),

    /// A response failed enclave decryption
    #[error("Failed to decrypt response: {0}")]
    DecryptFailure(EnclaveError),

    /// The enclave session could not be created or failed to encrypt a request
    #[error("Enclave session error: {0}")]
    EnclaveFailure(EnclaveError),

    /// A response could not be decoded, or a v2 exchange produced no continuation token
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The server closed the connection with a code other than 1000
    #[error("Remote closed the connection with code {code}")]
    NonSuccessfulClose {
        /// The websocket close code
        code: u16,
    },

    /// The connection could not be established or broke down
    #[error("Transport failure (status {status}): {cause}")]
    TransportFailure {
        /// HTTP status of a rejected upgrade, 0 if none
        status: u16,
        /// Description of the underlying failure
        cause: String,
    },

    /// A phone number could not be parsed
    #[error("Invalid E164 number: {0:?}")]
    InvalidE164(String),

    /// A v2 request exceeds the number of phone numbers the server accepts
    #[error("Request holds {count} phone numbers, the limit is {limit}")]
    TooManyItems {
        /// Numbers the server would hold after the request
        count: usize,
        /// Configured maximum
        limit: usize,
    },

    /// The client configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller cancelled the exchange
    #[error("Discovery was cancelled")]
    Cancelled,

    /// The exchange did not finish within the configured exchange timeout
    #[error("Discovery timed out")]
    Timeout,
}

impl DiscoveryError {
    /// The close code or HTTP status associated with this failure, 0 if there is none
    pub fn status_code(&self) -> u16 {
        match self {
            DiscoveryError::NonSuccessfulClose { code } => *code,
            DiscoveryError::TransportFailure { status, .. } => *status,
            _ => 0,
        }
    }

    /// Whether the failure was caused by the caller's input, before any connection was opened
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DiscoveryError::InvalidE164(_)
                | DiscoveryError::TooManyItems { .. }
                | DiscoveryError::InvalidConfig(_)
        )
    }
}

impl From<ProtocolError> for DiscoveryError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidE164(input) => DiscoveryError::InvalidE164(input),
            ProtocolError::Decode(cause) => DiscoveryError::MalformedResponse(cause),
        }
    }
}

impl From<TransportError> for DiscoveryError {
    fn from(err: TransportError) -> Self {
        DiscoveryError::TransportFailure {
            status: err.status,
            cause: err.cause,
        }
    }
}
