use thiserror::Error;

/// Errors produced while encoding requests or decoding responses
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A phone number is not a `+`-prefixed decimal that fits into 64 bits
    #[error("Invalid E164 number: {0:?}")]
    InvalidE164(String),

    /// A decrypted response is not a valid `ClientResponse`
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(err: prost::DecodeError) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}
