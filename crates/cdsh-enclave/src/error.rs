use thiserror::Error;

/// Errors that can occur while establishing or using an enclave session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnclaveError {
    /// The pinned enclave public key has the wrong length
    #[error("Enclave public key must be 32 bytes, got {0}")]
    InvalidPublicKey(usize),

    /// No trusted code hash was configured
    #[error("At least one trusted code hash is required")]
    EmptyCodeHashes,

    /// Failed to parse the Noise pattern
    #[error("Failed to parse pattern")]
    NoisePatternParse,

    /// Failed to build the Noise initiator
    #[error("Failed to build initiator")]
    Initiator,

    /// Writing the initial handshake message failed
    #[error("Write error during handshake")]
    HandshakeWrite,

    /// The server's handshake message did not verify
    #[error("Read error during handshake")]
    HandshakeRead,

    /// The server's handshake payload is not a single code hash
    #[error("Expected a 32 byte code hash from the enclave, got {0} bytes")]
    InvalidCodeHashLength(usize),

    /// The enclave runs code that is not in the allow-list
    #[error("Enclave code hash {0} is not trusted")]
    UntrustedCodeHash(String),

    /// Failed to move the handshake into transport mode
    #[error("Failed to split handshake")]
    HandshakeSplit,

    /// `encrypt`/`decrypt` was called before the handshake completed
    #[error("Handshake not complete")]
    HandshakeNotComplete,

    /// `complete_handshake` was called twice
    #[error("Handshake already complete")]
    HandshakeAlreadyComplete,

    /// A previous handshake failure left the session unusable
    #[error("Enclave session is unusable after a failed handshake")]
    Poisoned,

    /// Encryption failed
    #[error("Encryption failed")]
    Encrypt,

    /// Decryption failed, the message was tampered with or arrived out of order
    #[error("Decryption failed")]
    Decrypt,
}
