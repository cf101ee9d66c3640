#![doc = include_str!("../README.md")]

/// Error types for enclave sessions
pub mod error;

mod hsm;

pub use error::EnclaveError;
pub use hsm::{CodeHash, HsmEnclaveClient, CODE_HASH_SIZE, NOISE_PATTERN, PUBLIC_KEY_SIZE};

/// An end-to-end encrypted session with a remote enclave.
///
/// Calls must happen in strict order: [`initial_handshake_message`] may be read at any time,
/// [`complete_handshake`] is called exactly once with the server's reply, and only then may
/// [`encrypt`] and [`decrypt`] be used. One session lives for exactly one connection.
///
/// [`initial_handshake_message`]: EnclaveSession::initial_handshake_message
/// [`complete_handshake`]: EnclaveSession::complete_handshake
/// [`encrypt`]: EnclaveSession::encrypt
/// [`decrypt`]: EnclaveSession::decrypt
pub trait EnclaveSession: Send {
    /// The first message sent to the enclave once the connection is open.
    fn initial_handshake_message(&self) -> &[u8];

    /// Consume the enclave's handshake reply.
    ///
    /// Fails if the reply does not verify against the pinned key or the enclave reports a code
    /// hash outside the allow-list.
    fn complete_handshake(&mut self, server_message: &[u8]) -> Result<(), EnclaveError>;

    /// Encrypt an outbound message.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EnclaveError>;

    /// Decrypt an inbound message.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EnclaveError>;
}

impl<T: EnclaveSession + ?Sized> EnclaveSession for Box<T> {
    fn initial_handshake_message(&self) -> &[u8] {
        (**self).initial_handshake_message()
    }

    fn complete_handshake(&mut self, server_message: &[u8]) -> Result<(), EnclaveError> {
        (**self).complete_handshake(server_message)
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        (**self).encrypt(plaintext)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        (**self).decrypt(ciphertext)
    }
}
