//! Noise NK client for HSM-backed enclaves.
//!
//! The client pins the enclave's static public key, so the `NK` pattern authenticates the server
//! in a single round trip. The first message carries the list of code hashes the client is
//! willing to talk to; the enclave answers with the hash of the code it is running, which must be
//! one of them.

use snow::{Builder, HandshakeState, TransportState};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{EnclaveError, EnclaveSession};

/// Noise pattern spoken by the enclave
pub const NOISE_PATTERN: &str = "Noise_NK_25519_ChaChaPoly_SHA256";
/// Length of an enclave code hash
pub const CODE_HASH_SIZE: usize = 32;
/// Length of the enclave's Curve25519 public key
pub const PUBLIC_KEY_SIZE: usize = 32;

const MAX_NOISE_MESSAGE_SIZE: usize = 65535;
const NOISE_TAG_SIZE: usize = 16;
const MAX_PLAINTEXT_FRAME_SIZE: usize = MAX_NOISE_MESSAGE_SIZE - NOISE_TAG_SIZE;

/// Hash identifying the code running inside the enclave
pub type CodeHash = [u8; CODE_HASH_SIZE];

enum State {
    Handshaking(Box<HandshakeState>),
    Established(Box<TransportState>),
    Poisoned,
}

/// Client side of an HSM enclave session
pub struct HsmEnclaveClient {
    state: State,
    initial_message: Vec<u8>,
    trusted_code_hashes: Vec<CodeHash>,
}

impl HsmEnclaveClient {
    /// Start a handshake with the enclave identified by `public_key`, accepting any of
    /// `trusted_code_hashes`.
    ///
    /// The initial handshake message is produced eagerly and available through
    /// [`EnclaveSession::initial_handshake_message`].
    pub fn new(
        public_key: &[u8],
        trusted_code_hashes: Vec<CodeHash>,
    ) -> Result<Self, EnclaveError> {
        if public_key.len() != PUBLIC_KEY_SIZE {
            return Err(EnclaveError::InvalidPublicKey(public_key.len()));
        }
        if trusted_code_hashes.is_empty() {
            return Err(EnclaveError::EmptyCodeHashes);
        }

        let mut handshake = Builder::new(
            NOISE_PATTERN
                .parse()
                .map_err(|_| EnclaveError::NoisePatternParse)?,
        )
        .remote_public_key(public_key)
        .build_initiator()
        .map_err(|_| EnclaveError::Initiator)?;

        let payload = trusted_code_hashes.concat();
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE_SIZE];
        let len = handshake
            .write_message(&payload, &mut buf)
            .map_err(|_| EnclaveError::HandshakeWrite)?;
        buf.truncate(len);

        debug!(
            "Prepared enclave handshake for {} trusted code hashes",
            trusted_code_hashes.len()
        );

        Ok(Self {
            state: State::Handshaking(Box::new(handshake)),
            initial_message: buf,
            trusted_code_hashes,
        })
    }

    /// Whether the handshake has completed successfully
    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established(_))
    }

    fn transport(&mut self) -> Result<&mut TransportState, EnclaveError> {
        match &mut self.state {
            State::Established(transport) => Ok(transport),
            State::Handshaking(_) => Err(EnclaveError::HandshakeNotComplete),
            State::Poisoned => Err(EnclaveError::Poisoned),
        }
    }
}

impl EnclaveSession for HsmEnclaveClient {
    fn initial_handshake_message(&self) -> &[u8] {
        &self.initial_message
    }

    fn complete_handshake(&mut self, server_message: &[u8]) -> Result<(), EnclaveError> {
        // Any failure below leaves the session poisoned.
        let mut handshake = match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Handshaking(handshake) => handshake,
            established @ State::Established(_) => {
                self.state = established;
                return Err(EnclaveError::HandshakeAlreadyComplete);
            }
            State::Poisoned => return Err(EnclaveError::Poisoned),
        };

        let mut payload = vec![0u8; MAX_NOISE_MESSAGE_SIZE];
        let len = handshake
            .read_message(server_message, &mut payload)
            .map_err(|_| EnclaveError::HandshakeRead)?;
        if len != CODE_HASH_SIZE {
            return Err(EnclaveError::InvalidCodeHashLength(len));
        }

        let received = &payload[..CODE_HASH_SIZE];
        if !self
            .trusted_code_hashes
            .iter()
            .any(|trusted| trusted.as_slice() == received)
        {
            let received = hex::encode(received);
            warn!("Enclave reported untrusted code hash {}", received);
            return Err(EnclaveError::UntrustedCodeHash(received));
        }

        let transport = handshake
            .into_transport_mode()
            .map_err(|_| EnclaveError::HandshakeSplit)?;
        self.state = State::Established(Box::new(transport));

        debug!("Enclave handshake complete");
        Ok(())
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        let transport = self.transport()?;

        // Plaintexts larger than one Noise message go out as consecutive frames
        let frames = plaintext.len().div_ceil(MAX_PLAINTEXT_FRAME_SIZE).max(1);
        let mut ciphertext = Vec::with_capacity(plaintext.len() + frames * NOISE_TAG_SIZE);
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE_SIZE];
        for frame in 0..frames {
            let start = frame * MAX_PLAINTEXT_FRAME_SIZE;
            let end = plaintext.len().min(start + MAX_PLAINTEXT_FRAME_SIZE);
            let len = transport
                .write_message(&plaintext[start..end], &mut buf)
                .map_err(|_| EnclaveError::Encrypt)?;
            ciphertext.extend_from_slice(&buf[..len]);
        }

        Ok(ciphertext)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        if ciphertext.is_empty() {
            return Err(EnclaveError::Decrypt);
        }

        let transport = self.transport()?;
        let mut plaintext = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
        let mut buf = Zeroizing::new(vec![0u8; MAX_NOISE_MESSAGE_SIZE]);
        for frame in ciphertext.chunks(MAX_NOISE_MESSAGE_SIZE) {
            let len = transport
                .read_message(frame, &mut buf)
                .map_err(|_| EnclaveError::Decrypt)?;
            plaintext.extend_from_slice(&buf[..len]);
        }

        Ok(plaintext.to_vec())
    }
}
