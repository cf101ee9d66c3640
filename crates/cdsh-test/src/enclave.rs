use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use cdsh_client::EnclaveFactory;
use cdsh_enclave::{EnclaveError, EnclaveSession};

const SEAL_PREFIX: &[u8] = b"sealed:";

/// An [`EnclaveSession`] whose ciphertext is the plaintext behind a fixed prefix.
pub struct FakeEnclave {
    reject_handshake: bool,
    established: bool,
}

impl FakeEnclave {
    /// The initial handshake message
    pub const HANDSHAKE_REQUEST: &'static [u8] = b"fake-enclave-hello";
    /// The handshake reply the fake accepts
    pub const HANDSHAKE_REPLY: &'static [u8] = b"fake-enclave-welcome";
    /// Code hash reported by a fake that rejects the handshake
    pub const UNTRUSTED_HASH: &'static str = "badc0de";

    /// A fake that accepts [`Self::HANDSHAKE_REPLY`]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            reject_handshake: false,
            established: false,
        }
    }

    /// A fake that fails every handshake as if the enclave ran untrusted code
    pub fn rejecting_handshake() -> Self {
        Self {
            reject_handshake: true,
            established: false,
        }
    }

    /// What the fake produces when encrypting `plaintext`
    pub fn seal(plaintext: &[u8]) -> Vec<u8> {
        [SEAL_PREFIX, plaintext].concat()
    }

    /// Recover the plaintext of a sealed message
    pub fn open(ciphertext: &[u8]) -> Option<Vec<u8>> {
        ciphertext.strip_prefix(SEAL_PREFIX).map(<[u8]>::to_vec)
    }
}

impl EnclaveSession for FakeEnclave {
    fn initial_handshake_message(&self) -> &[u8] {
        Self::HANDSHAKE_REQUEST
    }

    fn complete_handshake(&mut self, server_message: &[u8]) -> Result<(), EnclaveError> {
        if self.established {
            return Err(EnclaveError::HandshakeAlreadyComplete);
        }
        if self.reject_handshake {
            return Err(EnclaveError::UntrustedCodeHash(
                Self::UNTRUSTED_HASH.to_string(),
            ));
        }
        if server_message != Self::HANDSHAKE_REPLY {
            return Err(EnclaveError::HandshakeRead);
        }
        self.established = true;
        Ok(())
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        if !self.established {
            return Err(EnclaveError::HandshakeNotComplete);
        }
        Ok(Self::seal(plaintext))
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EnclaveError> {
        if !self.established {
            return Err(EnclaveError::HandshakeNotComplete);
        }
        Self::open(ciphertext).ok_or(EnclaveError::Decrypt)
    }
}

/// [`EnclaveFactory`] producing [`FakeEnclave`]s, counting how many it created
#[derive(Clone, Default)]
pub struct FakeEnclaveFactory {
    reject_handshake: bool,
    created: Arc<AtomicUsize>,
}

impl FakeEnclaveFactory {
    /// A factory whose enclaves fail the handshake
    pub fn rejecting_handshake() -> Self {
        Self {
            reject_handshake: true,
            ..Default::default()
        }
    }

    /// Number of sessions created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EnclaveFactory for FakeEnclaveFactory {
    type Session = FakeEnclave;

    fn create(&self) -> Result<FakeEnclave, EnclaveError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(if self.reject_handshake {
            FakeEnclave::rejecting_handshake()
        } else {
            FakeEnclave::new()
        })
    }
}
