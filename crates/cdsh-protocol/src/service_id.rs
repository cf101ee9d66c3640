use std::fmt;

use aes::{
    cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit},
    Aes256,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an unidentified access key
pub const ACCESS_KEY_SIZE: usize = 16;
/// Length of a profile key
pub const PROFILE_KEY_SIZE: usize = 32;

macro_rules! service_id {
    ($(#[$meta:meta])* $vis:vis $ident:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        $vis struct $ident(pub Uuid);

        impl $ident {
            /// Read the identifier from its 16 byte wire representation
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// The 16 byte wire representation
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Whether this is the all-zero placeholder the server uses for "no match"
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl From<Uuid> for $ident {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $ident {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }

        impl fmt::Debug for $ident {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ident), "({})"), self.0.hyphenated())
            }
        }
    };
}

service_id! {
    /// Account identifier
    pub Aci
}

service_id! {
    /// Phone number identifier
    pub Pni
}

/// Unidentified access key sent alongside an ACI in v2 requests
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessKey([u8; ACCESS_KEY_SIZE]);

impl AccessKey {
    /// Wrap an already derived key
    pub const fn from_bytes(bytes: [u8; ACCESS_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive the access key from a profile key.
    ///
    /// This is the first block of AES-256-GCM over 16 zero bytes with a zero nonce, which is the
    /// AES encryption of the counter block `0^96 || 2` under the profile key.
    pub fn derive(profile_key: &[u8; PROFILE_KEY_SIZE]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(profile_key));

        let mut counter = [0u8; 16];
        counter[15] = 2;
        let mut block = GenericArray::clone_from_slice(&counter);
        cipher.encrypt_block(&mut block);

        let mut key = [0u8; ACCESS_KEY_SIZE];
        key.copy_from_slice(&block);
        block.as_mut_slice().zeroize();
        Self(key)
    }

    /// The raw key bytes
    pub fn as_bytes(&self) -> &[u8; ACCESS_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey([REDACTED])")
    }
}
