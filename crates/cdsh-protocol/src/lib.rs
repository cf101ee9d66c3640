#![doc = include_str!("../README.md")]

/// Error types for the protocol codecs
pub mod error;
/// Request encoding and paging
pub mod request;
/// Response page decoding
pub mod response;

mod e164;
mod proto;
mod service_id;

pub use e164::E164;
pub use error::ProtocolError;
pub use proto::{ClientRequest, ClientResponse};
pub use request::{DiscoveryRequestV2, RequestPage, MAX_ITEMS_PER_REQUEST};
pub use response::{DecodedPage, ResponseItem, ResponsePageV2};
pub use service_id::{AccessKey, Aci, Pni, ACCESS_KEY_SIZE, PROFILE_KEY_SIZE};

/// Protocol generation spoken with the enclave.
///
/// The discriminant is the version byte prefixed to every plaintext request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Number → ACI lookups, paged requests
    V1 = 1,
    /// Delta requests with PNI/ACI results and a continuation token
    V2 = 2,
}

impl ProtocolVersion {
    /// The version byte written before every request
    pub fn tag(self) -> u8 {
        self as u8
    }
}
