//! Protobuf frames exchanged with the enclave after decryption.
//!
//! Field numbers follow the server's schema; numbers and identifiers are packed into `bytes`
//! fields as fixed-width big-endian records.

use prost::Message;

/// A request page, prefixed with the version byte before encryption
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ClientRequest {
    /// Concatenated `16 byte ACI || 16 byte access key` pairs (v2)
    #[prost(bytes = "vec", tag = "1")]
    pub aci_uak_pairs: Vec<u8>,

    /// Numbers sent in a previous exchange that produced `token` (v2)
    #[prost(bytes = "vec", tag = "2")]
    pub prev_e164s: Vec<u8>,

    /// Numbers to look up
    #[prost(bytes = "vec", tag = "3")]
    pub new_e164s: Vec<u8>,

    /// Numbers that were in the previous exchange and should be forgotten (v2)
    #[prost(bytes = "vec", tag = "4")]
    pub discard_e164s: Vec<u8>,

    /// Whether more request pages follow this one
    #[prost(bool, tag = "5")]
    pub has_more: bool,

    /// Continuation token of the previous exchange (v2)
    #[prost(bytes = "vec", tag = "6")]
    pub token: Vec<u8>,
}

/// A response page
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ClientResponse {
    /// Fixed-width result records, see [`crate::response`]
    #[prost(bytes = "vec", tag = "1")]
    pub e164_pni_aci_triples: Vec<u8>,

    /// Server back-off hint, zero when absent
    #[prost(int32, tag = "2")]
    pub retry_after_secs: i32,

    /// Continuation token for the next exchange (v2)
    #[prost(bytes = "vec", tag = "3")]
    pub token: Vec<u8>,
}
