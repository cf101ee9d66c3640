//! Response page decoding.
//!
//! A response carries a flat buffer of fixed-width records:
//!
//! | version | record layout                                   |
//! |---------|-------------------------------------------------|
//! | v1      | `8 byte number` `16 byte ACI`                   |
//! | v2      | `8 byte number` `16 byte PNI` `16 byte ACI`     |
//!
//! All-zero identifiers mean "no match". Trailing bytes that do not form a full record are
//! ignored.

use std::collections::HashMap;

use prost::Message;
use serde::Serialize;
use tracing::debug;

use crate::{Aci, ClientResponse, Pni, ProtocolError, ProtocolVersion, E164};

/// Size of a v1 record
pub const V1_RECORD_SIZE: usize = 8 + 16;
/// Size of a v2 record
pub const V2_RECORD_SIZE: usize = 8 + 16 + 16;

/// A resolved v2 entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponseItem {
    /// Phone number identifier, always present
    pub pni: Pni,
    /// Account identifier, present when the number belongs to an account visible to the caller
    pub aci: Option<Aci>,
}

/// A decoded v2 response page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsePageV2 {
    /// Resolved numbers in this page
    pub items: HashMap<E164, ResponseItem>,
    /// Continuation token, if this page carries one
    pub token: Option<Vec<u8>>,
}

/// A response page decoded for the protocol version of the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPage {
    #[allow(missing_docs)]
    V1(HashMap<E164, Aci>),
    #[allow(missing_docs)]
    V2(ResponsePageV2),
}

impl DecodedPage {
    /// Continuation token of the page. v1 pages never carry one.
    pub fn token(&self) -> Option<&[u8]> {
        match self {
            DecodedPage::V1(_) => None,
            DecodedPage::V2(page) => page.token.as_deref(),
        }
    }
}

/// Parse a decrypted response frame
pub fn parse_response(plaintext: &[u8]) -> Result<ClientResponse, ProtocolError> {
    let response = ClientResponse::decode(plaintext)?;
    if response.retry_after_secs > 0 {
        debug!(
            "Response carries a retry-after hint of {}s",
            response.retry_after_secs
        );
    }
    Ok(response)
}

/// Decode the records of a v1 page. Records with an all-zero ACI are dropped.
pub fn decode_v1_page(response: &ClientResponse) -> HashMap<E164, Aci> {
    records(&response.e164_pni_aci_triples, V1_RECORD_SIZE)
        .filter_map(|record| {
            let (e164, rest) = split_e164(record);
            let aci = Aci::from_bytes(uuid_bytes(rest));
            (!aci.is_nil()).then_some((e164, aci))
        })
        .collect()
}

/// Decode the records of a v2 page. Records with an all-zero PNI are dropped; an all-zero ACI
/// becomes `None`.
pub fn decode_v2_page(response: &ClientResponse) -> ResponsePageV2 {
    let items = records(&response.e164_pni_aci_triples, V2_RECORD_SIZE)
        .filter_map(|record| {
            let (e164, rest) = split_e164(record);
            let (pni, aci) = rest.split_at(16);
            let pni = Pni::from_bytes(uuid_bytes(pni));
            let aci = Aci::from_bytes(uuid_bytes(aci));

            (!pni.is_nil()).then_some((
                e164,
                ResponseItem {
                    pni,
                    aci: (!aci.is_nil()).then_some(aci),
                },
            ))
        })
        .collect();

    let token = (!response.token.is_empty()).then(|| response.token.clone());

    ResponsePageV2 { items, token }
}

/// Decode the records of a page sent in reply to a `version` request
pub fn decode_page(response: &ClientResponse, version: ProtocolVersion) -> DecodedPage {
    match version {
        ProtocolVersion::V1 => DecodedPage::V1(decode_v1_page(response)),
        ProtocolVersion::V2 => DecodedPage::V2(decode_v2_page(response)),
    }
}

fn records(buf: &[u8], size: usize) -> std::slice::ChunksExact<'_, u8> {
    let records = buf.chunks_exact(size);
    if !records.remainder().is_empty() {
        debug!(
            "Ignoring {} trailing bytes of a response page",
            records.remainder().len()
        );
    }
    records
}

fn split_e164(record: &[u8]) -> (E164, &[u8]) {
    let (number, rest) = record.split_at(8);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(number);
    (E164::from_be_bytes(bytes), rest)
}

fn uuid_bytes(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[..16]);
    out
}
