//! Request encoding.
//!
//! v1 address books are split into pages of at most [`MAX_ITEMS_PER_REQUEST`] numbers, each sent
//! as its own request. v2 always produces a single request; the combined size of its delta is
//! bounded by the caller.

use std::collections::{BTreeMap, BTreeSet};

use prost::Message;

use crate::{AccessKey, Aci, ClientRequest, ProtocolVersion, E164};

/// Maximum number of phone numbers in one request page
pub const MAX_ITEMS_PER_REQUEST: usize = 5000;
/// Length of a continuation token
pub const TOKEN_SIZE: usize = 32;

/// One page of a paged v1 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPage {
    /// Numbers in this page, in address book order
    pub e164s: Vec<E164>,
    /// Whether more pages follow
    pub has_more: bool,
}

impl RequestPage {
    /// Encode this page as a version-tagged plaintext request
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        encode_page(&self.e164s, self.has_more, version)
    }
}

/// Split `address_book` into pages of at most `max_per_page` numbers.
///
/// Every page except the last holds exactly `max_per_page` numbers and has `has_more` set. An
/// empty address book produces no pages.
pub fn build_pages(address_book: &[E164], max_per_page: usize) -> Vec<RequestPage> {
    let chunks: Vec<&[E164]> = address_book.chunks(max_per_page.max(1)).collect();
    let count = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| RequestPage {
            e164s: chunk.to_vec(),
            has_more: index + 1 < count,
        })
        .collect()
}

/// Encode one page: the version byte followed by the serialized [`ClientRequest`]
pub fn encode_page(e164s: &[E164], has_more: bool, version: ProtocolVersion) -> Vec<u8> {
    let request = ClientRequest {
        new_e164s: pack_e164s(e164s),
        has_more,
        ..Default::default()
    };

    frame(&request, version)
}

/// Build every plaintext request of a v1 lookup
pub fn encode_v1_requests(address_book: &[E164]) -> Vec<Vec<u8>> {
    build_pages(address_book, MAX_ITEMS_PER_REQUEST)
        .iter()
        .map(|page| page.encode(ProtocolVersion::V1))
        .collect()
}

/// A v2 lookup, expressed as a delta against a previous exchange.
///
/// Number sets are ordered, so every list is encoded in ascending numeric order.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequestV2 {
    /// Numbers already sent in the exchange that produced `token`
    pub previous_e164s: BTreeSet<E164>,
    /// Numbers to add
    pub new_e164s: BTreeSet<E164>,
    /// Numbers from the previous exchange to discard
    pub removed_e164s: BTreeSet<E164>,
    /// Accounts whose access key the caller knows
    pub service_ids: BTreeMap<Aci, AccessKey>,
    /// Token returned by the previous exchange
    pub token: Option<Vec<u8>>,
}

impl DiscoveryRequestV2 {
    /// Number of phone numbers the server will hold after applying this delta
    pub fn total_e164s(&self) -> usize {
        (self.previous_e164s.len() + self.new_e164s.len()).saturating_sub(self.removed_e164s.len())
    }

    /// Encode the single plaintext request of this lookup
    pub fn encode(&self) -> Vec<u8> {
        encode_v2_request(self)
    }
}

/// Encode a v2 request. An absent or empty token is sent as [`TOKEN_SIZE`] zero bytes.
pub fn encode_v2_request(request: &DiscoveryRequestV2) -> Vec<u8> {
    let token = match &request.token {
        Some(token) if !token.is_empty() => token.clone(),
        _ => vec![0u8; TOKEN_SIZE],
    };

    let message = ClientRequest {
        aci_uak_pairs: pack_service_ids(&request.service_ids),
        prev_e164s: pack_e164s(&request.previous_e164s),
        new_e164s: pack_e164s(&request.new_e164s),
        discard_e164s: pack_e164s(&request.removed_e164s),
        has_more: false,
        token,
    };

    frame(&message, ProtocolVersion::V2)
}

fn frame(request: &ClientRequest, version: ProtocolVersion) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + request.encoded_len());
    out.push(version.tag());
    out.extend_from_slice(&request.encode_to_vec());
    out
}

fn pack_e164s<'a>(e164s: impl IntoIterator<Item = &'a E164>) -> Vec<u8> {
    e164s
        .into_iter()
        .flat_map(|e164| e164.to_be_bytes())
        .collect()
}

fn pack_service_ids(service_ids: &BTreeMap<Aci, AccessKey>) -> Vec<u8> {
    let mut out = Vec::with_capacity(service_ids.len() * 32);
    for (aci, access_key) in service_ids {
        out.extend_from_slice(aci.as_bytes());
        out.extend_from_slice(access_key.as_bytes());
    }
    out
}
