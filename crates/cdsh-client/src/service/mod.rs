//! Discovery facades.
//!
//! Both services validate their input before opening a connection, run exactly one socket
//! session and aggregate every page into one result. A call never returns partial results.

use std::collections::HashSet;

use cdsh_enclave::{CodeHash, EnclaveError, EnclaveSession, HsmEnclaveClient};
use cdsh_protocol::{ClientResponse, E164};
use futures::StreamExt;

use crate::{socket::PageStream, CdshConfig, DiscoveryError};

mod v1;
mod v2;

pub use v1::DiscoveryServiceV1;
pub use v2::{DiscoveryResponseV2, DiscoveryServiceV2};

/// Creates a fresh enclave session for every discovery call
pub trait EnclaveFactory: Send + Sync {
    /// Session type produced by this factory
    type Session: EnclaveSession + 'static;

    /// Create a session for one connection
    fn create(&self) -> Result<Self::Session, EnclaveError>;
}

/// [`EnclaveFactory`] for the HSM enclave pinned by a public key and code hash allow-list
#[derive(Debug, Clone)]
pub struct HsmEnclaveFactory {
    public_key: Vec<u8>,
    code_hashes: Vec<CodeHash>,
}

impl HsmEnclaveFactory {
    #[allow(missing_docs)]
    pub fn new(public_key: Vec<u8>, code_hashes: Vec<CodeHash>) -> Self {
        Self {
            public_key,
            code_hashes,
        }
    }

    /// Build the factory from the enclave identity in `config`
    pub fn from_config(config: &CdshConfig) -> Result<Self, DiscoveryError> {
        Ok(Self::new(
            config.public_key_bytes()?,
            config.code_hash_bytes()?,
        ))
    }
}

impl EnclaveFactory for HsmEnclaveFactory {
    type Session = HsmEnclaveClient;

    fn create(&self) -> Result<HsmEnclaveClient, EnclaveError> {
        HsmEnclaveClient::new(&self.public_key, self.code_hashes.clone())
    }
}

/// Parse phone numbers, dropping duplicates and keeping the order of first appearance.
///
/// Fails on the first number that is not valid E.164.
pub fn parse_e164s<I>(numbers: I) -> Result<Vec<E164>, DiscoveryError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut parsed = Vec::new();
    for number in numbers {
        let e164: E164 = number.as_ref().parse()?;
        if seen.insert(e164) {
            parsed.push(e164);
        }
    }
    Ok(parsed)
}

/// Drain a session, failing with its error if it does not complete normally. `on_page` sees every
/// page as it arrives.
async fn collect_pages(
    mut pages: PageStream,
    mut on_page: impl FnMut(&ClientResponse),
) -> Result<Vec<ClientResponse>, DiscoveryError> {
    let mut collected = Vec::new();
    while let Some(page) = pages.next().await {
        let page = page?;
        on_page(&page);
        collected.push(page);
    }
    Ok(collected)
}
