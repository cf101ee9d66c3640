use std::{collections::HashMap, sync::Arc};

use cdsh_protocol::{request::encode_v1_requests, response::decode_v1_page, Aci, E164};
use tracing::info;

use super::{collect_pages, parse_e164s, EnclaveFactory, HsmEnclaveFactory};
use crate::{
    config::basic_auth,
    socket::CdshSocket,
    transport::{DuplexTransport, WebSocketTransport},
    CdshConfig, DiscoveryError,
};

/// Resolves phone numbers to account identifiers.
///
/// Large address books are split into pages of at most
/// [`MAX_ITEMS_PER_REQUEST`](cdsh_protocol::MAX_ITEMS_PER_REQUEST) numbers, all sent over the same
/// connection.
pub struct DiscoveryServiceV1<F = HsmEnclaveFactory> {
    socket: CdshSocket,
    enclaves: F,
}

impl DiscoveryServiceV1<HsmEnclaveFactory> {
    /// Service talking to the enclave described by `config` over a websocket
    pub fn from_config(config: &CdshConfig) -> Result<Self, DiscoveryError> {
        let transport = Arc::new(WebSocketTransport);
        Self::new(config, transport, HsmEnclaveFactory::from_config(config)?)
    }
}

impl<F: EnclaveFactory> DiscoveryServiceV1<F> {
    #[allow(missing_docs)]
    pub fn new(
        config: &CdshConfig,
        transport: Arc<dyn DuplexTransport>,
        enclaves: F,
    ) -> Result<Self, DiscoveryError> {
        Ok(Self {
            socket: CdshSocket::new(transport, config.endpoint_url()?, config.connect_timeout())
                .with_exchange_timeout(config.exchange_timeout()),
            enclaves,
        })
    }

    /// Look up which of `e164s` belong to registered accounts.
    ///
    /// Numbers without an account are absent from the result. Invalid numbers fail the call
    /// before anything is sent.
    pub async fn get_registered_users<I>(
        &self,
        username: &str,
        password: &str,
        e164s: I,
    ) -> Result<HashMap<E164, Aci>, DiscoveryError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let address_book = parse_e164s(e164s)?;
        let requests = encode_v1_requests(&address_book);
        let enclave = self
            .enclaves
            .create()
            .map_err(DiscoveryError::EnclaveFailure)?;

        info!(
            "Looking up {} numbers in {} request(s)",
            address_book.len(),
            requests.len()
        );
        let stream = self
            .socket
            .connect(basic_auth(username, password), enclave, requests);
        let pages = collect_pages(stream, |_| {}).await?;

        let registered: HashMap<E164, Aci> = pages.iter().flat_map(decode_v1_page).collect();
        info!("Found {} registered users", registered.len());
        Ok(registered)
    }
}
