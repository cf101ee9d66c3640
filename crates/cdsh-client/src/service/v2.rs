use std::{collections::HashMap, sync::Arc};

use cdsh_protocol::{
    response::decode_v2_page, ClientResponse, DiscoveryRequestV2, ResponseItem, E164,
};
use serde::Serialize;
use tracing::{debug, info};

use super::{collect_pages, EnclaveFactory, HsmEnclaveFactory};
use crate::{
    config::basic_auth,
    socket::CdshSocket,
    transport::{DuplexTransport, WebSocketTransport},
    CdshConfig, DiscoveryError,
};

/// Result of a v2 lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResponseV2 {
    /// Resolved numbers. Numbers the server knows nothing about are absent.
    pub results: HashMap<E164, ResponseItem>,
    /// Token to send with the next delta request
    #[serde(with = "token_base64")]
    pub token: Vec<u8>,
}

mod token_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(token: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(token))
    }
}

type TokenSaver = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Resolves a delta of phone numbers against a previous exchange.
///
/// Each call sends one request and returns the token the next call must present.
pub struct DiscoveryServiceV2<F = HsmEnclaveFactory> {
    socket: CdshSocket,
    enclaves: F,
    max_request_items: usize,
    token_saver: Option<TokenSaver>,
}

impl DiscoveryServiceV2<HsmEnclaveFactory> {
    /// Service talking to the enclave described by `config` over a websocket
    pub fn from_config(config: &CdshConfig) -> Result<Self, DiscoveryError> {
        let transport = Arc::new(WebSocketTransport);
        Self::new(config, transport, HsmEnclaveFactory::from_config(config)?)
    }
}

impl<F: EnclaveFactory> DiscoveryServiceV2<F> {
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
            max_request_items: config.max_request_items,
            token_saver: None,
        })
    }

    /// Hand the continuation token to `saver` as soon as the page carrying it arrives.
    ///
    /// The token is saved even if the exchange fails afterwards, so the next call can still
    /// present it.
    pub fn with_token_saver(mut self, saver: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.token_saver = Some(Arc::new(saver));
        self
    }

    /// Run one delta lookup.
    ///
    /// Fails before connecting if the request would leave more numbers on the server than the
    /// configured maximum. Fails with [`DiscoveryError::MalformedResponse`] if no page carries a
    /// continuation token.
    pub async fn get_registered_users(
        &self,
        username: &str,
        password: &str,
        request: &DiscoveryRequestV2,
    ) -> Result<DiscoveryResponseV2, DiscoveryError> {
        let count = request.total_e164s();
        if count > self.max_request_items {
            return Err(DiscoveryError::TooManyItems {
                count,
                limit: self.max_request_items,
            });
        }

        let enclave = self
            .enclaves
            .create()
            .map_err(DiscoveryError::EnclaveFailure)?;

        info!(
            "Sending delta of {} new and {} removed numbers",
            request.new_e164s.len(),
            request.removed_e164s.len()
        );
        let stream = self
            .socket
            .connect(basic_auth(username, password), enclave, vec![request.encode()]);
        let mut token_seen = false;
        let pages = collect_pages(stream, |page| {
            if token_seen || page.token.is_empty() {
                return;
            }
            token_seen = true;
            if let Some(saver) = &self.token_saver {
                debug!("Saving continuation token");
                saver(&page.token);
            }
        })
        .await?;

        aggregate(&pages)
    }
}

/// Merge every page; the first page carrying a token decides the token.
fn aggregate(pages: &[ClientResponse]) -> Result<DiscoveryResponseV2, DiscoveryError> {
    let mut results = HashMap::new();
    let mut token = None;

    for page in pages.iter().map(decode_v2_page) {
        results.extend(page.items);
        match (&token, page.token) {
            (None, Some(page_token)) => token = Some(page_token),
            (Some(_), Some(_)) => debug!("Ignoring a continuation token in a later page"),
            _ => {}
        }
    }

    let token = token.ok_or_else(|| {
        DiscoveryError::MalformedResponse("no page carried a continuation token".to_string())
    })?;

    info!("Resolved {} numbers", results.len());
    Ok(DiscoveryResponseV2 { results, token })
}
