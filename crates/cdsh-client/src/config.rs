use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use cdsh_enclave::{CodeHash, CODE_HASH_SIZE, PUBLIC_KEY_SIZE};
use serde::{Deserialize, Serialize};

use crate::DiscoveryError;

/// Default cap on the number of phone numbers a v2 request may leave on the server
pub const DEFAULT_MAX_REQUEST_ITEMS: usize = 50_000;

/// Where and how to reach the discovery enclave.
///
/// Defaults to
///
/// ```
/// # use cdsh_client::CdshConfig;
/// let config = CdshConfig {
///     url: "http://localhost:8080".to_string(),
///     public_key: String::new(),
///     code_hashes: vec![],
///     max_request_items: 50_000,
///     connect_timeout_secs: 30,
///     exchange_timeout_secs: None,
/// };
/// assert_eq!(config, CdshConfig::default());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CdshConfig {
    /// Base URL of the service. `http` and `https` are rewritten to `ws` and `wss`.
    pub url: String,
    /// Hex encoded static public key of the enclave
    pub public_key: String,
    /// Hex encoded code hashes the client trusts. The first one is part of the endpoint path.
    pub code_hashes: Vec<String>,
    /// Maximum number of phone numbers a v2 request may leave on the server. Defaults to 50000
    pub max_request_items: usize,
    /// Seconds to wait for the websocket upgrade. Defaults to 30
    pub connect_timeout_secs: u64,
    /// Seconds a whole exchange may take, from connecting until the server closes. Unbounded
    /// when unset
    pub exchange_timeout_secs: Option<u64>,
}

impl Default for CdshConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".into(),
            public_key: String::new(),
            code_hashes: vec![],
            max_request_items: DEFAULT_MAX_REQUEST_ITEMS,
            connect_timeout_secs: 30,
            exchange_timeout_secs: None,
        }
    }
}

impl CdshConfig {
    /// Parse a JSON configuration document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, DiscoveryError> {
        serde_json::from_str(json).map_err(|e| DiscoveryError::InvalidConfig(e.to_string()))
    }

    /// The decoded enclave public key
    pub fn public_key_bytes(&self) -> Result<Vec<u8>, DiscoveryError> {
        let key = hex::decode(&self.public_key)
            .map_err(|e| DiscoveryError::InvalidConfig(format!("publicKey: {e}")))?;
        if key.len() != PUBLIC_KEY_SIZE {
            return Err(DiscoveryError::InvalidConfig(format!(
                "publicKey must be {PUBLIC_KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        Ok(key)
    }

    /// The decoded code hash allow-list, never empty
    pub fn code_hash_bytes(&self) -> Result<Vec<CodeHash>, DiscoveryError> {
        if self.code_hashes.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "at least one code hash is required".to_string(),
            ));
        }

        self.code_hashes
            .iter()
            .map(|hash| {
                let bytes = hex::decode(hash)
                    .map_err(|e| DiscoveryError::InvalidConfig(format!("codeHashes: {e}")))?;
                <[u8; CODE_HASH_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
                    DiscoveryError::InvalidConfig(format!(
                        "code hash must be {CODE_HASH_SIZE} bytes, got {}",
                        bytes.len()
                    ))
                })
            })
            .collect()
    }

    /// The websocket endpoint: `{url}/discovery/{public key}/{code hash}` with the scheme
    /// rewritten to `ws` or `wss`.
    pub fn endpoint_url(&self) -> Result<String, DiscoveryError> {
        let public_key = hex::encode(self.public_key_bytes()?);
        let code_hash = self
            .code_hash_bytes()?
            .first()
            .map(hex::encode)
            .unwrap_or_default();

        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            return Err(DiscoveryError::InvalidConfig(format!(
                "unsupported url scheme: {}",
                self.url
            )));
        };

        Ok(format!("{base}/discovery/{public_key}/{code_hash}"))
    }

    #[allow(missing_docs)]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[allow(missing_docs)]
    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_secs.map(Duration::from_secs)
    }
}

/// The `Authorization` header value for HTTP basic auth
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
