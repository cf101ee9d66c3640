#![doc = include_str!("../README.md")]

mod config;
mod error;
/// Per-call socket session
pub mod socket;
/// Duplex transports
pub mod transport;

mod service;

pub use config::{basic_auth, CdshConfig, DEFAULT_MAX_REQUEST_ITEMS};
pub use error::DiscoveryError;
pub use service::{
    parse_e164s, DiscoveryResponseV2, DiscoveryServiceV1, DiscoveryServiceV2, EnclaveFactory,
    HsmEnclaveFactory,
};
pub use socket::{CdshSocket, PageStream, Stage};
