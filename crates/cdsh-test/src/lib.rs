//! Test doubles for the contact discovery client.
//!
//! - [`FakeEnclave`] stands in for the Noise session with a trivially reversible "encryption".
//! - [`ScriptedTransport`] replays scripted server behaviour and records what the client did.

mod enclave;
mod transport;

pub use enclave::{FakeEnclave, FakeEnclaveFactory};
pub use transport::{sealed_response, ScriptedTransport};
