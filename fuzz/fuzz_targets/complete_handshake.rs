#![no_main]

use cdsh_enclave::{EnclaveSession, HsmEnclaveClient};
use libfuzzer_sys::fuzz_target;

// Arbitrary handshake replies must be rejected without panicking
fuzz_target!(|data: &[u8]| {
    let Ok(mut client) = HsmEnclaveClient::new(&[9u8; 32], vec![[1u8; 32]]) else {
        return;
    };
    if client.complete_handshake(data).is_ok() {
        panic!("accepted a forged handshake");
    }
});
