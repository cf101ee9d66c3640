#![no_main]

use cdsh_protocol::{
    response::{decode_page, parse_response},
    ProtocolVersion,
};
use libfuzzer_sys::fuzz_target;

// Decrypted response frames come from the enclave; decoding should never panic
fuzz_target!(|data: &[u8]| {
    if let Ok(response) = parse_response(data) {
        let _ = decode_page(&response, ProtocolVersion::V1);
        let _ = decode_page(&response, ProtocolVersion::V2);
    }
});
