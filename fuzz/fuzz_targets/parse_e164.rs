#![no_main]

use cdsh_protocol::E164;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(e164) = data.parse::<E164>() {
        assert_eq!(e164.to_string().parse::<E164>().ok(), Some(e164));
    }
});
