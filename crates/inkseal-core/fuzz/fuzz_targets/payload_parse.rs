//! Fuzzing target for payload JSON parsing.

#![no_main]
use inkseal_core::payload::Payload;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(payload) = Payload::from_json(data) {
        // anything accepted must re-encode to something accepted
        let again = Payload::from_json(&payload.to_json());
        assert_eq!(again.as_ref(), Some(&payload));
    }
});
