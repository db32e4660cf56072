//! Fuzzing target for token classification.

#![no_main]
use inkseal_core::bundle::{classify, find_tokens, Prefixes};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let prefixes = Prefixes::default();
    // arbitrary page text must never panic
    let _ = classify(&prefixes, text);
    let _ = classify(&prefixes, &format!("{}{}", prefixes.message, text));
    let _ = classify(&prefixes, &format!("{}{}", prefixes.exchange, text));
    let _ = find_tokens(&prefixes, text);
});
