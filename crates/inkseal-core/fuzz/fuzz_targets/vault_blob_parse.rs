//! Fuzzing target for protected blob parsing and opening.

#![no_main]
use inkseal_crypto::ProtectedBlob;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(blob) = serde_json::from_slice::<ProtectedBlob>(data) else {
        return;
    };
    // hostile kdf parameters must be rejected, not run
    let _ = blob.open_device(&[7u8; 32]);
    let _ = blob.open_passphrase("pw");
});
