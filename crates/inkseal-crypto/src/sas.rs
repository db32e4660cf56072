use crate::hash::sha256;

/// 6-digit SAS from a digest. Uses first 4 bytes big-endian, mod 1,000,000.
pub fn sas_6digit_from_digest(h: &[u8; 32]) -> String {
    let n = u32::from_be_bytes([h[0], h[1], h[2], h[3]]) % 1_000_000;
    format!("{:06}", n)
}

/// 6-digit SAS from a transcript bytes blob.
/// Stable across platforms.
pub fn sas_6digit(transcript_bytes: &[u8]) -> String {
    sas_6digit_from_digest(&sha256(transcript_bytes))
}
