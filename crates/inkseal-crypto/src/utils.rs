//! Constant-time comparison helpers.
//!
//! Used wherever a received value is checked against a locally computed
//! one: content hashes, short codes, pinned public keys.

use constant_time_eq::constant_time_eq;

/// Compare two byte slices in constant time.
///
/// Slices of different length compare unequal.
///
/// ```rust
/// use inkseal_crypto::utils::constant_time_compare;
///
/// assert!(constant_time_compare(b"123456", b"123456"));
/// assert!(!constant_time_compare(b"123456", b"123457"));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

/// Compare two fixed-size arrays in constant time.
pub fn constant_time_compare_array<const N: usize>(a: &[u8; N], b: &[u8; N]) -> bool {
    constant_time_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare(b"hello world", b"hello world"));
    }

    #[test]
    fn test_constant_time_compare_different() {
        assert!(!constant_time_compare(b"hello world", b"hello worlD"));
    }

    #[test]
    fn test_constant_time_compare_different_length() {
        assert!(!constant_time_compare(b"hello", b"hello world"));
    }

    #[test]
    fn test_constant_time_compare_array() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        assert!(constant_time_compare_array(&a, &b));
        b[31] = 1;
        assert!(!constant_time_compare_array(&a, &b));
    }
}
