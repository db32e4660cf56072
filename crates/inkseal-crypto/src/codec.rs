//! Text-safe binary encoding shared by every wire format.
//!
//! All binary fields travel as URL-safe base64 without padding. The serde
//! helper modules below are meant for `#[serde(with = "...")]`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64url text")]
    InvalidBase64,
    #[error("invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(text: &str) -> Result<Vec<u8>, CodecError> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| CodecError::InvalidBase64)
}

/// Decode into a fixed-size array; any other length is an error.
pub fn b64url_decode_array<const N: usize>(text: &str) -> Result<[u8; N], CodecError> {
    let bytes = b64url_decode(text)?;
    let got = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CodecError::InvalidLength { expected: N, got })
}

/// `Vec<u8>` as unpadded base64url text.
pub mod b64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        s.serialize_str(&super::b64url_encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(d)?;
        super::b64url_decode(&text).map_err(D::Error::custom)
    }
}

/// `[u8; N]` as unpadded base64url text; wrong lengths fail to parse.
pub mod b64_array {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&super::b64url_encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(d: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(d)?;
        super::b64url_decode_array::<N>(&text).map_err(D::Error::custom)
    }
}

/// `Option<Vec<u8>>` as base64url text or `null`.
pub mod b64_opt {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => s.serialize_some(&super::b64url_encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(d)? {
            Some(text) => super::b64url_decode(&text)
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "b64")]
        data: Vec<u8>,
        #[serde(with = "b64_array")]
        key: [u8; 4],
        #[serde(with = "b64_opt", default)]
        sig: Option<Vec<u8>>,
    }

    #[test]
    fn test_encode_is_url_safe_and_unpadded() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet
        let text = b64url_encode(&[0xfb, 0xff]);
        assert_eq!(text, "-_8");
        assert!(!text.contains('='));
    }

    #[test]
    fn test_decode_rejects_padding_and_standard_alphabet() {
        assert_eq!(b64url_decode("-_8="), Err(CodecError::InvalidBase64));
        assert_eq!(b64url_decode("+/8"), Err(CodecError::InvalidBase64));
    }

    #[test]
    fn test_decode_array_length_check() {
        let text = b64url_encode(&[1, 2, 3]);
        assert_eq!(
            b64url_decode_array::<4>(&text),
            Err(CodecError::InvalidLength { expected: 4, got: 3 })
        );
        assert_eq!(b64url_decode_array::<3>(&text), Ok([1, 2, 3]));
    }

    #[test]
    fn test_serde_helpers() {
        let sample = Sample {
            data: b"hello".to_vec(),
            key: [9, 8, 7, 6],
            sig: None,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"data":"aGVsbG8","key":"CQgHBg","sig":null}"#);
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_serde_missing_optional_field() {
        let back: Sample = serde_json::from_str(r#"{"data":"","key":"CQgHBg"}"#).unwrap();
        assert_eq!(back.sig, None);
        assert!(back.data.is_empty());
    }

    #[test]
    fn test_serde_wrong_array_length_fails() {
        let res: Result<Sample, _> = serde_json::from_str(r#"{"data":"","key":"CQgH"}"#);
        assert!(res.is_err());
    }
}
