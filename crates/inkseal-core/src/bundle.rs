//! Text tokens: `<prefix><base64url(json(payload))>`.
//!
//! Arbitrary page text is scanned constantly, so nothing here returns an
//! error for input that is not one of ours. Malformed and foreign text both
//! classify to `None`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use inkseal_crypto::codec::{b64url_decode, b64url_encode};

use crate::payload::Payload;

pub const DEFAULT_MESSAGE_PREFIX: &str = "INKSEAL|";
pub const DEFAULT_EXCHANGE_PREFIX: &str = "INKSEAL-KEYX|";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrefixError {
    #[error("prefix must not be empty")]
    Empty,
    #[error("message and exchange prefixes must differ")]
    Identical,
    #[error("prefix {0:?} is a prefix of {1:?}")]
    Overlapping(String, String),
}

/// The two configurable token prefixes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefixes {
    pub message: String,
    pub exchange: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            message: DEFAULT_MESSAGE_PREFIX.to_string(),
            exchange: DEFAULT_EXCHANGE_PREFIX.to_string(),
        }
    }
}

impl Prefixes {
    pub fn new(message: impl Into<String>, exchange: impl Into<String>) -> Result<Self, PrefixError> {
        let prefixes = Self {
            message: message.into(),
            exchange: exchange.into(),
        };
        prefixes.validate()?;
        Ok(prefixes)
    }

    /// Classification must be unambiguous: no token may start with both.
    pub fn validate(&self) -> Result<(), PrefixError> {
        if self.message.is_empty() || self.exchange.is_empty() {
            return Err(PrefixError::Empty);
        }
        if self.message == self.exchange {
            return Err(PrefixError::Identical);
        }
        if self.exchange.starts_with(&self.message) {
            return Err(PrefixError::Overlapping(self.message.clone(), self.exchange.clone()));
        }
        if self.message.starts_with(&self.exchange) {
            return Err(PrefixError::Overlapping(self.exchange.clone(), self.message.clone()));
        }
        Ok(())
    }
}

pub fn encode(prefix: &str, payload: &Payload) -> String {
    format!("{}{}", prefix, b64url_encode(&payload.to_json()))
}

/// Exact, case-sensitive prefix match; `None` on any failure.
pub fn decode(prefix: &str, token: &str) -> Option<Payload> {
    let body = token.strip_prefix(prefix)?;
    let json = b64url_decode(body).ok()?;
    Payload::from_json(&json)
}

/// Decode with whichever prefix matches and check the payload kind agrees
/// with it: messages only under the message prefix, exchange payloads only
/// under the exchange prefix.
pub fn classify(prefixes: &Prefixes, token: &str) -> Option<Payload> {
    if let Some(payload) = decode(&prefixes.message, token) {
        return match payload {
            Payload::Message(_) => Some(payload),
            other => {
                debug!(kind = other.kind(), "exchange payload under message prefix ignored");
                None
            }
        };
    }
    match decode(&prefixes.exchange, token)? {
        Payload::Message(_) => {
            debug!("message payload under exchange prefix ignored");
            None
        }
        other => Some(other),
    }
}

/// Every token in `text` that classifies.
///
/// Tokens are found per whitespace-delimited word; surrounding punctuation
/// such as quotes, brackets or a trailing full stop is ignored.
pub fn find_tokens(prefixes: &Prefixes, text: &str) -> Vec<Payload> {
    text.split_whitespace()
        .filter_map(|word| {
            [&prefixes.message, &prefixes.exchange]
                .into_iter()
                .filter_map(|prefix| token_in(word, prefix))
                .find_map(|token| classify(prefixes, token))
        })
        .collect()
}

/// `prefix` plus the base64url run that follows it, if `word` contains it.
fn token_in<'a>(word: &'a str, prefix: &str) -> Option<&'a str> {
    let start = word.find(prefix)?;
    let rest = &word[start..];
    let body = &rest[prefix.len()..];
    let body_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(body.len());
    Some(&rest[..prefix.len() + body_len])
}
