//! Wire payloads carried inside bundles.
//!
//! Three kinds travel on the wire, distinguished by the `t` field:
//! - `"msg"`: an [`Envelope`]
//! - `"keyx"`: an [`ExchangeRequest`]
//! - `"keyx-ack"`: an [`ExchangeAck`]

use serde::{Deserialize, Serialize};

use inkseal_crypto::{Envelope, Fingerprint, PublicKeys};

pub const PAYLOAD_VERSION: u8 = 1;

/// Where a conversation happens. Sent as the `meta` of exchange payloads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub domain: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Channel {
    pub fn new(domain: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            conversation_id: conversation_id.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Stable identity string, `"{domain}:{conversationId}"`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.domain, self.conversation_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub v: u8,
    pub from: Fingerprint,
    #[serde(rename = "pub")]
    pub keys: PublicKeys,
    /// Short code the recipient compares out of band.
    pub sas: String,
    pub time: u64,
    pub meta: Channel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAck {
    pub v: u8,
    /// Fingerprint of the requester this ack answers.
    pub to: Fingerprint,
    #[serde(rename = "pub")]
    pub keys: PublicKeys,
    pub time: u64,
    pub meta: Channel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Payload {
    #[serde(rename = "msg")]
    Message(Envelope),
    #[serde(rename = "keyx")]
    ExchangeRequest(ExchangeRequest),
    #[serde(rename = "keyx-ack")]
    ExchangeAck(ExchangeAck),
}

impl Payload {
    pub fn version(&self) -> u8 {
        match self {
            Payload::Message(env) => env.v,
            Payload::ExchangeRequest(req) => req.v,
            Payload::ExchangeAck(ack) => ack.v,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Message(_) => "msg",
            Payload::ExchangeRequest(_) => "keyx",
            Payload::ExchangeAck(_) => "keyx-ack",
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        // every field is a string, integer or nested struct of those
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse JSON, returning `None` for anything malformed or of another
    /// version.
    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        let payload: Payload = serde_json::from_slice(bytes).ok()?;
        (payload.version() == PAYLOAD_VERSION).then_some(payload)
    }
}
