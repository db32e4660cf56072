//! Scripted two-party flows.
//!
//! Used by the integration tests and the demo binary to drive the whole
//! exchange + messaging path the way two real installations would.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use crate::config::Config;
use crate::custody::Session;
use crate::messenger::{Decrypted, Incoming, Messenger};
use crate::payload::Channel;
use crate::store::SecretStore;
use crate::trust::Contact;

/// One installation taking part in a scripted conversation.
pub struct Party {
    pub name: String,
    pub messenger: Messenger,
    pub session: Session,
    /// The channel as seen from this party's side.
    pub channel: Channel,
}

impl Party {
    pub fn new(name: &str, store: Arc<dyn SecretStore>, config: &Config, channel: Channel) -> Self {
        Self {
            name: name.to_string(),
            messenger: Messenger::with_store(store, config),
            session: Session::locked(),
            channel,
        }
    }

    /// Seal `text` for `to`.
    pub async fn send(&self, to: &Contact, text: &str) -> anyhow::Result<String> {
        self.messenger
            .encrypt_for(&self.session, to, text)
            .await
            .with_context(|| format!("{} failed to encrypt", self.name))
    }

    /// Open a message token. Anything other than a message is an error here.
    pub async fn receive(&self, token: &str) -> anyhow::Result<Decrypted> {
        match self
            .messenger
            .handle_text(&self.session, &self.channel, token)
            .await?
        {
            Some(Incoming::Message(msg)) => Ok(msg),
            Some(Incoming::Failed(code)) => bail!("{} could not open message: {}", self.name, code),
            Some(other) => bail!("{} expected a message, got {:?}", self.name, other),
            None => bail!("{} did not recognize the token", self.name),
        }
    }
}

/// `inviter` invites, `invitee` accepts, `inviter` records the ack.
///
/// Returns (inviter's contact for invitee, invitee's contact for inviter).
pub async fn run_exchange(inviter: &Party, invitee: &Party) -> anyhow::Result<(Contact, Contact)> {
    let invite = inviter
        .messenger
        .invite(&inviter.session, &inviter.channel)
        .await?;

    let request = match invitee
        .messenger
        .handle_text(&invitee.session, &invitee.channel, &invite)
        .await?
    {
        Some(Incoming::ExchangeRequest { request, own: false }) => request,
        other => bail!("{} expected a foreign exchange request, got {:?}", invitee.name, other),
    };

    let (inviter_contact, ack) = invitee
        .messenger
        .accept_invite(&invitee.session, &invitee.channel, &request)
        .await?;

    let invitee_contact = match inviter
        .messenger
        .handle_text(&inviter.session, &inviter.channel, &ack)
        .await?
    {
        Some(Incoming::ExchangeAck(Some(contact))) => contact,
        other => bail!("{} expected an ack addressed to it, got {:?}", inviter.name, other),
    };

    Ok((invitee_contact, inviter_contact))
}

/// Outcome of [`run_conversation`].
#[derive(Debug)]
pub struct ConversationReport {
    /// Short code each side computed for the other.
    pub codes: (String, String),
    pub delivered: String,
    pub reply: String,
    pub read_back: String,
}

/// Exchange keys, verify both contacts by short code, send one message each
/// way and have the first sender read its own message back.
pub async fn run_conversation(a: &Party, b: &Party, text: &str) -> anyhow::Result<ConversationReport> {
    let (a_sees_b, b_sees_a) = run_exchange(a, b).await?;

    // the codes each side reads aloud are the ones the other side computes
    // for itself
    let a_id = a
        .messenger
        .custody()
        .public_identity()
        .await?
        .ok_or_else(|| anyhow!("{} has no identity", a.name))?;
    let b_id = b
        .messenger
        .custody()
        .public_identity()
        .await?
        .ok_or_else(|| anyhow!("{} has no identity", b.name))?;
    a.messenger
        .trust()
        .verify_contact(&a_sees_b.id, &b_id.fingerprint.short_code)
        .await?;
    b.messenger
        .trust()
        .verify_contact(&b_sees_a.id, &a_id.fingerprint.short_code)
        .await?;

    let token = a.send(&a_sees_b, text).await?;
    let delivered = b.receive(&token).await?;
    if delivered.sig_ok != Some(true) || !delivered.hash_ok {
        bail!("{} received a message failing integrity checks", b.name);
    }

    let reply_token = b.send(&b_sees_a, &format!("re: {text}")).await?;
    let reply = a.receive(&reply_token).await?;

    let read_back = a.receive(&token).await?;
    if !read_back.from_self {
        bail!("{} did not recognize its own message", a.name);
    }

    Ok(ConversationReport {
        codes: (
            a_sees_b.fingerprint().short_code,
            b_sees_a.fingerprint().short_code,
        ),
        delivered: text_of(&delivered)?,
        reply: text_of(&reply)?,
        read_back: text_of(&read_back)?,
    })
}

fn text_of(msg: &Decrypted) -> anyhow::Result<String> {
    msg.text()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("plaintext is not UTF-8"))
}
