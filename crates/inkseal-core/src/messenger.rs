//! Outgoing and incoming message flow.
//!
//! Ties custody, the envelope, the bundle codec and the trust store
//! together: text in, token out, and token in, [`Incoming`] out.

use std::sync::Arc;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use inkseal_crypto::envelope::{self, Envelope};
use inkseal_crypto::{Fingerprint, OpenedVia};

use crate::bundle::{self, Prefixes};
use crate::config::{Config, IntegrityPolicy};
use crate::custody::{KeyCustody, Session};
use crate::device_key::{DeviceKeyProvider, StoredDeviceKey};
use crate::errors::{Error, ErrorCode, Result};
use crate::now_ms;
use crate::payload::{Channel, ExchangeRequest, Payload};
use crate::store::SecretStore;
use crate::trust::{build_exchange_ack, build_exchange_request, is_own_request, Contact, TrustStore};

/// A decrypted message.
#[derive(Debug)]
pub struct Decrypted {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub hash_ok: bool,
    /// `None` when unsigned or the signer is unknown.
    pub sig_ok: Option<bool>,
    pub opened_via: OpenedVia,
    /// Fingerprint the envelope claims to come from.
    pub from: Fingerprint,
    /// Contact matching `from`. Only authenticated when `sig_ok == Some(true)`.
    pub sender: Option<Contact>,
    /// The envelope was sealed by this installation's identity.
    pub from_self: bool,
    pub time: u64,
}

impl Decrypted {
    /// Plaintext as UTF-8, if it is.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.plaintext).ok()
    }
}

/// What a recognized token turned out to be.
#[derive(Debug)]
pub enum Incoming {
    Message(Decrypted),
    /// Not accepted automatically; call [`Messenger::accept_invite`].
    ExchangeRequest { request: ExchangeRequest, own: bool },
    /// The contact recorded from the ack, or `None` if it answered someone else.
    ExchangeAck(Option<Contact>),
    /// A message token that could not be opened.
    Failed(ErrorCode),
}

pub struct Messenger {
    custody: KeyCustody,
    trust: TrustStore,
    prefixes: Prefixes,
    sign_messages: bool,
    integrity: IntegrityPolicy,
}

impl Messenger {
    pub fn new(custody: KeyCustody, trust: TrustStore, config: &Config) -> Self {
        Self {
            custody,
            trust,
            prefixes: config.prefixes.clone(),
            sign_messages: config.messaging.sign_messages,
            integrity: config.messaging.integrity,
        }
    }

    /// Everything in one store, with the device key kept there too.
    pub fn with_store(store: Arc<dyn SecretStore>, config: &Config) -> Self {
        let device: Arc<dyn DeviceKeyProvider> = Arc::new(StoredDeviceKey::new(store.clone()));
        let custody = KeyCustody::new(store.clone(), device, config.custody.kdf);
        Self::new(custody, TrustStore::new(store), config)
    }

    pub fn custody(&self) -> &KeyCustody {
        &self.custody
    }

    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    pub fn prefixes(&self) -> &Prefixes {
        &self.prefixes
    }

    /// Exchange token inviting whoever reads `channel` to exchange keys.
    pub async fn invite(&self, session: &Session, channel: &Channel) -> Result<String> {
        let id = self.custody.ensure_identity(session).await?;
        let request = build_exchange_request(&id.public, channel);
        info!(fingerprint = %id.public.fingerprint.display, channel = %channel.id(), "created invite");
        Ok(bundle::encode(
            &self.prefixes.exchange,
            &Payload::ExchangeRequest(request),
        ))
    }

    /// Record the requester and return the ack token to send back.
    pub async fn accept_invite(
        &self,
        session: &Session,
        channel: &Channel,
        request: &ExchangeRequest,
    ) -> Result<(Contact, String)> {
        let id = self.custody.ensure_identity(session).await?;
        let contact = self
            .trust
            .accept_exchange(request, channel, &id.public.fingerprint)
            .await?;
        let ack = build_exchange_ack(request, &id.public, channel);
        let token = bundle::encode(&self.prefixes.exchange, &Payload::ExchangeAck(ack));
        Ok((contact, token))
    }

    /// Message token for `contact`.
    pub async fn encrypt_for(&self, session: &Session, contact: &Contact, plaintext: &str) -> Result<String> {
        let keys = self.custody.unlock(session).await?;
        let me = keys.public();
        let signer = self.sign_messages.then(|| keys.signing_key());

        let env = envelope::seal(
            &contact.enc_pub,
            &me.enc,
            signer,
            me.fingerprint(),
            plaintext.as_bytes(),
            now_ms(),
        )?;
        debug!(contact = %contact.id, signed = env.sig.is_some(), "sealed message");
        Ok(bundle::encode(&self.prefixes.message, &Payload::Message(env)))
    }

    /// Classify `text` as a single token and act on it.
    ///
    /// `Ok(None)` for text that is not one of ours.
    pub async fn handle_text(
        &self,
        session: &Session,
        channel: &Channel,
        text: &str,
    ) -> Result<Option<Incoming>> {
        let Some(payload) = bundle::classify(&self.prefixes, text.trim()) else {
            return Ok(None);
        };
        self.dispatch(session, channel, payload).await.map(Some)
    }

    /// Act on every token found in a block of free text.
    pub async fn handle_all(&self, session: &Session, channel: &Channel, text: &str) -> Result<Vec<Incoming>> {
        let mut out = Vec::new();
        for payload in bundle::find_tokens(&self.prefixes, text) {
            out.push(self.dispatch(session, channel, payload).await?);
        }
        Ok(out)
    }

    async fn dispatch(&self, session: &Session, channel: &Channel, payload: Payload) -> Result<Incoming> {
        match payload {
            Payload::Message(env) => match self.open_message(session, &env).await {
                Ok(msg) => Ok(Incoming::Message(msg)),
                Err(e) if e.code() == ErrorCode::Storage => Err(e),
                Err(e) => {
                    warn!(code = %e.code(), from = %env.from.display, "message could not be opened: {}", e);
                    Ok(Incoming::Failed(e.code()))
                }
            },
            Payload::ExchangeRequest(request) => {
                let own = match self.custody.public_identity().await? {
                    Some(me) => is_own_request(&request, &me.fingerprint),
                    None => false,
                };
                debug!(from = %request.from.display, own, "exchange request seen");
                Ok(Incoming::ExchangeRequest { request, own })
            }
            Payload::ExchangeAck(ack) => {
                let Some(me) = self.custody.public_identity().await? else {
                    return Ok(Incoming::ExchangeAck(None));
                };
                let contact = self.trust.accept_ack(&ack, channel, &me.fingerprint).await?;
                Ok(Incoming::ExchangeAck(contact))
            }
        }
    }

    async fn open_message(&self, session: &Session, env: &Envelope) -> Result<Decrypted> {
        let keys = self.custody.unlock(session).await?;
        let me = keys.public();
        let from_self = env.from.matches(&me.fingerprint());

        let sender = if from_self {
            None
        } else {
            self.trust.find_by_fingerprint(&env.from).await?
        };
        let signer = if from_self {
            Some(me.sig)
        } else {
            sender.as_ref().map(|c| c.sig_pub)
        };

        let opened = envelope::open(keys.enc_secret(), signer.as_ref(), env)?;
        let integrity_ok = opened.hash_ok && opened.sig_ok != Some(false);
        if !integrity_ok {
            warn!(
                from = %env.from.display,
                hash_ok = opened.hash_ok,
                sig_ok = ?opened.sig_ok,
                policy = ?self.integrity,
                "message integrity check failed"
            );
            if self.integrity == IntegrityPolicy::Strict {
                return Err(Error::IntegrityFail);
            }
        }

        if let Some(contact) = &sender {
            self.trust.touch(&contact.id).await?;
        }

        Ok(Decrypted {
            plaintext: opened.plaintext,
            hash_ok: opened.hash_ok,
            sig_ok: opened.sig_ok,
            opened_via: opened.opened_via,
            from: env.from.clone(),
            sender,
            from_self,
            time: env.time,
        })
    }
}
