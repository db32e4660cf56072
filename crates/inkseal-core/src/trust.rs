//! Contact directory and key exchange.
//!
//! Peers are trusted on first use: an accepted exchange records their keys
//! with `verified = false`. Only [`TrustStore::verify_contact`], fed with a
//! short code compared out of band, promotes a contact to verified.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use inkseal_crypto::codec::b64_array;
use inkseal_crypto::{Fingerprint, PublicKeys};

use crate::custody::PublicIdentity;
use crate::errors::TrustError;
use crate::now_ms;
use crate::payload::{Channel, ExchangeAck, ExchangeRequest, PAYLOAD_VERSION};
use crate::store::{load_json, save_json, SecretStore, KEY_CONTACTS};

/// One peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// `"{domain}:{conversationId}"` of the channel it was learned on.
    pub id: String,
    pub name: String,
    pub domain: String,
    pub conversation_id: String,
    #[serde(with = "b64_array")]
    pub enc_pub: [u8; 32],
    #[serde(with = "b64_array")]
    pub sig_pub: [u8; 32],
    pub verified: bool,
    pub created_at: u64,
    pub last_seen: u64,
}

impl Contact {
    /// Unverified contact for `keys`, seen on `channel` just now.
    pub fn new(channel: &Channel, keys: &PublicKeys) -> Self {
        let now = now_ms();
        Self {
            id: channel.id(),
            name: channel.conversation_id.clone(),
            domain: channel.domain.clone(),
            conversation_id: channel.conversation_id.clone(),
            enc_pub: keys.enc,
            sig_pub: keys.sig,
            verified: false,
            created_at: now,
            last_seen: now,
        }
    }

    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            enc: self.enc_pub,
            sig: self.sig_pub,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public_keys().fingerprint()
    }

    fn same_channel(&self, other: &Contact) -> bool {
        self.id == other.id
            || (self.domain == other.domain && self.conversation_id == other.conversation_id)
    }
}

// ============================================================================
// Exchange payloads
// ============================================================================

pub fn build_exchange_request(me: &PublicIdentity, channel: &Channel) -> ExchangeRequest {
    ExchangeRequest {
        v: PAYLOAD_VERSION,
        from: me.fingerprint.clone(),
        keys: me.keys.clone(),
        sas: me.fingerprint.short_code.clone(),
        time: now_ms(),
        meta: channel.clone(),
    }
}

pub fn build_exchange_ack(
    request: &ExchangeRequest,
    me: &PublicIdentity,
    channel: &Channel,
) -> ExchangeAck {
    ExchangeAck {
        v: PAYLOAD_VERSION,
        to: request.from.clone(),
        keys: me.keys.clone(),
        time: now_ms(),
        meta: channel.clone(),
    }
}

/// Whether `request` was produced by the identity `own`.
pub fn is_own_request(request: &ExchangeRequest, own: &Fingerprint) -> bool {
    request.from.matches(own) || request.keys.fingerprint().matches(own)
}

/// Reject requests whose claimed fingerprint or short code do not follow
/// from the keys they carry.
fn check_request(request: &ExchangeRequest) -> Result<(), TrustError> {
    request.keys.validate()?;
    let computed = request.keys.fingerprint();
    if !computed.matches(&request.from) || !computed.short_code_matches(&request.sas) {
        return Err(TrustError::FingerprintMismatch);
    }
    Ok(())
}

// ============================================================================
// TrustStore
// ============================================================================

pub struct TrustStore {
    store: Arc<dyn SecretStore>,
    lock: Mutex<()>,
}

impl TrustStore {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Record the sender of `request` as a contact on `channel`.
    pub async fn accept_exchange(
        &self,
        request: &ExchangeRequest,
        channel: &Channel,
        own: &Fingerprint,
    ) -> Result<Contact, TrustError> {
        if is_own_request(request, own) {
            return Err(TrustError::OwnRequest);
        }
        check_request(request)?;
        let contact = self.import_contact(Contact::new(channel, &request.keys)).await?;
        info!(
            contact = %contact.id,
            fingerprint = %request.from.display,
            "accepted key exchange"
        );
        Ok(contact)
    }

    /// Record the responder of an ack. `None` if it answers someone else.
    pub async fn accept_ack(
        &self,
        ack: &ExchangeAck,
        channel: &Channel,
        own: &Fingerprint,
    ) -> Result<Option<Contact>, TrustError> {
        if !ack.to.matches(own) {
            debug!(to = %ack.to.display, "ack addressed to another identity");
            return Ok(None);
        }
        if ack.keys.fingerprint().matches(own) {
            debug!("ignoring our own ack");
            return Ok(None);
        }
        ack.keys.validate()?;
        let contact = self.import_contact(Contact::new(channel, &ack.keys)).await?;
        info!(
            contact = %contact.id,
            fingerprint = %contact.fingerprint().display,
            "recorded key exchange ack"
        );
        Ok(Some(contact))
    }

    /// Insert `contact`, or merge it into the record with the same id or
    /// the same (domain, conversationId).
    ///
    /// A merge keeps `createdAt` and the name. If the keys changed,
    /// `verified` is reset.
    pub async fn import_contact(&self, contact: Contact) -> Result<Contact, TrustError> {
        self.mutate(|contacts| {
            let Some(idx) = contacts.iter().position(|c| c.same_channel(&contact)) else {
                contacts.push(contact.clone());
                return Ok(contact);
            };
            let existing = &mut contacts[idx];

            let keys_changed =
                existing.enc_pub != contact.enc_pub || existing.sig_pub != contact.sig_pub;
            if keys_changed {
                warn!(
                    contact = %existing.id,
                    old = %existing.fingerprint().display,
                    new = %contact.fingerprint().display,
                    "contact keys changed; verification reset"
                );
                existing.verified = false;
            } else {
                existing.verified |= contact.verified;
            }
            existing.enc_pub = contact.enc_pub;
            existing.sig_pub = contact.sig_pub;
            existing.last_seen = existing.last_seen.max(contact.last_seen);
            Ok(existing.clone())
        })
        .await
    }

    /// The contact for `channel`: exact id, then matching
    /// (domain, conversationId), then the only contact on that domain.
    /// Ambiguity yields `None`.
    pub async fn resolve_active_contact(&self, channel: &Channel) -> Result<Option<Contact>, TrustError> {
        let contacts = self.list_contacts().await?;
        let id = channel.id();

        if let Some(c) = contacts.iter().find(|c| c.id == id) {
            return Ok(Some(c.clone()));
        }
        if let Some(c) = contacts
            .iter()
            .find(|c| c.domain == channel.domain && c.conversation_id == channel.conversation_id)
        {
            return Ok(Some(c.clone()));
        }

        let mut same_domain = contacts.into_iter().filter(|c| c.domain == channel.domain);
        match (same_domain.next(), same_domain.next()) {
            (Some(only), None) => Ok(Some(only)),
            (Some(_), Some(_)) => {
                debug!(channel = %id, "ambiguous contact match");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Mark verified if `entered_code` equals the contact's short code.
    pub async fn verify_contact(&self, id: &str, entered_code: &str) -> Result<Contact, TrustError> {
        self.mutate(|contacts| {
            let contact = find_mut(contacts, id)?;
            if !contact.fingerprint().short_code_matches(entered_code) {
                warn!(contact = %id, "short code mismatch");
                return Err(TrustError::CodeMismatch);
            }
            contact.verified = true;
            info!(contact = %id, "contact verified");
            Ok(contact.clone())
        })
        .await
    }

    pub async fn unverify_contact(&self, id: &str) -> Result<Contact, TrustError> {
        self.mutate(|contacts| {
            let contact = find_mut(contacts, id)?;
            contact.verified = false;
            Ok(contact.clone())
        })
        .await
    }

    pub async fn rename_contact(&self, id: &str, name: &str) -> Result<Contact, TrustError> {
        self.mutate(|contacts| {
            let contact = find_mut(contacts, id)?;
            contact.name = name.to_string();
            Ok(contact.clone())
        })
        .await
    }

    /// Update `lastSeen` to now.
    pub async fn touch(&self, id: &str) -> Result<(), TrustError> {
        self.mutate(|contacts| {
            find_mut(contacts, id)?.last_seen = now_ms();
            Ok(())
        })
        .await
    }

    pub async fn find_by_fingerprint(&self, fp: &Fingerprint) -> Result<Option<Contact>, TrustError> {
        Ok(self
            .list_contacts()
            .await?
            .into_iter()
            .find(|c| c.fingerprint().matches(fp)))
    }

    pub async fn get_contact(&self, id: &str) -> Result<Option<Contact>, TrustError> {
        Ok(self.list_contacts().await?.into_iter().find(|c| c.id == id))
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>, TrustError> {
        Ok(load_json(self.store.as_ref(), KEY_CONTACTS)
            .await?
            .unwrap_or_default())
    }

    /// Returns whether a contact was removed.
    pub async fn remove_contact(&self, id: &str) -> Result<bool, TrustError> {
        self.mutate(|contacts| {
            let before = contacts.len();
            contacts.retain(|c| c.id != id);
            Ok(contacts.len() != before)
        })
        .await
    }

    /// Load, modify and save the contact list under the lock. Nothing is
    /// written when `f` fails.
    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Vec<Contact>) -> Result<R, TrustError>,
    ) -> Result<R, TrustError> {
        let _guard = self.lock.lock().await;
        let mut contacts: Vec<Contact> = load_json(self.store.as_ref(), KEY_CONTACTS)
            .await?
            .unwrap_or_default();
        let out = f(&mut contacts)?;
        save_json(self.store.as_ref(), KEY_CONTACTS, &contacts).await?;
        Ok(out)
    }
}

fn find_mut<'a>(contacts: &'a mut [Contact], id: &str) -> Result<&'a mut Contact, TrustError> {
    contacts
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| TrustError::UnknownContact(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use inkseal_crypto::PrivateKeys;

    fn identity() -> PublicIdentity {
        let keys = PrivateKeys::generate().public();
        PublicIdentity {
            fingerprint: keys.fingerprint(),
            keys,
            created_at: 0,
        }
    }

    fn trust() -> TrustStore {
        TrustStore::new(InMemoryStore::new_shared())
    }

    #[tokio::test]
    async fn test_accept_exchange_records_unverified() {
        let store = trust();
        let me = identity();
        let peer = identity();
        let ch = Channel::new("chat.example", "room");

        let req = build_exchange_request(&peer, &ch);
        assert_eq!(req.sas, peer.fingerprint.short_code);

        let contact = store.accept_exchange(&req, &ch, &me.fingerprint).await.unwrap();
        assert!(!contact.verified);
        assert_eq!(contact.id, "chat.example:room");
        assert_eq!(contact.public_keys(), peer.keys);
        assert_eq!(store.list_contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_own_request_rejected() {
        let store = trust();
        let me = identity();
        let ch = Channel::new("chat.example", "room");
        let req = build_exchange_request(&me, &ch);
        assert_eq!(
            store.accept_exchange(&req, &ch, &me.fingerprint).await.unwrap_err(),
            TrustError::OwnRequest
        );
        assert!(store.list_contacts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forged_request_rejected() {
        let store = trust();
        let me = identity();
        let victim = identity();
        let attacker = identity();
        let ch = Channel::new("chat.example", "room");

        // attacker's keys presented under the victim's fingerprint
        let mut req = build_exchange_request(&victim, &ch);
        req.keys = attacker.keys.clone();
        assert_eq!(
            store.accept_exchange(&req, &ch, &me.fingerprint).await.unwrap_err(),
            TrustError::FingerprintMismatch
        );

        let mut req = build_exchange_request(&attacker, &ch);
        req.sas = "000000".into();
        if attacker.fingerprint.short_code != "000000" {
            assert_eq!(
                store.accept_exchange(&req, &ch, &me.fingerprint).await.unwrap_err(),
                TrustError::FingerprintMismatch
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_signing_key_rejected() {
        let store = trust();
        let me = identity();
        // y = 2 is not on the curve
        let mut sig = [0u8; 32];
        sig[0] = 2;
        let keys = PublicKeys { enc: [7u8; 32], sig };
        let bogus = PublicIdentity { fingerprint: keys.fingerprint(), keys, created_at: 0 };
        let ch = Channel::new("chat.example", "room");
        let req = build_exchange_request(&bogus, &ch);
        assert!(matches!(
            store.accept_exchange(&req, &ch, &me.fingerprint).await,
            Err(TrustError::InvalidKeys(_))
        ));
    }

    #[tokio::test]
    async fn test_ack_addressed_elsewhere_ignored() {
        let store = trust();
        let me = identity();
        let someone = identity();
        let responder = identity();
        let ch = Channel::new("chat.example", "room");

        let req = build_exchange_request(&someone, &ch);
        let ack = build_exchange_ack(&req, &responder, &ch);
        assert_eq!(store.accept_ack(&ack, &ch, &me.fingerprint).await.unwrap(), None);

        let req = build_exchange_request(&me, &ch);
        let ack = build_exchange_ack(&req, &responder, &ch);
        let contact = store.accept_ack(&ack, &ch, &me.fingerprint).await.unwrap().unwrap();
        assert_eq!(contact.public_keys(), responder.keys);
    }

    #[tokio::test]
    async fn test_merge_by_channel() {
        let store = trust();
        let peer = identity();
        let ch = Channel::new("chat.example", "room");

        let first = store.import_contact(Contact::new(&ch, &peer.keys)).await.unwrap();
        store.verify_contact(&first.id, &peer.fingerprint.short_code).await.unwrap();

        // same keys again: no duplicate, verification kept
        let mut again = Contact::new(&ch, &peer.keys);
        again.created_at = first.created_at + 1000;
        let merged = store.import_contact(again).await.unwrap();
        assert!(merged.verified);
        assert_eq!(merged.created_at, first.created_at);
        assert_eq!(store.list_contacts().await.unwrap().len(), 1);

        // new keys on the same channel: merged, verification reset
        let rotated = identity();
        let merged = store.import_contact(Contact::new(&ch, &rotated.keys)).await.unwrap();
        assert!(!merged.verified);
        assert_eq!(merged.public_keys(), rotated.keys);
        assert_eq!(store.list_contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_merge_keeps_user_chosen_name() {
        let store = trust();
        let me = identity();
        let peer = identity();
        let ch = Channel::new("chat.example", "room");

        let req = build_exchange_request(&peer, &ch);
        let first = store.accept_exchange(&req, &ch, &me.fingerprint).await.unwrap();
        store.rename_contact(&first.id, "Alice").await.unwrap();

        // the same peer exchanges again, then with rotated keys
        let again = store.accept_exchange(&req, &ch, &me.fingerprint).await.unwrap();
        assert_eq!(again.name, "Alice");
        let rotated = identity();
        let merged = store.import_contact(Contact::new(&ch, &rotated.keys)).await.unwrap();
        assert_eq!(merged.name, "Alice");
        assert_eq!(store.get_contact(&first.id).await.unwrap().unwrap().name, "Alice");
    }

    #[tokio::test]
    async fn test_merge_by_domain_and_conversation() {
        let store = trust();
        let peer = identity();
        let ch = Channel::new("chat.example", "room");
        let mut c = Contact::new(&ch, &peer.keys);
        c.id = "legacy-id".into();
        store.import_contact(c).await.unwrap();

        store.import_contact(Contact::new(&ch, &peer.keys)).await.unwrap();
        let all = store.list_contacts().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "legacy-id");
    }

    #[tokio::test]
    async fn test_verify_contact() {
        let store = trust();
        let peer = identity();
        let ch = Channel::new("chat.example", "room");
        let c = store.import_contact(Contact::new(&ch, &peer.keys)).await.unwrap();

        let wrong = if peer.fingerprint.short_code == "123456" { "654321" } else { "123456" };
        assert_eq!(
            store.verify_contact(&c.id, wrong).await.unwrap_err(),
            TrustError::CodeMismatch
        );
        assert!(!store.get_contact(&c.id).await.unwrap().unwrap().verified);

        let code = format!(" {} ", peer.fingerprint.short_code);
        assert!(store.verify_contact(&c.id, &code).await.unwrap().verified);
        assert!(!store.unverify_contact(&c.id).await.unwrap().verified);

        assert_eq!(
            store.verify_contact("nope", "000000").await.unwrap_err(),
            TrustError::UnknownContact("nope".into())
        );
    }

    #[tokio::test]
    async fn test_resolve_active_contact() {
        let store = trust();
        let a = identity();
        let b = identity();

        let room1 = Channel::new("chat.example", "room1");
        let room2 = Channel::new("chat.example", "room2");
        let other = Channel::new("mail.example", "inbox");

        assert_eq!(store.resolve_active_contact(&room1).await.unwrap(), None);

        store.import_contact(Contact::new(&room1, &a.keys)).await.unwrap();
        // exact
        assert_eq!(
            store.resolve_active_contact(&room1).await.unwrap().unwrap().public_keys(),
            a.keys
        );
        // single same-domain fallback
        assert_eq!(
            store.resolve_active_contact(&room2.clone().with_url("https://x")).await.unwrap().unwrap().public_keys(),
            a.keys
        );
        assert_eq!(store.resolve_active_contact(&other).await.unwrap(), None);

        store.import_contact(Contact::new(&room2, &b.keys)).await.unwrap();
        let room3 = Channel::new("chat.example", "room3");
        // ambiguous
        assert_eq!(store.resolve_active_contact(&room3).await.unwrap(), None);
        assert_eq!(
            store.resolve_active_contact(&room2).await.unwrap().unwrap().public_keys(),
            b.keys
        );
    }

    #[tokio::test]
    async fn test_find_touch_rename_remove() {
        let store = trust();
        let peer = identity();
        let ch = Channel::new("chat.example", "room");
        let mut c = Contact::new(&ch, &peer.keys);
        c.last_seen = 1;
        let c = store.import_contact(c).await.unwrap();

        let found = store.find_by_fingerprint(&peer.fingerprint).await.unwrap().unwrap();
        assert_eq!(found.id, c.id);
        assert_eq!(store.find_by_fingerprint(&identity().fingerprint).await.unwrap(), None);

        store.touch(&c.id).await.unwrap();
        assert!(store.get_contact(&c.id).await.unwrap().unwrap().last_seen > 1);

        assert_eq!(store.rename_contact(&c.id, "Alice").await.unwrap().name, "Alice");

        assert!(store.remove_contact(&c.id).await.unwrap());
        assert!(!store.remove_contact(&c.id).await.unwrap());
        assert!(matches!(store.touch(&c.id).await, Err(TrustError::UnknownContact(_))));
    }

    #[tokio::test]
    async fn test_concurrent_imports_not_lost() {
        let store = Arc::new(trust());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let peer = identity();
                let ch = Channel::new("chat.example", format!("room{i}"));
                store.import_contact(Contact::new(&ch, &peer.keys)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.list_contacts().await.unwrap().len(), 16);
    }

    #[test]
    fn test_contact_wire_shape() {
        let peer = identity();
        let c = Contact::new(&Channel::new("d", "c"), &peer.keys);
        let json = serde_json::to_value(&c).unwrap();
        for field in ["id", "name", "domain", "conversationId", "encPub", "sigPub", "verified", "createdAt", "lastSeen"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
