use proptest::prelude::*;

use crate::codec::{b64url_decode, b64url_encode};
use crate::envelope::{open, seal, EnvelopeError, OpenedVia};
use crate::identity::fingerprint;
use crate::keys::PrivateKeys;
use crate::transcript::Transcript;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_transcript_determinism(
        tag1 in any::<u32>(),
        data1 in any::<Vec<u8>>(),
        tag2 in any::<u32>(),
        data2 in any::<Vec<u8>>()
    ) {
        let mut t1 = Transcript::new("test");
        t1.append_bytes(tag1, &data1).append_bytes(tag2, &data2);

        let mut t2 = Transcript::new("test");
        t2.append_bytes(tag1, &data1).append_bytes(tag2, &data2);

        prop_assert_eq!(t1.digest(), t2.digest());
    }

    #[test]
    fn test_b64url_round_trip(data in any::<Vec<u8>>()) {
        let text = b64url_encode(&data);
        prop_assert!(!text.contains('='));
        prop_assert!(!text.contains('+') && !text.contains('/'));
        prop_assert_eq!(b64url_decode(&text).unwrap(), data);
    }

    #[test]
    fn test_fingerprint_determinism(enc in any::<[u8; 32]>(), sig in any::<[u8; 32]>(), flip in 0usize..64) {
        let a = fingerprint(&enc, &sig);
        prop_assert_eq!(&a, &fingerprint(&enc, &sig));

        let (mut enc2, mut sig2) = (enc, sig);
        if flip < 32 { enc2[flip] ^= 1 } else { sig2[flip - 32] ^= 1 }
        prop_assert_ne!(a.display, fingerprint(&enc2, &sig2).display);
    }

    #[test]
    fn test_envelope_round_trip_and_self_read(plaintext in any::<Vec<u8>>(), signed in any::<bool>()) {
        let sender = PrivateKeys::generate();
        let recipient = PrivateKeys::generate();
        let env = seal(
            &recipient.public().enc,
            &sender.public().enc,
            signed.then(|| sender.signing_key()),
            sender.public().fingerprint(),
            &plaintext,
            0,
        ).unwrap();

        let theirs = open(recipient.enc_secret(), Some(&sender.public().sig), &env).unwrap();
        prop_assert_eq!(theirs.plaintext.as_slice(), plaintext.as_slice());
        prop_assert!(theirs.hash_ok);
        prop_assert_eq!(theirs.sig_ok, signed.then_some(true));
        prop_assert_eq!(theirs.opened_via, OpenedVia::RecipientWrap);

        let mine = open(sender.enc_secret(), Some(&sender.public().sig), &env).unwrap();
        prop_assert_eq!(mine.plaintext.as_slice(), plaintext.as_slice());
        prop_assert_eq!(mine.opened_via, OpenedVia::SelfWrap);
    }

    #[test]
    fn test_envelope_tamper_any_ct_bit(plaintext in prop::collection::vec(any::<u8>(), 1..64), bit in any::<usize>()) {
        let sender = PrivateKeys::generate();
        let recipient = PrivateKeys::generate();
        let mut env = seal(
            &recipient.public().enc,
            &sender.public().enc,
            None,
            sender.public().fingerprint(),
            &plaintext,
            0,
        ).unwrap();

        let bit = bit % (env.ct.len() * 8);
        env.ct[bit / 8] ^= 1 << (bit % 8);
        prop_assert_eq!(
            open(recipient.enc_secret(), None, &env).unwrap_err(),
            EnvelopeError::DecryptFailed
        );
    }
}
