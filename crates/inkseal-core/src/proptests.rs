use proptest::prelude::*;

use inkseal_crypto::PrivateKeys;

use crate::bundle::{classify, decode, encode, find_tokens, Prefixes};
use crate::payload::{Channel, ExchangeRequest, Payload, PAYLOAD_VERSION};

fn request(domain: String, conversation: String, time: u64) -> Payload {
    let keys = PrivateKeys::generate().public();
    let from = keys.fingerprint();
    Payload::ExchangeRequest(ExchangeRequest {
        v: PAYLOAD_VERSION,
        sas: from.short_code.clone(),
        from,
        keys,
        time,
        meta: Channel::new(domain, conversation),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_bundle_round_trip(
        prefix in "[A-Z]{1,8}\\|",
        domain in "\\PC{0,24}",
        conversation in "\\PC{0,24}",
        time in any::<u64>()
    ) {
        let payload = request(domain, conversation, time);
        let token = encode(&prefix, &payload);
        prop_assert_eq!(decode(&prefix, &token), Some(payload));
    }

    #[test]
    fn test_prefix_discrimination(a in "[A-Z]{1,8}\\|", b in "[a-z]{1,8}\\|") {
        let payload = request("d".into(), "c".into(), 0);
        let token = encode(&b, &payload);
        prop_assert_eq!(decode(&a, &token), None);
    }

    #[test]
    fn test_classify_never_panics(text in "\\PC{0,256}") {
        let prefixes = Prefixes::default();
        let _ = classify(&prefixes, &text);
        let _ = find_tokens(&prefixes, &text);
        let prefixed = format!("{}{}", prefixes.message, text);
        let _ = classify(&prefixes, &prefixed);
    }

    #[test]
    fn test_prefix_validation_guarantees_disjoint(m in "[A-Z|-]{1,6}", e in "[A-Z|-]{1,6}") {
        let prefixes = Prefixes { message: m, exchange: e };
        if prefixes.validate().is_ok() {
            prop_assert!(!prefixes.message.starts_with(&prefixes.exchange));
            prop_assert!(!prefixes.exchange.starts_with(&prefixes.message));
        }
    }
}
