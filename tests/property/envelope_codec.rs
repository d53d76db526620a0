#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property tests for the envelope codec.
//!
//! 1. Arbitrary input never panics the decoder.
//! 2. Any chat envelope decodes back to itself, with the broadcast literal
//!    and peer names preserved exactly.
//! 3. Objects carrying an unknown `type` tag are always rejected.

use opsdesk_proto::codec::{self, DecodeError};
use opsdesk_proto::envelope::{ChatEnvelope, Destination, Envelope};
use proptest::prelude::*;

fn arb_destination() -> impl Strategy<Value = Destination> {
    prop_oneof![
        Just(Destination::All),
        "[a-z][a-z0-9_.]{0,15}".prop_map(Destination::new),
    ]
}

fn arb_chat() -> impl Strategy<Value = Envelope> {
    (
        "[a-z][a-z0-9_]{0,15}",
        prop_oneof![Just("agent".to_string()), Just("teamleader".to_string())],
        arb_destination(),
        "\\PC{1,200}",
    )
        .prop_map(|(from, from_type, to, text)| {
            Envelope::Chat(ChatEnvelope {
                from,
                from_type,
                to,
                text,
                timestamp: "2026-10-14T09:30:00.000Z".to_string(),
            })
        })
}

proptest! {
    #[test]
    fn decode_never_panics(frame in "\\PC*") {
        let _ = codec::decode(&frame);
    }

    #[test]
    fn decode_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_bytes(&bytes);
    }

    #[test]
    fn chat_envelopes_survive_the_wire(env in arb_chat()) {
        let frame = codec::encode(&env).unwrap();
        prop_assert_eq!(codec::decode(&frame).unwrap(), env);
    }

    #[test]
    fn unknown_types_are_malformed(tag in "[a-z]{1,12}") {
        prop_assume!(tag != "chat" && tag != "register");
        let frame = format!(r#"{{"type":"{tag}","from":"bob","to":"all","text":"x"}}"#);
        prop_assert!(matches!(codec::decode(&frame), Err(DecodeError::Malformed(_))));
    }
}
