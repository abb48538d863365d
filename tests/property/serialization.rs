//! Property-based serialization round-trip tests for the socket event
//! contract.
//!
//! Uses proptest to verify:
//! 1. Any valid `ClientEvent` survives encode → decode round-trip.
//! 2. Any valid `ServerEvent` survives encode → decode round-trip.
//! 3. Arbitrary text never causes a panic in `decode` (returns `Err`
//!    gracefully).
//! 4. Every encoded frame is a JSON object carrying a `type` tag.

use proptest::prelude::*;
use trocchat_proto::codec;
use trocchat_proto::event::{ClientEvent, SendErrorKind, ServerEvent};
use trocchat_proto::model::*;
use uuid::Uuid;

// --- Strategies for protocol types ---

fn arb_user_id() -> impl Strategy<Value = UserId> {
    any::<u128>().prop_map(|n| UserId::from_uuid(Uuid::from_u128(n)))
}

fn arb_conversation_id() -> impl Strategy<Value = ConversationId> {
    any::<u128>().prop_map(|n| ConversationId::from_uuid(Uuid::from_u128(n)))
}

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    any::<u128>().prop_map(|n| MessageId::from_uuid(Uuid::from_u128(n)))
}

fn arb_temp_id() -> impl Strategy<Value = TempId> {
    any::<u128>().prop_map(|n| TempId::from_uuid(Uuid::from_u128(n)))
}

fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    any::<u64>().prop_map(Timestamp::from_millis)
}

fn arb_message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Text),
        Just(MessageKind::Image),
        Just(MessageKind::File),
        Just(MessageKind::Audio),
        Just(MessageKind::Video),
    ]
}

/// Non-empty content within the validation limit.
fn arb_content() -> impl Strategy<Value = String> {
    "[^\x00]{1,256}"
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        (
            arb_message_id(),
            arb_conversation_id(),
            arb_user_id(),
            arb_user_id(),
            arb_content(),
        ),
        (
            arb_message_kind(),
            arb_timestamp(),
            any::<u64>(),
            any::<bool>(),
            any::<bool>(),
        ),
    )
        .prop_map(
            |(
                (id, conversation_id, sender_id, receiver_id, content),
                (kind, sent_at, seq, delivered, read),
            )| Message {
                id,
                conversation_id,
                sender_id,
                receiver_id,
                content,
                kind,
                sent_at,
                seq,
                delivered,
                read,
            },
        )
}

fn arb_send_error_kind() -> impl Strategy<Value = SendErrorKind> {
    prop_oneof![Just(SendErrorKind::Validation), Just(SendErrorKind::NotFound)]
}

fn arb_client_event() -> impl Strategy<Value = ClientEvent> {
    prop_oneof![
        (".*", arb_user_id())
            .prop_map(|(token, user_id)| ClientEvent::Authenticate { token, user_id }),
        (
            arb_user_id(),
            arb_content(),
            arb_message_kind(),
            arb_temp_id(),
            prop::option::of(arb_conversation_id()),
        )
            .prop_map(
                |(receiver_id, content, message_type, temp_id, conversation_id)| {
                    ClientEvent::SendMessage {
                        receiver_id,
                        content,
                        message_type,
                        temp_id,
                        conversation_id,
                    }
                }
            ),
        (arb_conversation_id(), arb_user_id()).prop_map(|(conversation_id, receiver_id)| {
            ClientEvent::TypingStart {
                conversation_id,
                receiver_id,
            }
        }),
        (arb_conversation_id(), arb_user_id()).prop_map(|(conversation_id, receiver_id)| {
            ClientEvent::TypingStop {
                conversation_id,
                receiver_id,
            }
        }),
        arb_conversation_id()
            .prop_map(|conversation_id| ClientEvent::MarkMessagesRead { conversation_id }),
    ]
}

fn arb_server_event() -> impl Strategy<Value = ServerEvent> {
    prop_oneof![
        arb_user_id().prop_map(|user_id| ServerEvent::Connected { user_id }),
        (arb_temp_id(), arb_message())
            .prop_map(|(temp_id, data)| ServerEvent::MessageSent { temp_id, data }),
        (arb_temp_id(), arb_send_error_kind(), ".*").prop_map(|(temp_id, kind, reason)| {
            ServerEvent::MessageError {
                temp_id,
                kind,
                reason,
            }
        }),
        arb_message().prop_map(|data| ServerEvent::NewMessage { data }),
        (arb_conversation_id(), arb_user_id(), ".*").prop_map(
            |(conversation_id, user_id, user_name)| ServerEvent::UserTyping {
                conversation_id,
                user_id,
                user_name,
            }
        ),
        (arb_conversation_id(), arb_user_id()).prop_map(|(conversation_id, user_id)| {
            ServerEvent::UserStoppedTyping {
                conversation_id,
                user_id,
            }
        }),
        (arb_conversation_id(), arb_user_id()).prop_map(|(conversation_id, reader_id)| {
            ServerEvent::MessagesRead {
                conversation_id,
                reader_id,
            }
        }),
        ".*".prop_map(|reason| ServerEvent::Error { reason }),
    ]
}

// --- Property tests ---

proptest! {
    /// Any valid client event survives an encode → decode round-trip.
    #[test]
    fn client_event_round_trip(event in arb_client_event()) {
        let text = codec::encode(&event).expect("encode should succeed");
        let decoded: ClientEvent = codec::decode(&text).expect("decode should succeed");
        prop_assert_eq!(event, decoded);
    }

    /// Any valid server event survives an encode → decode round-trip.
    #[test]
    fn server_event_round_trip(event in arb_server_event()) {
        let text = codec::encode(&event).expect("encode should succeed");
        let decoded: ServerEvent = codec::decode(&text).expect("decode should succeed");
        prop_assert_eq!(event, decoded);
    }

    /// Arbitrary text never panics the decoder.
    #[test]
    fn arbitrary_text_never_panics_decode(text in ".*") {
        let _ = codec::decode::<ClientEvent>(&text);
        let _ = codec::decode::<ServerEvent>(&text);
    }

    /// Every encoded frame is a JSON object with a `type` tag, as the
    /// wire contract requires.
    #[test]
    fn encoded_frames_carry_type_tag(event in arb_server_event()) {
        let text = codec::encode(&event).expect("encode should succeed");
        let value: serde_json::Value =
            serde_json::from_str(&text).expect("frame should be JSON");
        prop_assert!(value.get("type").is_some_and(serde_json::Value::is_string));
    }
}
