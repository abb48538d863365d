//! End-to-end send/receive tests through a real gateway.
//!
//! Verifies:
//! 1. A message from a live sender reaches a live receiver exactly once.
//! 2. The sender's ack carries the original `temp_id` and resolves the
//!    optimistic view-model entry.
//! 3. The receiver's unread badge increments for background conversations.
//! 4. Rapid sends arrive in order with contiguous sequence numbers.
//! 5. A rejected send fails only its own bubble.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use trocchat::adapter::{SendError, SocketAdapter};
use trocchat::viewmodel::{ChatViewModel, DeliveryState};
use trocchat_gateway::auth::issue_token;
use trocchat_gateway::config::GatewayConfig;
use trocchat_gateway::directory::UserProfile;
use trocchat_gateway::gateway::{GatewayState, start_server};
use trocchat_proto::event::{EventKind, SendErrorKind, ServerEvent};
use trocchat_proto::model::{MessageKind, TempId, UserId};

const SECRET: &str = "integration-secret";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_gateway() -> (String, Arc<GatewayState>) {
    let config = GatewayConfig {
        jwt_secret: SECRET.to_string(),
        ..GatewayConfig::default()
    };
    let state = Arc::new(GatewayState::new(&config));
    let (addr, _handle) = start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start gateway");
    (format!("ws://{addr}/ws"), state)
}

async fn seed_user(state: &GatewayState, name: &str) -> UserId {
    let id = UserId::new();
    state
        .service
        .directory()
        .upsert(UserProfile {
            id,
            display_name: name.into(),
        })
        .await;
    id
}

async fn connect(url: &str, user_id: UserId) -> SocketAdapter {
    let token = issue_token(SECRET, user_id, None, 60).unwrap();
    SocketAdapter::connect(url, &token, user_id)
        .await
        .expect("connect failed")
}

/// Subscribes a channel to every event of one kind.
async fn subscribe(
    adapter: &SocketAdapter,
    kind: EventKind,
) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    adapter
        .on(kind, move |event| {
            let _ = tx.send(event.clone());
        })
        .await;
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn message_reaches_live_receiver_exactly_once() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let alice_adapter = connect(&url, alice).await;
    let bob_adapter = connect(&url, bob).await;
    let mut bob_events = subscribe(&bob_adapter, EventKind::NewMessage).await;

    let sent = alice_adapter
        .send_message(TempId::new(), bob, "salut Bob", MessageKind::Text, None)
        .await
        .unwrap();

    let ServerEvent::NewMessage { data } = next_event(&mut bob_events).await else {
        panic!("expected NewMessage");
    };
    assert_eq!(data.id, sent.id);
    assert_eq!(data.content, "salut Bob");

    // No duplicate relay.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bob_events.try_recv().is_err());
}

#[tokio::test]
async fn ack_resolves_optimistic_entry() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let adapter = connect(&url, alice).await;
    let mut vm = ChatViewModel::new(alice);

    let temp_id = TempId::new();
    vm.append_pending(temp_id, "salut", MessageKind::Text, None);
    assert_eq!(vm.outbox().len(), 1);

    let message = adapter
        .send_message(temp_id, bob, "salut", MessageKind::Text, None)
        .await
        .unwrap();
    vm.apply(&ServerEvent::MessageSent {
        temp_id,
        data: message.clone(),
    });

    assert!(vm.outbox().is_empty());
    let thread = vm.thread(message.conversation_id);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].temp_id, Some(temp_id));
    assert_eq!(thread[0].state, DeliveryState::Sent);
}

#[tokio::test]
async fn receiver_viewmodel_tracks_unread_badge() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let alice_adapter = connect(&url, alice).await;
    let bob_adapter = connect(&url, bob).await;
    let mut bob_events = subscribe(&bob_adapter, EventKind::NewMessage).await;
    let mut bob_vm = ChatViewModel::new(bob);

    let mut conversation_id = None;
    for text in ["one", "two"] {
        alice_adapter
            .send_message(TempId::new(), bob, text, MessageKind::Text, None)
            .await
            .unwrap();
        let event = next_event(&mut bob_events).await;
        if let ServerEvent::NewMessage { data } = &event {
            conversation_id = Some(data.conversation_id);
        }
        bob_vm.apply(&event);
    }

    assert_eq!(bob_vm.total_unread(), 2);
    // Opening the conversation clears the badge.
    bob_vm.set_active(conversation_id);
    assert_eq!(bob_vm.total_unread(), 0);
}

#[tokio::test]
async fn rapid_sends_arrive_in_order() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let alice_adapter = connect(&url, alice).await;
    let bob_adapter = connect(&url, bob).await;
    let mut bob_events = subscribe(&bob_adapter, EventKind::NewMessage).await;

    for i in 0..10 {
        alice_adapter
            .send_message(
                TempId::new(),
                bob,
                &format!("msg {i}"),
                MessageKind::Text,
                None,
            )
            .await
            .unwrap();
    }

    for i in 0..10u64 {
        let ServerEvent::NewMessage { data } = next_event(&mut bob_events).await else {
            panic!("expected NewMessage");
        };
        assert_eq!(data.content, format!("msg {i}"));
        assert_eq!(data.seq, i + 1);
    }
}

#[tokio::test]
async fn rejection_fails_only_its_own_bubble() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let adapter = connect(&url, alice).await;
    let mut vm = ChatViewModel::new(alice);

    // A valid send establishes the conversation.
    let good_temp = TempId::new();
    vm.append_pending(good_temp, "fine", MessageKind::Text, None);
    let message = adapter
        .send_message(good_temp, bob, "fine", MessageKind::Text, None)
        .await
        .unwrap();
    vm.apply(&ServerEvent::MessageSent {
        temp_id: good_temp,
        data: message.clone(),
    });

    // An empty send is rejected and scoped to its own temp id.
    let bad_temp = TempId::new();
    vm.append_pending(bad_temp, "   ", MessageKind::Text, Some(message.conversation_id));
    let result = adapter
        .send_message(
            bad_temp,
            bob,
            "   ",
            MessageKind::Text,
            Some(message.conversation_id),
        )
        .await;
    let Err(SendError::Rejected { kind, reason }) = result else {
        panic!("expected Rejected, got {result:?}");
    };
    assert_eq!(kind, SendErrorKind::Validation);
    vm.apply(&ServerEvent::MessageError {
        temp_id: bad_temp,
        kind,
        reason,
    });

    let thread = vm.thread(message.conversation_id);
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].state, DeliveryState::Sent);
    assert_eq!(thread[1].state, DeliveryState::Failed);
}
