//! Typing indicators and read receipts through a real gateway.
//!
//! Verifies:
//! 1. Typing start/stop is relayed live with the sender's display name
//!    and never persisted.
//! 2. Typing to an offline counterpart is silently dropped.
//! 3. Marking a conversation read relays `messages_read` to the
//!    counterpart and flips their view-model bubbles to "seen".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use trocchat::adapter::SocketAdapter;
use trocchat::viewmodel::{ChatViewModel, DeliveryState};
use trocchat_gateway::auth::issue_token;
use trocchat_gateway::config::GatewayConfig;
use trocchat_gateway::directory::UserProfile;
use trocchat_gateway::gateway::{GatewayState, start_server};
use trocchat_gateway::store::Page;
use trocchat_proto::event::{EventKind, ServerEvent};
use trocchat_proto::model::{MessageKind, TempId, UserId};

const SECRET: &str = "presence-secret";

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

#[tokio::test]
async fn typing_indicator_relays_with_display_name() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let alice_adapter = connect(&url, alice).await;
    let bob_adapter = connect(&url, bob).await;
    let mut typing = subscribe(&bob_adapter, EventKind::UserTyping).await;
    let mut stopped = subscribe(&bob_adapter, EventKind::UserStoppedTyping).await;

    // Establish the conversation first.
    let message = alice_adapter
        .send_message(TempId::new(), bob, "hey", MessageKind::Text, None)
        .await
        .unwrap();
    let conversation_id = message.conversation_id;

    let mut bob_vm = ChatViewModel::new(bob);

    alice_adapter.typing_start(conversation_id, bob).await.unwrap();
    let event = next_event(&mut typing).await;
    let ServerEvent::UserTyping {
        user_id, user_name, ..
    } = &event
    else {
        panic!("expected UserTyping");
    };
    assert_eq!(*user_id, alice);
    assert_eq!(user_name, "Alice");
    bob_vm.apply(&event);
    assert_eq!(bob_vm.typing_banner(conversation_id), Some("Alice"));

    alice_adapter.typing_stop(conversation_id, bob).await.unwrap();
    bob_vm.apply(&next_event(&mut stopped).await);
    assert_eq!(bob_vm.typing_banner(conversation_id), None);

    // Nothing about typing was persisted.
    let history = state
        .service
        .store()
        .list_messages(conversation_id, bob, Page::new(0, 50, 200))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn typing_to_offline_counterpart_is_dropped() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let alice_adapter = connect(&url, alice).await;
    let message = alice_adapter
        .send_message(TempId::new(), bob, "hey", MessageKind::Text, None)
        .await
        .unwrap();

    // Bob is offline; this must not error on the sender's side.
    alice_adapter
        .typing_start(message.conversation_id, bob)
        .await
        .unwrap();
    assert!(alice_adapter.is_connected());
}

#[tokio::test]
async fn read_receipt_reaches_counterpart_and_flips_bubbles() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let alice_adapter = connect(&url, alice).await;
    let bob_adapter = connect(&url, bob).await;
    let mut alice_receipts = subscribe(&alice_adapter, EventKind::MessagesRead).await;
    let mut bob_incoming = subscribe(&bob_adapter, EventKind::NewMessage).await;

    let mut alice_vm = ChatViewModel::new(alice);
    let temp_id = TempId::new();
    alice_vm.append_pending(temp_id, "please read", MessageKind::Text, None);
    let message = alice_adapter
        .send_message(temp_id, bob, "please read", MessageKind::Text, None)
        .await
        .unwrap();
    alice_vm.apply(&ServerEvent::MessageSent {
        temp_id,
        data: message.clone(),
    });

    // Bob receives and reads.
    let _ = next_event(&mut bob_incoming).await;
    bob_adapter
        .mark_messages_read(message.conversation_id)
        .await
        .unwrap();

    let receipt = next_event(&mut alice_receipts).await;
    let ServerEvent::MessagesRead {
        conversation_id,
        reader_id,
    } = &receipt
    else {
        panic!("expected MessagesRead");
    };
    assert_eq!(*conversation_id, message.conversation_id);
    assert_eq!(*reader_id, bob);

    alice_vm.apply(&receipt);
    let thread = alice_vm.thread(message.conversation_id);
    assert_eq!(thread[0].state, DeliveryState::Read);

    // The store agrees: bob has nothing unread left.
    let conversation = state
        .service
        .store()
        .get(message.conversation_id)
        .await
        .unwrap();
    assert_eq!(conversation.unread_for(bob), 0);
}
