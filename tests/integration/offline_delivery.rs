//! Store-and-forward: sends to offline receivers persist and are picked
//! up on the next history fetch.
//!
//! Verifies:
//! 1. A send succeeds while the receiver has no live socket.
//! 2. The persisted message is not flagged delivered.
//! 3. The receiver's history fetch returns it, and merging it into the
//!    view model seeds the unread badge from the conversation snapshot.
//! 4. A receiver who connects later gets new messages live while old
//!    ones stay fetchable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use trocchat::adapter::SocketAdapter;
use trocchat::viewmodel::ChatViewModel;
use trocchat_gateway::auth::issue_token;
use trocchat_gateway::config::GatewayConfig;
use trocchat_gateway::directory::UserProfile;
use trocchat_gateway::gateway::{GatewayState, start_server};
use trocchat_gateway::store::Page;
use trocchat_proto::event::{EventKind, ServerEvent};
use trocchat_proto::model::{MessageKind, TempId, UserId};

const SECRET: &str = "offline-secret";

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

#[tokio::test]
async fn offline_receiver_gets_message_via_history_fetch() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    // Bob is offline; the send still confirms.
    let alice_adapter = connect(&url, alice).await;
    let sent = alice_adapter
        .send_message(TempId::new(), bob, "see you at pickup", MessageKind::Text, None)
        .await
        .unwrap();
    assert!(!sent.delivered);

    // Bob logs in later: the reconciliation fetch (same queries the REST
    // routes run) returns the conversation and the message.
    let store = state.service.store();
    let conversations = store.list_conversations(bob).await;
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].unread_for(bob), 1);

    let history = store
        .list_messages(sent.conversation_id, bob, Page::new(0, 50, 200))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, sent.id);
    assert!(!history[0].delivered);

    let mut bob_vm = ChatViewModel::new(bob);
    bob_vm.merge_conversations(conversations);
    bob_vm.merge_history(sent.conversation_id, history);
    assert_eq!(bob_vm.unread_count(sent.conversation_id), 1);
    assert_eq!(bob_vm.thread(sent.conversation_id).len(), 1);
}

#[tokio::test]
async fn late_connection_switches_to_live_delivery() {
    let (url, state) = start_gateway().await;
    let alice = seed_user(&state, "Alice").await;
    let bob = seed_user(&state, "Bob").await;

    let alice_adapter = connect(&url, alice).await;
    let offline_sent = alice_adapter
        .send_message(TempId::new(), bob, "while you were out", MessageKind::Text, None)
        .await
        .unwrap();
    assert!(!offline_sent.delivered);

    // Bob connects; subsequent sends are delivered live.
    let bob_adapter = connect(&url, bob).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    bob_adapter
        .on(EventKind::NewMessage, move |event| {
            let _ = tx.send(event.clone());
        })
        .await;

    let live_sent = alice_adapter
        .send_message(TempId::new(), bob, "you're back", MessageKind::Text, None)
        .await
        .unwrap();
    assert!(live_sent.delivered);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("relay timed out")
        .unwrap();
    let ServerEvent::NewMessage { data } = event else {
        panic!("expected NewMessage");
    };
    assert_eq!(data.id, live_sent.id);

    // The offline message was not replayed over the socket, only the
    // live one arrived.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    // Both messages are in history, in order.
    let history = state
        .service
        .store()
        .list_messages(live_sent.conversation_id, bob, Page::new(0, 50, 200))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, offline_sent.id);
    assert_eq!(history[1].id, live_sent.id);
}
