//! Gateway core: socket registry, WebSocket handshake and connection
//! lifecycle, and server startup.
//!
//! The gateway accepts WebSocket connections, authenticates them against
//! the marketplace bearer token, registers the socket under the user's
//! identity, and dispatches decoded client events to the
//! [`MessagingService`]. A user may hold any number of concurrent
//! sockets (one per device/tab); the registry is process-local and is
//! rebuilt from zero on restart — clients reconnect, nothing is assumed
//! to survive.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use trocchat_proto::codec;
use trocchat_proto::event::{ClientEvent, ServerEvent};
use trocchat_proto::model::UserId;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::directory::UserDirectory;
use crate::service::MessagingService;
use crate::store::ConversationStore;

/// Identifies one live socket within a user's connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(Uuid);

impl SocketId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live identity-to-socket registry.
///
/// Explicitly owned: constructed at server start and injected into the
/// service, never a module-level singleton, so a distributed registry can
/// replace it without touching the messaging logic.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    /// Per-user map of live sockets to their writer channels.
    connections: RwLock<HashMap<UserId, HashMap<SocketId, mpsc::UnboundedSender<Message>>>>,
}

impl SocketRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket for a user, returning its id.
    ///
    /// Unlike a single-connection relay, a second registration does not
    /// replace the first: multi-device users keep all their sockets.
    pub async fn register(
        &self,
        user_id: UserId,
        sender: mpsc::UnboundedSender<Message>,
    ) -> SocketId {
        let socket_id = SocketId::new();
        let mut conns = self.connections.write().await;
        conns.entry(user_id).or_default().insert(socket_id, sender);
        socket_id
    }

    /// Removes exactly one socket. Returns whether it was registered.
    ///
    /// When the user's last socket goes away they are offline for relay
    /// purposes; sends to them still persist.
    pub async fn unregister(&self, user_id: UserId, socket_id: SocketId) -> bool {
        let mut conns = self.connections.write().await;
        let Some(sockets) = conns.get_mut(&user_id) else {
            return false;
        };
        let removed = sockets.remove(&socket_id).is_some();
        if sockets.is_empty() {
            conns.remove(&user_id);
        }
        removed
    }

    /// Number of live sockets for a user.
    pub async fn live_socket_count(&self, user_id: UserId) -> usize {
        let conns = self.connections.read().await;
        conns.get(&user_id).map_or(0, HashMap::len)
    }

    /// Emits an event to every live socket of a user, returning how many
    /// sockets accepted the frame.
    ///
    /// A no-op (returns 0) when the user has no live sockets. One dead
    /// socket never affects delivery to the user's other sockets; dead
    /// sockets are pruned as they are discovered. The registry retries
    /// nothing — at-most-once per live socket, durability lives in the
    /// store.
    pub async fn relay_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        let text = match codec::encode(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode relay event");
                return 0;
            }
        };

        let mut conns = self.connections.write().await;
        let Some(sockets) = conns.get_mut(&user_id) else {
            return 0;
        };
        let before = sockets.len();
        sockets.retain(|socket_id, sender| {
            let ok = sender.send(Message::Text(text.clone().into())).is_ok();
            if !ok {
                tracing::warn!(user_id = %user_id, socket_id = %socket_id, "pruning dead socket");
            }
            ok
        });
        let accepted = sockets.len();
        if sockets.is_empty() {
            conns.remove(&user_id);
        }
        if accepted < before {
            tracing::debug!(user_id = %user_id, accepted, before, "partial relay");
        }
        accepted
    }

    /// Sends a WebSocket close frame to every live socket.
    ///
    /// Used for graceful shutdown and testing: each writer task forwards
    /// the close frame, which the client-side reader observes as a
    /// disconnect.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user_id, sockets) in conns.iter() {
            for sender in sockets.values() {
                tracing::info!(user_id = %user_id, "sending close frame");
                let _ = sender.send(Message::Close(None));
            }
        }
    }
}

/// Everything a connection handler needs, built once at server start.
pub struct GatewayState {
    /// The messaging service (owns store, registry, directory).
    pub service: MessagingService,
    /// Bearer-token verifier shared by socket handshakes and REST.
    pub verifier: TokenVerifier,
}

impl GatewayState {
    /// Builds the full gateway state from resolved configuration.
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        let store = Arc::new(ConversationStore::with_config(config));
        let registry = Arc::new(SocketRegistry::new());
        let directory = Arc::new(UserDirectory::new());
        Self {
            service: MessagingService::new(store, registry, directory),
            verifier: TokenVerifier::new(&config.jwt_secret),
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// Lifecycle:
/// 1. Wait for an `authenticate` frame and verify the token.
/// 2. Register the socket and send `connected` back.
/// 3. Spawn a writer task draining the socket's relay channel.
/// 4. Reader loop: decode client events and dispatch to the service.
/// 5. On disconnect (abrupt or graceful), unregister exactly this socket.
pub async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Step 1: authenticate or reject outright — never half-open.
    let (user_id, name_hint) = match wait_for_authenticate(&mut ws_receiver, &state).await {
        Ok(identity) => identity,
        Err(reason) => {
            tracing::warn!(reason = %reason, "rejecting unauthenticated connection");
            let _ = send_event(&mut ws_sender, &ServerEvent::Error { reason }).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Step 2: register and ack.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let registry = Arc::clone(state.service.registry());
    let socket_id = registry.register(user_id, tx.clone()).await;
    tracing::info!(user_id = %user_id, socket_id = %socket_id, "socket registered");

    if let Err(e) = send_event(&mut ws_sender, &ServerEvent::Connected { user_id }).await {
        tracing::error!(user_id = %user_id, error = %e, "failed to send connected ack");
        registry.unregister(user_id, socket_id).await;
        return;
    }

    // Step 3: writer task.
    let writer_user = user_id;
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user_id = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    // Step 4: reader loop.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    dispatch_client_event(
                        &reader_state,
                        user_id,
                        name_hint.as_deref(),
                        &tx,
                        text.as_str(),
                    )
                    .await;
                }
                Message::Close(_) => {
                    tracing::info!(user_id = %user_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Step 5: whichever half finishes first tears down the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    registry.unregister(user_id, socket_id).await;
    tracing::info!(user_id = %user_id, socket_id = %socket_id, "socket unregistered");
}

/// Waits for the first frame, which must be a valid `authenticate`.
///
/// Returns the verified user id and the token's display-name claim, or a
/// rejection reason.
async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &GatewayState,
) -> Result<(UserId, Option<String>), String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return match codec::decode::<ClientEvent>(text.as_str()) {
                    Ok(ClientEvent::Authenticate { token, user_id }) => {
                        match state.verifier.verify_claimed(&token, user_id) {
                            Ok(claims) => Ok((user_id, claims.name)),
                            Err(e) => Err(e.to_string()),
                        }
                    }
                    Ok(other) => {
                        tracing::warn!(event = ?other, "expected authenticate as first frame");
                        Err("authentication required".to_string())
                    }
                    Err(e) => Err(format!("malformed handshake frame: {e}")),
                };
            }
            Message::Close(_) => return Err("closed before authentication".to_string()),
            _ => {
                // Skip non-text frames (ping/pong) during the handshake.
            }
        }
    }
    Err("stream ended before authentication".to_string())
}

/// Decodes and dispatches one client frame.
///
/// Replies that belong only to the originating socket (`message_sent`,
/// `message_error`) go through `reply_tx`; everything else fans out via
/// the registry.
async fn dispatch_client_event(
    state: &GatewayState,
    user_id: UserId,
    name_hint: Option<&str>,
    reply_tx: &mpsc::UnboundedSender<Message>,
    text: &str,
) {
    let event = match codec::decode::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "failed to decode client frame");
            send_on_channel(
                reply_tx,
                &ServerEvent::Error {
                    reason: format!("malformed frame: {e}"),
                },
            );
            return;
        }
    };

    match event {
        ClientEvent::Authenticate { .. } => {
            tracing::warn!(user_id = %user_id, "duplicate authenticate ignored");
        }
        ClientEvent::SendMessage {
            receiver_id,
            content,
            message_type,
            temp_id,
            conversation_id,
        } => {
            let reply = state
                .service
                .handle_send(
                    user_id,
                    receiver_id,
                    &content,
                    message_type,
                    temp_id,
                    conversation_id,
                )
                .await;
            send_on_channel(reply_tx, &reply);
        }
        ClientEvent::TypingStart {
            conversation_id,
            receiver_id,
        } => {
            state
                .service
                .handle_typing_start(user_id, receiver_id, conversation_id, name_hint)
                .await;
        }
        ClientEvent::TypingStop {
            conversation_id,
            receiver_id,
        } => {
            state
                .service
                .handle_typing_stop(user_id, receiver_id, conversation_id)
                .await;
        }
        ClientEvent::MarkMessagesRead { conversation_id } => {
            // Read receipts fail silently: a stale conversation id is
            // logged, never surfaced.
            if let Err(e) = state.service.handle_mark_read(user_id, conversation_id).await {
                tracing::warn!(
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    error = %e,
                    "mark read failed"
                );
            }
        }
    }
}

/// Encodes an event onto a socket's writer channel. Errors are the writer
/// task's problem (a dead channel is pruned on the next relay).
fn send_on_channel(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    if let Ok(text) = codec::encode(event) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

/// Encodes and sends an event directly on a WebSocket sender.
async fn send_event(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), String> {
    let text = codec::encode(event).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the gateway (WebSocket + REST routes) on the given address,
/// returning the bound address and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    state: Arc<GatewayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .merge(crate::rest::router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "gateway server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<GatewayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
