//! WebSocket adapter for the Troc messaging gateway.
//!
//! [`SocketAdapter`] owns one authenticated connection: it performs the
//! `authenticate` handshake, spawns a background reader task, and keeps a
//! pending-ack map so each `send_message` call resolves to exactly one of
//! confirmed, rejected, or timed out. Other server events are fanned out
//! to subscribed handlers keyed by [`EventKind`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use trocchat_proto::codec;
use trocchat_proto::event::{ClientEvent, EventKind, SendErrorKind, ServerEvent};
use trocchat_proto::model::{ConversationId, Message, MessageKind, TempId, UserId};

/// Write half of the WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing the TCP + WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the `connected` acknowledgment after `authenticate`.
const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a send's `message_sent` / `message_error` ack.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from connection-level operations.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Connecting or the handshake ack timed out.
    #[error("gateway connection timed out")]
    Timeout,

    /// The connection is closed (or closed mid-operation).
    #[error("gateway connection closed")]
    ConnectionClosed,

    /// The gateway rejected the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] codec::CodecError),

    /// Underlying WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Terminal outcome of a send that did not confirm.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The gateway rejected the send; nothing was persisted.
    #[error("send rejected: {reason}")]
    Rejected {
        /// Machine-readable failure category.
        kind: SendErrorKind,
        /// Human-readable failure description.
        reason: String,
    },

    /// No ack arrived within the send timeout. The message may still
    /// have been persisted; the caller reconciles via history fetch.
    #[error("no ack received within the send timeout")]
    AckTimeout,

    /// The connection dropped before the ack arrived.
    #[error("connection closed before the ack arrived")]
    ConnectionClosed,
}

/// Handle for removing a subscribed event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type Handler = Box<dyn Fn(&ServerEvent) + Send + Sync>;
type HandlerMap = HashMap<EventKind, Vec<(HandlerId, Handler)>>;
type PendingMap = HashMap<TempId, oneshot::Sender<Result<Message, SendError>>>;

/// One authenticated connection to the messaging gateway.
///
/// Created via [`SocketAdapter::connect`]. Cheap to share behind an
/// `Arc`; all methods take `&self`.
pub struct SocketAdapter {
    user_id: UserId,
    ws_sender: Arc<Mutex<WsSender>>,
    pending: Arc<Mutex<PendingMap>>,
    handlers: Arc<Mutex<HandlerMap>>,
    connected: Arc<AtomicBool>,
    next_handler_id: AtomicU64,
    send_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl SocketAdapter {
    /// Connects to the gateway and completes the authenticate handshake.
    ///
    /// Steps:
    /// 1. Open the WebSocket connection (10s timeout).
    /// 2. Send `authenticate` with the bearer token and claimed id.
    /// 3. Wait for `connected` (5s timeout); any other reply is a
    ///    rejection.
    /// 4. Spawn the background reader task.
    ///
    /// # Errors
    ///
    /// [`AdapterError::Timeout`] when connecting or waiting for the ack
    /// times out, [`AdapterError::HandshakeRejected`] when the gateway
    /// refuses the token, [`AdapterError::ConnectionClosed`] when the
    /// server closes mid-handshake.
    pub async fn connect(
        url: &str,
        token: &str,
        user_id: UserId,
    ) -> Result<Self, AdapterError> {
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "gateway connect timed out");
                AdapterError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "gateway connect failed");
                AdapterError::WebSocket(e.to_string())
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let auth = ClientEvent::Authenticate {
            token: token.to_string(),
            user_id,
        };
        let text = codec::encode(&auth)?;
        ws_sender
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| AdapterError::WebSocket(format!("failed to send authenticate: {e}")))?;

        Self::await_connected(&mut ws_reader, user_id).await?;
        tracing::info!(user_id = %user_id, url, "authenticated with gateway");

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let handlers: Arc<Mutex<HandlerMap>> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            Arc::clone(&handlers),
            Arc::clone(&connected),
        ));

        Ok(Self {
            user_id,
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            pending,
            handlers,
            connected,
            next_handler_id: AtomicU64::new(0),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            reader_handle,
        })
    }

    /// Waits for the post-authenticate `connected` ack.
    async fn await_connected(
        ws_reader: &mut WsReader,
        claimed: UserId,
    ) -> Result<(), AdapterError> {
        let deadline = tokio::time::Instant::now() + AUTH_TIMEOUT;
        loop {
            let frame = tokio::time::timeout_at(deadline, ws_reader.next())
                .await
                .map_err(|_| AdapterError::Timeout)?;
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    return match codec::decode::<ServerEvent>(text.as_str())? {
                        ServerEvent::Connected { user_id } if user_id == claimed => Ok(()),
                        ServerEvent::Connected { user_id } => Err(
                            AdapterError::HandshakeRejected(format!(
                                "gateway acknowledged a different user: {user_id}"
                            )),
                        ),
                        ServerEvent::Error { reason } => {
                            Err(AdapterError::HandshakeRejected(reason))
                        }
                        other => Err(AdapterError::HandshakeRejected(format!(
                            "unexpected handshake reply: {other:?}"
                        ))),
                    };
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(AdapterError::ConnectionClosed);
                }
                Some(Ok(_)) => {
                    // Skip ping/pong frames during the handshake.
                }
                Some(Err(e)) => return Err(AdapterError::WebSocket(e.to_string())),
            }
        }
    }

    /// The authenticated user id.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Whether the connection is still live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Overrides the per-send ack timeout.
    pub const fn set_send_timeout(&mut self, timeout: Duration) {
        self.send_timeout = timeout;
    }

    /// Sends a message and waits for its ack.
    ///
    /// `temp_id` is supplied by the caller so the optimistic UI entry and
    /// the wire frame share an id. The call resolves to exactly one
    /// outcome: the persisted message, [`SendError::Rejected`] with the
    /// gateway's error, [`SendError::AckTimeout`], or
    /// [`SendError::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// See [`SendError`].
    pub async fn send_message(
        &self,
        temp_id: TempId,
        receiver_id: UserId,
        content: &str,
        kind: MessageKind,
        conversation_id: Option<ConversationId>,
    ) -> Result<Message, SendError> {
        if !self.is_connected() {
            return Err(SendError::ConnectionClosed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(temp_id, ack_tx);
        }

        let event = ClientEvent::SendMessage {
            receiver_id,
            content: content.to_string(),
            message_type: kind,
            temp_id,
            conversation_id,
        };
        if let Err(e) = self.send_event(&event).await {
            tracing::warn!(err = %e, "send frame failed");
            self.pending.lock().await.remove(&temp_id);
            return Err(SendError::ConnectionClosed);
        }

        match tokio::time::timeout(self.send_timeout, ack_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Sender dropped without resolving: the reader task died.
                Err(SendError::ConnectionClosed)
            }
            Err(_) => {
                // Timed out: withdraw the pending entry so a late ack
                // cannot resolve a send the caller already gave up on.
                self.pending.lock().await.remove(&temp_id);
                tracing::info!(temp_id = %temp_id, "no ack within timeout");
                Err(SendError::AckTimeout)
            }
        }
    }

    /// Announces that the user started composing. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::ConnectionClosed`] if the frame cannot be
    /// written.
    pub async fn typing_start(
        &self,
        conversation_id: ConversationId,
        receiver_id: UserId,
    ) -> Result<(), AdapterError> {
        self.send_event(&ClientEvent::TypingStart {
            conversation_id,
            receiver_id,
        })
        .await
    }

    /// Announces that the user stopped composing. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::ConnectionClosed`] if the frame cannot be
    /// written.
    pub async fn typing_stop(
        &self,
        conversation_id: ConversationId,
        receiver_id: UserId,
    ) -> Result<(), AdapterError> {
        self.send_event(&ClientEvent::TypingStop {
            conversation_id,
            receiver_id,
        })
        .await
    }

    /// Marks every message addressed to this user in a conversation as
    /// read.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::ConnectionClosed`] if the frame cannot be
    /// written.
    pub async fn mark_messages_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), AdapterError> {
        self.send_event(&ClientEvent::MarkMessagesRead { conversation_id })
            .await
    }

    /// Subscribes a handler for one event kind, returning a removal
    /// handle. Multiple handlers per kind are invoked in registration
    /// order.
    pub async fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.lock().await;
        handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Removes one handler, or every handler for the kind when `id` is
    /// `None`.
    pub async fn off(&self, kind: EventKind, id: Option<HandlerId>) {
        let mut handlers = self.handlers.lock().await;
        match id {
            Some(id) => {
                if let Some(list) = handlers.get_mut(&kind) {
                    list.retain(|(hid, _)| *hid != id);
                }
            }
            None => {
                handlers.remove(&kind);
            }
        }
    }

    /// Tears down the connection: stops the reader, fails every pending
    /// send with [`SendError::ConnectionClosed`], and drops all handlers.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.reader_handle.abort();

        let mut pending = self.pending.lock().await;
        for (_, ack_tx) in pending.drain() {
            let _ = ack_tx.send(Err(SendError::ConnectionClosed));
        }
        self.handlers.lock().await.clear();

        let mut sender = self.ws_sender.lock().await;
        let _ = sender.send(WsMessage::Close(None)).await;
    }

    async fn send_event(&self, event: &ClientEvent) -> Result<(), AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::ConnectionClosed);
        }
        let text = codec::encode(event)?;
        let mut sender = self.ws_sender.lock().await;
        sender
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "gateway write failed");
                self.connected.store(false, Ordering::Relaxed);
                AdapterError::ConnectionClosed
            })
    }
}

/// Background task: decodes server frames, resolves pending sends, and
/// fans everything out to subscribed handlers.
///
/// Malformed frames are logged and skipped; the task only exits when the
/// connection closes, at which point every pending send fails with
/// [`SendError::ConnectionClosed`].
async fn reader_loop(
    mut ws_reader: WsReader,
    pending: Arc<Mutex<PendingMap>>,
    handlers: Arc<Mutex<HandlerMap>>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = ws_reader.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match codec::decode::<ServerEvent>(text.as_str()) {
                Ok(event) => {
                    resolve_pending(&pending, &event).await;
                    dispatch(&handlers, &event).await;
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("gateway closed the connection");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/binary frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "gateway read error");
                break;
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    let mut pending = pending.lock().await;
    for (_, ack_tx) in pending.drain() {
        let _ = ack_tx.send(Err(SendError::ConnectionClosed));
    }
    tracing::info!("gateway reader task exiting");
}

/// Resolves the pending send an ack belongs to, if any. A `temp_id` with
/// no pending entry (the caller already timed out) is dropped silently.
async fn resolve_pending(pending: &Mutex<PendingMap>, event: &ServerEvent) {
    let outcome = match event {
        ServerEvent::MessageSent { temp_id, data } => {
            Some((*temp_id, Ok(data.clone())))
        }
        ServerEvent::MessageError {
            temp_id,
            kind,
            reason,
        } => Some((
            *temp_id,
            Err(SendError::Rejected {
                kind: *kind,
                reason: reason.clone(),
            }),
        )),
        _ => None,
    };

    if let Some((temp_id, outcome)) = outcome {
        let ack_tx = pending.lock().await.remove(&temp_id);
        match ack_tx {
            Some(ack_tx) => {
                let _ = ack_tx.send(outcome);
            }
            None => {
                tracing::debug!(temp_id = %temp_id, "ack for an abandoned send");
            }
        }
    }
}

/// Invokes every handler subscribed to the event's kind.
async fn dispatch(handlers: &Mutex<HandlerMap>, event: &ServerEvent) {
    let handlers = handlers.lock().await;
    if let Some(list) = handlers.get(&event.kind()) {
        for (_, handler) in list {
            handler(event);
        }
    }
}
