//! Messaging service: the authoritative layer between socket events and
//! the conversation store.
//!
//! Every send is validated and persisted here before anything is relayed.
//! Relay failures never fail a send: durability is the store's job, and a
//! receiver with no live sockets simply picks the message up via the REST
//! fetch path on next login (store-and-forward).

use std::sync::Arc;

use trocchat_proto::event::{SendErrorKind, ServerEvent};
use trocchat_proto::model::{
    ConversationId, Message, MessageKind, TempId, UserId, ValidationError, validate_content,
};

use crate::directory::UserDirectory;
use crate::gateway::SocketRegistry;
use crate::store::{ConversationStore, StoreError};

/// Why a send was rejected before persistence.
#[derive(Debug, thiserror::Error)]
pub enum SendReject {
    /// Content failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The receiver is not a known marketplace user.
    #[error("unknown receiver {0}")]
    UnknownReceiver(UserId),

    /// Store-level rejection (unknown conversation, not a participant,
    /// self-conversation).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SendReject {
    /// Maps the rejection onto the wire-level error taxonomy.
    #[must_use]
    pub const fn kind(&self) -> SendErrorKind {
        match self {
            Self::Validation(_)
            | Self::Store(StoreError::Validation(_) | StoreError::SelfConversation(_)) => {
                SendErrorKind::Validation
            }
            Self::UnknownReceiver(_)
            | Self::Store(
                StoreError::ConversationNotFound(_) | StoreError::NotParticipant { .. },
            ) => SendErrorKind::NotFound,
        }
    }
}

/// Validates, persists, and relays messages.
///
/// Owns no state of its own; it orchestrates the injected store, socket
/// registry, and user directory.
pub struct MessagingService {
    store: Arc<ConversationStore>,
    registry: Arc<SocketRegistry>,
    directory: Arc<UserDirectory>,
}

impl MessagingService {
    /// Creates a service over the given collaborators.
    #[must_use]
    pub const fn new(
        store: Arc<ConversationStore>,
        registry: Arc<SocketRegistry>,
        directory: Arc<UserDirectory>,
    ) -> Self {
        Self {
            store,
            registry,
            directory,
        }
    }

    /// Returns the conversation store.
    #[must_use]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Returns the socket registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SocketRegistry> {
        &self.registry
    }

    /// Returns the user directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }

    /// Handles a `send_message` event.
    ///
    /// On success the message is persisted, relayed to every live
    /// receiver socket as `new_message`, and the returned `message_sent`
    /// ack (carrying `temp_id`) goes back to the originating socket only.
    /// On rejection the returned `message_error` is scoped to `temp_id`
    /// so the client can fail that one optimistic bubble.
    pub async fn handle_send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
        kind: MessageKind,
        temp_id: TempId,
        conversation_hint: Option<ConversationId>,
    ) -> ServerEvent {
        match self
            .try_send(sender_id, receiver_id, content, kind, conversation_hint)
            .await
        {
            Ok(message) => ServerEvent::MessageSent {
                temp_id,
                data: message,
            },
            Err(reject) => {
                tracing::warn!(
                    sender = %sender_id,
                    receiver = %receiver_id,
                    error = %reject,
                    "send rejected"
                );
                ServerEvent::MessageError {
                    temp_id,
                    kind: reject.kind(),
                    reason: reject.to_string(),
                }
            }
        }
    }

    /// The fallible body of [`handle_send`].
    async fn try_send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
        kind: MessageKind,
        conversation_hint: Option<ConversationId>,
    ) -> Result<Message, SendReject> {
        validate_content(content)?;
        if !self.directory.exists(receiver_id).await {
            return Err(SendReject::UnknownReceiver(receiver_id));
        }

        // A hinted conversation must exist and contain the sender;
        // otherwise resolve (or create) by participant pair.
        let conversation_id = match conversation_hint {
            Some(id) => {
                let conversation = self
                    .store
                    .get(id)
                    .await
                    .ok_or(StoreError::ConversationNotFound(id))?;
                if !conversation.participants.contains(sender_id) {
                    return Err(SendReject::Store(StoreError::NotParticipant {
                        user: sender_id,
                        conversation: id,
                    }));
                }
                id
            }
            None => {
                self.store
                    .find_or_create(sender_id, receiver_id, None)
                    .await?
                    .id
            }
        };

        let mut message = self
            .store
            .append_message(conversation_id, sender_id, receiver_id, content, kind)
            .await?;

        // Best-effort relay; zero live sockets is not an error.
        let accepted = self
            .registry
            .relay_to_user(
                receiver_id,
                &ServerEvent::NewMessage {
                    data: message.clone(),
                },
            )
            .await;
        if accepted > 0 {
            self.store.mark_delivered(conversation_id, message.id).await;
            message.delivered = true;
        }

        tracing::debug!(
            message_id = %message.id,
            conversation_id = %conversation_id,
            accepted_sockets = accepted,
            "message persisted"
        );
        Ok(message)
    }

    /// Relays a typing-start indicator to the receiver. Fire-and-forget:
    /// nothing is persisted and failures are swallowed.
    pub async fn handle_typing_start(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        conversation_id: ConversationId,
        sender_name_hint: Option<&str>,
    ) {
        let user_name = match self.directory.display_name(sender_id).await {
            Some(name) => name,
            None => sender_name_hint.map_or_else(|| sender_id.to_string(), ToString::to_string),
        };
        self.registry
            .relay_to_user(
                receiver_id,
                &ServerEvent::UserTyping {
                    conversation_id,
                    user_id: sender_id,
                    user_name,
                },
            )
            .await;
    }

    /// Relays a typing-stop indicator to the receiver. Fire-and-forget.
    ///
    /// The gateway never synthesizes a stop on disconnect; receiving
    /// clients expire stale indicators with their own timeout.
    pub async fn handle_typing_stop(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        conversation_id: ConversationId,
    ) {
        self.registry
            .relay_to_user(
                receiver_id,
                &ServerEvent::UserStoppedTyping {
                    conversation_id,
                    user_id: sender_id,
                },
            )
            .await;
    }

    /// Handles a `mark_messages_read` event: flips read flags in the
    /// store, then relays a `messages_read` receipt to the counterpart so
    /// their bubbles can move to "seen".
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the conversation is unknown or the
    /// reader is not a participant.
    pub async fn handle_mark_read(
        &self,
        reader_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<u64, StoreError> {
        let newly_read = self.store.mark_read(conversation_id, reader_id).await?;

        if let Some(conversation) = self.store.get(conversation_id).await
            && let Some(counterpart) = conversation.participants.other(reader_id)
        {
            self.registry
                .relay_to_user(
                    counterpart,
                    &ServerEvent::MessagesRead {
                        conversation_id,
                        reader_id,
                    },
                )
                .await;
        }
        Ok(newly_read)
    }
}
