//! Socket event contract between clients and the gateway.
//!
//! Every frame on the WebSocket is a JSON object with a `type` tag,
//! represented here as internally-tagged enums so that payloads are
//! validated at the boundary instead of passed around as open-ended
//! dictionaries.

use serde::{Deserialize, Serialize};

use crate::model::{ConversationId, Message, MessageKind, TempId, UserId};

/// Events sent from a client to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake: must be the first frame after the WebSocket opens.
    ///
    /// Carries a bearer token plus the claimed user id; the gateway
    /// verifies that the token authorizes that id before accepting the
    /// connection. On failure the connection is closed, never left
    /// half-open.
    Authenticate {
        /// Bearer token issued by the marketplace auth service.
        token: String,
        /// The user id the client claims to be.
        user_id: UserId,
    },

    /// Request to send a message to another user.
    SendMessage {
        /// Recipient of the message.
        receiver_id: UserId,
        /// Message content (text, or a media reference).
        content: String,
        /// Kind of content.
        message_type: MessageKind,
        /// Client-local id for reconciling the optimistic UI entry.
        temp_id: TempId,
        /// Known conversation, if the client already has one open.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },

    /// Sender started composing. Fire-and-forget, never persisted.
    TypingStart {
        /// Conversation being composed in.
        conversation_id: ConversationId,
        /// Counterpart to notify.
        receiver_id: UserId,
    },

    /// Sender stopped composing. Fire-and-forget, never persisted.
    ///
    /// The gateway does not synthesize this on disconnect; receiving
    /// clients apply their own expiry timeout.
    TypingStop {
        /// Conversation that was being composed in.
        conversation_id: ConversationId,
        /// Counterpart to notify.
        receiver_id: UserId,
    },

    /// Reader marks every message addressed to them in a conversation
    /// as read.
    MarkMessagesRead {
        /// Conversation to mark read.
        conversation_id: ConversationId,
    },
}

/// Why a send was rejected, surfaced in [`ServerEvent::MessageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    /// Content failed validation (empty, whitespace-only, too large).
    Validation,
    /// Receiver or conversation does not exist, or sender is not a
    /// participant.
    NotFound,
}

/// Events sent from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted; the socket is live and registered.
    Connected {
        /// The authenticated user id (echoed back for confirmation).
        user_id: UserId,
    },

    /// Ack for a send: the message was persisted.
    ///
    /// Sent only to the originating socket. `temp_id` lets the client
    /// replace its optimistic entry with the persisted message.
    MessageSent {
        /// The client-local id from the originating `send_message`.
        temp_id: TempId,
        /// The persisted message.
        data: Message,
    },

    /// A send was rejected; nothing was persisted.
    ///
    /// Always scoped to the failed send via `temp_id`, never a global
    /// error.
    MessageError {
        /// The client-local id from the originating `send_message`.
        temp_id: TempId,
        /// Machine-readable failure category.
        kind: SendErrorKind,
        /// Human-readable failure description.
        reason: String,
    },

    /// A new message addressed to this user was persisted.
    NewMessage {
        /// The persisted message.
        data: Message,
    },

    /// The counterpart started composing.
    UserTyping {
        /// Conversation being composed in.
        conversation_id: ConversationId,
        /// Who is typing.
        user_id: UserId,
        /// Display name for the typing banner.
        user_name: String,
    },

    /// The counterpart stopped composing.
    UserStoppedTyping {
        /// Conversation that was being composed in.
        conversation_id: ConversationId,
        /// Who stopped.
        user_id: UserId,
    },

    /// The counterpart read the conversation; delivered bubbles can flip
    /// to "seen".
    MessagesRead {
        /// Conversation that was read.
        conversation_id: ConversationId,
        /// Who read it.
        reader_id: UserId,
    },

    /// Protocol-level error not tied to a specific send (for example a
    /// malformed frame or a pre-auth failure notice before close).
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

/// Discriminant of [`ServerEvent`], used as the key of the client-side
/// subscription registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ServerEvent::Connected`]
    Connected,
    /// [`ServerEvent::MessageSent`]
    MessageSent,
    /// [`ServerEvent::MessageError`]
    MessageError,
    /// [`ServerEvent::NewMessage`]
    NewMessage,
    /// [`ServerEvent::UserTyping`]
    UserTyping,
    /// [`ServerEvent::UserStoppedTyping`]
    UserStoppedTyping,
    /// [`ServerEvent::MessagesRead`]
    MessagesRead,
    /// [`ServerEvent::Error`]
    Error,
}

impl ServerEvent {
    /// Returns the discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::MessageSent { .. } => EventKind::MessageSent,
            Self::MessageError { .. } => EventKind::MessageError,
            Self::NewMessage { .. } => EventKind::NewMessage,
            Self::UserTyping { .. } => EventKind::UserTyping,
            Self::UserStoppedTyping { .. } => EventKind::UserStoppedTyping,
            Self::MessagesRead { .. } => EventKind::MessagesRead,
            Self::Error { .. } => EventKind::Error,
        }
    }
}
