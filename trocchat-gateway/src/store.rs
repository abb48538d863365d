//! Durable conversation and message storage.
//!
//! The [`ConversationStore`] owns the two core invariants of the data
//! model: at most one conversation per participant pair, and total
//! per-conversation message order matching append order. All mutation
//! happens inside a single write-lock critical section, so "insert
//! message + update last-message cache + bump unread counter" is one
//! atomic unit and concurrent find-or-create calls from both
//! participants are serialized on the pair key.

use std::collections::HashMap;

use tokio::sync::RwLock;

use trocchat_proto::model::{
    Conversation, ConversationId, ConversationStatus, LastMessage, Message, MessageId,
    MessageKind, ParticipantPair, SelfConversation, Timestamp, UserId, ValidationError,
    validate_content,
};

use crate::config::GatewayConfig;

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Message content failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Both participants are the same user.
    #[error(transparent)]
    SelfConversation(#[from] SelfConversation),

    /// The conversation does not exist.
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    /// The caller is not a participant of the conversation.
    #[error("user {user} is not a participant of conversation {conversation}")]
    NotParticipant {
        /// The offending caller.
        user: UserId,
        /// The conversation they tried to touch.
        conversation: ConversationId,
    },
}

/// Pagination window for message history queries.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// Number of messages to skip from the start of the conversation.
    pub offset: usize,
    /// Maximum number of messages to return.
    pub limit: usize,
}

impl Page {
    /// Creates a page, clamping the limit to `max`.
    #[must_use]
    pub fn new(offset: usize, limit: usize, max: usize) -> Self {
        Self {
            offset,
            limit: limit.min(max),
        }
    }
}

/// Mutable store internals, guarded by one lock.
#[derive(Debug, Default)]
struct StoreInner {
    conversations: HashMap<ConversationId, Conversation>,
    by_pair: HashMap<ParticipantPair, ConversationId>,
    /// Messages per conversation, ascending by append order.
    messages: HashMap<ConversationId, Vec<Message>>,
}

/// In-memory conversation and message store.
///
/// Thread-safe via [`RwLock`]. The single lock is what makes the
/// append/cache/unread update atomic; a database-backed implementation
/// would replace the critical sections with transactions.
#[derive(Debug, Default)]
pub struct ConversationStore {
    inner: RwLock<StoreInner>,
    default_page_size: usize,
    max_page_size: usize,
}

impl ConversationStore {
    /// Creates an empty store with default pagination limits.
    #[must_use]
    pub fn new() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            inner: RwLock::new(StoreInner::default()),
            default_page_size: defaults.default_page_size,
            max_page_size: defaults.max_page_size,
        }
    }

    /// Creates an empty store with pagination limits from config.
    #[must_use]
    pub fn with_config(config: &GatewayConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    /// Returns the configured default page size.
    #[must_use]
    pub const fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    /// Returns the configured maximum page size.
    #[must_use]
    pub const fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    /// Looks up the conversation between two users, creating it if absent.
    ///
    /// The pair key is normalized, so `(a, b)` and `(b, a)` resolve to the
    /// same conversation, and the write lock serializes racing creations:
    /// the second caller finds the first caller's row.
    ///
    /// A `listing_id` is only applied on creation; an existing
    /// conversation keeps its original listing reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SelfConversation`] if both ids are the same
    /// user.
    pub async fn find_or_create(
        &self,
        a: UserId,
        b: UserId,
        listing_id: Option<trocchat_proto::model::ListingId>,
    ) -> Result<Conversation, StoreError> {
        let pair = ParticipantPair::new(a, b)?;
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.by_pair.get(&pair)
            && let Some(existing) = inner.conversations.get(id)
        {
            return Ok(existing.clone());
        }

        let conversation = Conversation::new(pair, listing_id);
        inner.by_pair.insert(pair, conversation.id);
        inner.messages.insert(conversation.id, Vec::new());
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        tracing::debug!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    /// Appends a message and updates the conversation's denormalized
    /// state in one atomic step.
    ///
    /// Inside a single write-lock critical section this: validates the
    /// content, assigns the next per-conversation sequence number, inserts
    /// the message, refreshes the last-message cache, bumps the receiver's
    /// unread counter, and touches `updated_at`. Either all of it happens
    /// or none of it does.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for empty/oversized content,
    /// [`StoreError::ConversationNotFound`] for an unknown conversation,
    /// or [`StoreError::NotParticipant`] if sender or receiver is not a
    /// participant.
    pub async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, StoreError> {
        validate_content(content)?;

        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;

        for user in [sender_id, receiver_id] {
            if !conversation.participants.contains(user) {
                return Err(StoreError::NotParticipant {
                    user,
                    conversation: conversation_id,
                });
            }
        }

        let sent_at = Timestamp::now();
        let seq = inner
            .messages
            .get(&conversation_id)
            .map_or(0, Vec::len) as u64
            + 1;

        let message = Message {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            receiver_id,
            content: content.to_string(),
            kind,
            sent_at,
            seq,
            delivered: false,
            read: false,
        };

        // Re-borrow: the participant check above released the
        // conversation borrow when computing seq.
        if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
            conversation.last_message = Some(LastMessage {
                content: message.content.clone(),
                sender_id,
                sent_at,
            });
            if let Some(unread) = conversation.unread_for_mut(receiver_id) {
                *unread += 1;
            }
            conversation.updated_at = sent_at;
        }
        inner
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    /// Records that a live receiver socket accepted the relay frame for a
    /// message. Returns whether the message was found.
    ///
    /// Best-effort bookkeeping: the flag never reverts and its absence
    /// only means the receiver will see the message via REST fetch.
    pub async fn mark_delivered(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let Some(messages) = inner.messages.get_mut(&conversation_id) else {
            return false;
        };
        for message in messages.iter_mut().rev() {
            if message.id == message_id {
                message.delivered = true;
                return true;
            }
        }
        false
    }

    /// Marks every unread message addressed to `reader_id` as read and
    /// resets the reader's unread counter.
    ///
    /// Idempotent: a second call finds nothing unread and changes
    /// nothing. Returns the number of messages newly marked read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] or
    /// [`StoreError::NotParticipant`].
    pub async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if !conversation.participants.contains(reader_id) {
            return Err(StoreError::NotParticipant {
                user: reader_id,
                conversation: conversation_id,
            });
        }

        if let Some(unread) = conversation.unread_for_mut(reader_id) {
            *unread = 0;
        }
        conversation.updated_at = Timestamp::now();

        let mut newly_read = 0;
        if let Some(messages) = inner.messages.get_mut(&conversation_id) {
            for message in messages.iter_mut() {
                if message.receiver_id == reader_id && !message.read {
                    message.read = true;
                    newly_read += 1;
                }
            }
        }
        Ok(newly_read)
    }

    /// Closes a conversation (e.g. the exchange completed). History stays
    /// readable; no rows are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] or
    /// [`StoreError::NotParticipant`].
    pub async fn close(
        &self,
        conversation_id: ConversationId,
        caller: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if !conversation.participants.contains(caller) {
            return Err(StoreError::NotParticipant {
                user: caller,
                conversation: conversation_id,
            });
        }
        conversation.status = ConversationStatus::Closed;
        conversation.updated_at = Timestamp::now();
        Ok(())
    }

    /// Returns a snapshot of the conversation, if it exists.
    pub async fn get(&self, conversation_id: ConversationId) -> Option<Conversation> {
        let inner = self.inner.read().await;
        inner.conversations.get(&conversation_id).cloned()
    }

    /// Lists the user's conversations, most recent activity first.
    ///
    /// The result is a snapshot; callers re-query for fresh data.
    pub async fn list_conversations(&self, user_id: UserId) -> Vec<Conversation> {
        let inner = self.inner.read().await;
        let mut conversations: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.participants.contains(user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        conversations
    }

    /// Lists a page of a conversation's messages, ascending by creation
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] for an unknown
    /// conversation, or [`StoreError::NotParticipant`] if the caller is
    /// not one of the two participants.
    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
        caller: UserId,
        page: Page,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let conversation = inner
            .conversations
            .get(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if !conversation.participants.contains(caller) {
            return Err(StoreError::NotParticipant {
                user: caller,
                conversation: conversation_id,
            });
        }

        let messages = inner
            .messages
            .get(&conversation_id)
            .map(|m| {
                m.iter()
                    .skip(page.offset)
                    .take(page.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(messages)
    }
}
