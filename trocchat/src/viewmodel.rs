//! Render-ready chat state.
//!
//! [`ChatViewModel`] is a synchronous reducer: the embedding app feeds it
//! server events from the adapter and snapshots from the REST routes, and
//! reads back conversation lists, threads, unread badges, and typing
//! banners. It owns no I/O and spawns nothing, so it can live on a UI
//! thread and be driven deterministically in tests.
//!
//! Merging is additive: a REST snapshot never discards locally-known
//! pending or failed entries, and a live event never discards snapshot
//! rows. Persisted messages are deduplicated by id, so receiving the same
//! message via relay and via a history fetch renders one bubble.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use trocchat_proto::event::ServerEvent;
use trocchat_proto::model::{
    Conversation, ConversationId, Message, MessageId, MessageKind, TempId, Timestamp, UserId,
};

/// Lifecycle of a message bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistically rendered; no ack yet.
    Pending,
    /// The gateway rejected the send (or it timed out).
    Failed,
    /// Persisted; the receiver had no live socket at send time.
    Sent,
    /// Persisted and accepted by a live receiver socket.
    Delivered,
    /// The receiver marked the conversation read.
    Read,
}

/// One message as rendered in a thread.
#[derive(Debug, Clone)]
pub struct MessageView {
    /// Client-local id; present for messages this client originated.
    pub temp_id: Option<TempId>,
    /// Persisted id; absent while the message is pending or failed.
    pub id: Option<MessageId>,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message content.
    pub content: String,
    /// Kind of content.
    pub kind: MessageKind,
    /// Server timestamp; absent until persisted.
    pub sent_at: Option<Timestamp>,
    /// Per-conversation sequence number; absent until persisted.
    pub seq: Option<u64>,
    /// Current lifecycle state.
    pub state: DeliveryState,
    /// Failure description when `state` is [`DeliveryState::Failed`].
    pub failure: Option<String>,
}

impl MessageView {
    fn from_persisted(message: &Message, temp_id: Option<TempId>) -> Self {
        let state = if message.read {
            DeliveryState::Read
        } else if message.delivered {
            DeliveryState::Delivered
        } else {
            DeliveryState::Sent
        };
        Self {
            temp_id,
            id: Some(message.id),
            sender_id: message.sender_id,
            content: message.content.clone(),
            kind: message.kind,
            sent_at: Some(message.sent_at),
            seq: Some(message.seq),
            state,
            failure: None,
        }
    }
}

/// A live typing indicator for one conversation.
#[derive(Debug, Clone)]
struct TypingState {
    user_name: String,
    since: Instant,
}

/// Synchronous reducer over conversation state.
pub struct ChatViewModel {
    me: UserId,
    typing_expiry: Duration,
    conversations: HashMap<ConversationId, Conversation>,
    threads: HashMap<ConversationId, Vec<MessageView>>,
    /// Pending sends not yet tied to a conversation (first contact).
    outbox: Vec<MessageView>,
    known_ids: HashSet<MessageId>,
    unread: HashMap<ConversationId, u64>,
    typing: HashMap<ConversationId, TypingState>,
    active: Option<ConversationId>,
    last_error: Option<String>,
}

impl ChatViewModel {
    /// Creates a view model for the given local user with the default
    /// typing expiry of five seconds.
    #[must_use]
    pub fn new(me: UserId) -> Self {
        Self::with_typing_expiry(me, Duration::from_secs(5))
    }

    /// Creates a view model with a custom typing-indicator expiry.
    #[must_use]
    pub fn with_typing_expiry(me: UserId, typing_expiry: Duration) -> Self {
        Self {
            me,
            typing_expiry,
            conversations: HashMap::new(),
            threads: HashMap::new(),
            outbox: Vec::new(),
            known_ids: HashSet::new(),
            unread: HashMap::new(),
            typing: HashMap::new(),
            active: None,
            last_error: None,
        }
    }

    /// The local user.
    #[must_use]
    pub const fn me(&self) -> UserId {
        self.me
    }

    /// Optimistically appends a message the user just composed.
    ///
    /// Rendered immediately in [`DeliveryState::Pending`]; the matching
    /// `message_sent` or `message_error` event resolves it via
    /// [`apply`](Self::apply).
    pub fn append_pending(
        &mut self,
        temp_id: TempId,
        content: &str,
        kind: MessageKind,
        conversation_id: Option<ConversationId>,
    ) {
        let view = MessageView {
            temp_id: Some(temp_id),
            id: None,
            sender_id: self.me,
            content: content.to_string(),
            kind,
            sent_at: None,
            seq: None,
            state: DeliveryState::Pending,
            failure: None,
        };
        match conversation_id {
            Some(id) => self.threads.entry(id).or_default().push(view),
            None => self.outbox.push(view),
        }
    }

    /// Marks a pending entry failed without a server event, e.g. on an
    /// ack timeout reported by the adapter.
    pub fn fail_pending(&mut self, temp_id: TempId, reason: &str) {
        if let Some(view) = self.find_pending_mut(temp_id) {
            view.state = DeliveryState::Failed;
            view.failure = Some(reason.to_string());
        }
    }

    /// Folds one server event into the state.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Connected { .. } => {}
            ServerEvent::MessageSent { temp_id, data } => self.confirm_pending(*temp_id, data),
            ServerEvent::MessageError {
                temp_id, reason, ..
            } => self.fail_pending(*temp_id, reason),
            ServerEvent::NewMessage { data } => self.ingest_incoming(data),
            ServerEvent::UserTyping {
                conversation_id,
                user_name,
                ..
            } => {
                self.typing.insert(
                    *conversation_id,
                    TypingState {
                        user_name: user_name.clone(),
                        since: Instant::now(),
                    },
                );
            }
            ServerEvent::UserStoppedTyping {
                conversation_id, ..
            } => {
                self.typing.remove(conversation_id);
            }
            ServerEvent::MessagesRead {
                conversation_id,
                reader_id,
            } => self.apply_read_receipt(*conversation_id, *reader_id),
            ServerEvent::Error { reason } => {
                self.last_error = Some(reason.clone());
            }
        }
    }

    /// Merges a conversation-list snapshot from the REST route.
    ///
    /// Snapshot rows replace cached rows (the server is authoritative for
    /// previews and unread counters); threads and local pending entries
    /// are untouched.
    pub fn merge_conversations(&mut self, snapshot: Vec<Conversation>) {
        for conversation in snapshot {
            self.unread
                .insert(conversation.id, conversation.unread_for(self.me));
            self.conversations.insert(conversation.id, conversation);
        }
        if let Some(active) = self.active {
            self.unread.insert(active, 0);
        }
    }

    /// Merges a page of message history from the REST route.
    ///
    /// Persisted messages are deduplicated by id and kept in sequence
    /// order; locally pending or failed entries stay at the tail of the
    /// thread.
    pub fn merge_history(&mut self, conversation_id: ConversationId, history: Vec<Message>) {
        let thread = self.threads.entry(conversation_id).or_default();
        for message in history {
            if self.known_ids.insert(message.id) {
                thread.push(MessageView::from_persisted(&message, None));
            }
        }
        sort_thread(thread);
    }

    /// Sets (or clears) the conversation currently on screen. Opening a
    /// conversation zeroes its local unread badge.
    pub fn set_active(&mut self, conversation_id: Option<ConversationId>) {
        self.active = conversation_id;
        if let Some(id) = conversation_id {
            self.unread.insert(id, 0);
        }
    }

    /// Cached conversation rows, most recent activity first.
    #[must_use]
    pub fn conversation_list(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().collect();
        list.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        list
    }

    /// The rendered thread for a conversation.
    #[must_use]
    pub fn thread(&self, conversation_id: ConversationId) -> &[MessageView] {
        self.threads
            .get(&conversation_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Pending sends not yet tied to a conversation.
    #[must_use]
    pub fn outbox(&self) -> &[MessageView] {
        &self.outbox
    }

    /// Unread badge for one conversation.
    #[must_use]
    pub fn unread_count(&self, conversation_id: ConversationId) -> u64 {
        self.unread.get(&conversation_id).copied().unwrap_or(0)
    }

    /// Total unread across all conversations.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.unread.values().sum()
    }

    /// Display name for the typing banner of a conversation, if the
    /// counterpart is typing and the indicator has not expired.
    #[must_use]
    pub fn typing_banner(&self, conversation_id: ConversationId) -> Option<&str> {
        self.typing.get(&conversation_id).and_then(|state| {
            (state.since.elapsed() < self.typing_expiry).then_some(state.user_name.as_str())
        })
    }

    /// The last protocol-level error reported by the gateway.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn find_pending_mut(&mut self, temp_id: TempId) -> Option<&mut MessageView> {
        let in_outbox = self
            .outbox
            .iter_mut()
            .find(|v| v.temp_id == Some(temp_id) && v.state == DeliveryState::Pending);
        if in_outbox.is_some() {
            return in_outbox;
        }
        self.threads.values_mut().find_map(|thread| {
            thread
                .iter_mut()
                .find(|v| v.temp_id == Some(temp_id) && v.state == DeliveryState::Pending)
        })
    }

    /// Replaces the optimistic entry matching `temp_id` with the
    /// persisted message, moving it into its conversation's thread.
    fn confirm_pending(&mut self, temp_id: TempId, data: &Message) {
        if !self.known_ids.insert(data.id) {
            return;
        }

        // Drop the optimistic entry wherever it lives. A confirm for an
        // entry we never rendered (another device's send) still lands in
        // the thread below.
        self.outbox.retain(|v| v.temp_id != Some(temp_id));
        if let Some(thread) = self.threads.get_mut(&data.conversation_id) {
            thread.retain(|v| v.temp_id != Some(temp_id));
        }

        let thread = self.threads.entry(data.conversation_id).or_default();
        thread.push(MessageView::from_persisted(data, Some(temp_id)));
        sort_thread(thread);
    }

    fn ingest_incoming(&mut self, data: &Message) {
        if !self.known_ids.insert(data.id) {
            return;
        }

        let thread = self.threads.entry(data.conversation_id).or_default();
        thread.push(MessageView::from_persisted(data, None));
        sort_thread(thread);

        // A delivered message supersedes the composing indicator.
        self.typing.remove(&data.conversation_id);

        if data.receiver_id == self.me && self.active != Some(data.conversation_id) {
            *self.unread.entry(data.conversation_id).or_default() += 1;
        }
    }

    fn apply_read_receipt(&mut self, conversation_id: ConversationId, reader_id: UserId) {
        if reader_id == self.me {
            // Another of this user's devices read the conversation.
            self.unread.insert(conversation_id, 0);
            return;
        }
        if let Some(thread) = self.threads.get_mut(&conversation_id) {
            for view in thread.iter_mut() {
                if view.sender_id == self.me
                    && matches!(view.state, DeliveryState::Sent | DeliveryState::Delivered)
                {
                    view.state = DeliveryState::Read;
                }
            }
        }
    }
}

/// Persisted entries in sequence order; pending and failed entries (no
/// seq yet) stay after them in insertion order.
fn sort_thread(thread: &mut [MessageView]) {
    thread.sort_by_key(|v| v.seq.unwrap_or(u64::MAX));
}
