//! Domain model types shared between the gateway and clients.
//!
//! All types in this module cross the wire as JSON and are also what the
//! gateway's conversation store persists. Identity types are UUID newtypes;
//! message and conversation ids use UUID v7 so that id order follows
//! creation time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Identifies a registered marketplace user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a fresh user identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `UserId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation between exactly two participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Creates a new time-ordered conversation identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ConversationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a persisted message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-local identifier for an optimistic send, reconciled by the ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a fresh temporary identifier for a pending send.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `TempId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the marketplace listing a conversation originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingId(Uuid);

impl ListingId {
    /// Creates a `ListingId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ListingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The kind of content a message carries.
///
/// Non-text kinds carry a reference (URL or media id) in the content field;
/// media upload itself is handled outside the messaging core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text content.
    Text,
    /// Reference to an uploaded image.
    Image,
    /// Reference to an uploaded file.
    File,
    /// Reference to an audio clip.
    Audio,
    /// Reference to a video clip.
    Video,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::File => write!(f, "file"),
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Error returned when message content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty or purely whitespace.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates message content for sending.
///
/// Whitespace-only content counts as empty: the marketplace UI trims
/// drafts before display, so a blank body would render as nothing.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] if the content is empty or
/// whitespace-only, or [`ValidationError::TooLarge`] if it exceeds
/// [`MAX_CONTENT_SIZE`].
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = content.len();
    if size > MAX_CONTENT_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_CONTENT_SIZE,
        });
    }
    Ok(())
}

/// A persisted chat message.
///
/// Content is immutable once persisted. The `read` flag only ever moves
/// `false -> true`; `delivered` records that at least one of the
/// receiver's live sockets accepted the relay frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent the message.
    pub sender_id: UserId,
    /// Who the message is addressed to.
    pub receiver_id: UserId,
    /// The message content (text, or a media reference for non-text kinds).
    pub content: String,
    /// What kind of content this is.
    pub kind: MessageKind,
    /// When the gateway accepted the message.
    pub sent_at: Timestamp,
    /// Per-conversation insertion sequence, breaks timestamp ties.
    pub seq: u64,
    /// Whether a live receiver socket accepted the relay frame.
    pub delivered: bool,
    /// Whether the receiver has marked this message read.
    pub read: bool,
}

/// Unordered pair of the two participants in a conversation.
///
/// Stored normalized (smaller UUID first) so that `(a, b)` and `(b, a)`
/// produce the same pair, which is what makes find-or-create race-free
/// under a single map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantPair {
    first: UserId,
    second: UserId,
}

/// Error returned when a participant pair cannot be formed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a conversation requires two distinct participants")]
pub struct SelfConversation;

impl ParticipantPair {
    /// Creates a normalized pair from two distinct user ids.
    ///
    /// # Errors
    ///
    /// Returns [`SelfConversation`] if both ids are the same user.
    pub fn new(a: UserId, b: UserId) -> Result<Self, SelfConversation> {
        if a == b {
            return Err(SelfConversation);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { first, second })
    }

    /// Returns the participant with the smaller UUID.
    #[must_use]
    pub const fn first(&self) -> UserId {
        self.first
    }

    /// Returns the participant with the larger UUID.
    #[must_use]
    pub const fn second(&self) -> UserId {
        self.second
    }

    /// Whether the given user is one of the two participants.
    #[must_use]
    pub fn contains(&self, user: UserId) -> bool {
        self.first == user || self.second == user
    }

    /// Returns the counterpart of the given participant, if a participant.
    #[must_use]
    pub fn other(&self, user: UserId) -> Option<UserId> {
        if user == self.first {
            Some(self.second)
        } else if user == self.second {
            Some(self.first)
        } else {
            None
        }
    }
}

/// Lifecycle status of a conversation.
///
/// Conversations are never hard-deleted; a completed exchange moves the
/// conversation to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Conversation is active.
    Open,
    /// The underlying exchange is finished; history stays readable.
    Closed,
}

/// Denormalized cache of the most recent message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Content of the most recent message.
    pub content: String,
    /// Who sent it.
    pub sender_id: UserId,
    /// When it was sent.
    pub sent_at: Timestamp,
}

/// A durable conversation record between two marketplace users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// The two participants; immutable after creation.
    pub participants: ParticipantPair,
    /// The listing this conversation originated from, if any.
    pub listing_id: Option<ListingId>,
    /// Cache of the most recent message, unset until the first message.
    pub last_message: Option<LastMessage>,
    /// Unread count for [`ParticipantPair::first`].
    pub unread_first: u64,
    /// Unread count for [`ParticipantPair::second`].
    pub unread_second: u64,
    /// Lifecycle status.
    pub status: ConversationStatus,
    /// When the conversation was created.
    pub created_at: Timestamp,
    /// When the conversation last changed (new message, read, status).
    pub updated_at: Timestamp,
}

impl Conversation {
    /// Creates a fresh conversation with zero unread counts and no
    /// last-message cache.
    #[must_use]
    pub fn new(participants: ParticipantPair, listing_id: Option<ListingId>) -> Self {
        let now = Timestamp::now();
        Self {
            id: ConversationId::new(),
            participants,
            listing_id,
            last_message: None,
            unread_first: 0,
            unread_second: 0,
            status: ConversationStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the unread count for the given participant (0 for outsiders).
    #[must_use]
    pub fn unread_for(&self, user: UserId) -> u64 {
        if user == self.participants.first() {
            self.unread_first
        } else if user == self.participants.second() {
            self.unread_second
        } else {
            0
        }
    }

    /// Returns a mutable reference to the unread counter of a participant.
    #[must_use]
    pub fn unread_for_mut(&mut self, user: UserId) -> Option<&mut u64> {
        if user == self.participants.first() {
            Some(&mut self.unread_first)
        } else if user == self.participants.second() {
            Some(&mut self.unread_second)
        } else {
            None
        }
    }

    /// The moment of last activity, for most-recent-first ordering.
    ///
    /// Conversations without messages sort by creation time.
    #[must_use]
    pub fn last_activity(&self) -> Timestamp {
        self.last_message
            .as_ref()
            .map_or(self.created_at, |m| m.sent_at)
    }
}
