//! User directory lookup.
//!
//! The marketplace's identity service owns user accounts; the messaging
//! core only needs to answer "does this user exist" (for send validation)
//! and "what is their display name" (for typing banners). This module is
//! the seam for that collaborator, with an in-memory implementation the
//! gateway and tests use directly.

use std::collections::HashMap;

use tokio::sync::RwLock;

use trocchat_proto::model::UserId;

/// Minimal profile of a marketplace user, as seen by the messaging core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// The user's id.
    pub id: UserId,
    /// Display name shown in typing banners and conversation lists.
    pub display_name: String,
}

/// In-memory user directory.
///
/// Thread-safe via [`RwLock`]. In production deployments this is populated
/// from the identity service's user events; tests seed it directly.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl UserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user profile.
    pub async fn upsert(&self, profile: UserProfile) {
        let mut users = self.users.write().await;
        users.insert(profile.id, profile);
    }

    /// Removes a user, returning whether they existed.
    pub async fn remove(&self, id: UserId) -> bool {
        let mut users = self.users.write().await;
        users.remove(&id).is_some()
    }

    /// Whether the given user exists.
    pub async fn exists(&self, id: UserId) -> bool {
        let users = self.users.read().await;
        users.contains_key(&id)
    }

    /// Returns the display name for a user, if known.
    pub async fn display_name(&self, id: UserId) -> Option<String> {
        let users = self.users.read().await;
        users.get(&id).map(|p| p.display_name.clone())
    }
}
