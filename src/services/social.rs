//! Social collaborators: friendship lookups and rider profiles.
//!
//! SYSTEM CONTEXT
//! ==============
//! The friend-request lifecycle and profile editing live in other services.
//! The presence pipeline only needs two read-only questions answered, so it
//! talks to them through these traits. `StaticSocialGraph` backs tests and
//! database-less runs; `db::social` provides the Postgres implementations.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("social graph unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for SocialError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "E_SOCIAL_UNAVAILABLE",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// A rider's vehicle, shown to friends only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiderProfile {
    pub rider_id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub vehicle: Option<Vehicle>,
}

// =============================================================================
// TRAITS
// =============================================================================

#[async_trait::async_trait]
pub trait FriendshipOracle: Send + Sync {
    /// True when an accepted friendship exists between the two riders.
    async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, SocialError>;
}

#[async_trait::async_trait]
pub trait RiderDirectory: Send + Sync {
    async fn profile(&self, rider_id: Uuid) -> Result<Option<RiderProfile>, SocialError>;
}

// =============================================================================
// IN-MEMORY GRAPH
// =============================================================================

/// Friendships and profiles held in memory.
#[derive(Debug, Default)]
pub struct StaticSocialGraph {
    friendships: RwLock<HashSet<(Uuid, Uuid)>>,
    profiles: RwLock<HashMap<Uuid, RiderProfile>>,
}

/// Friendship is unordered; store each pair once, smaller id first.
fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

impl StaticSocialGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn befriend(&self, a: Uuid, b: Uuid) {
        self.friendships
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(pair_key(a, b));
    }

    pub fn unfriend(&self, a: Uuid, b: Uuid) {
        self.friendships
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&pair_key(a, b));
    }

    pub fn put_profile(&self, profile: RiderProfile) {
        self.profiles
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(profile.rider_id, profile);
    }
}

#[async_trait::async_trait]
impl FriendshipOracle for StaticSocialGraph {
    async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, SocialError> {
        if a == b {
            return Ok(false);
        }
        let friendships = self
            .friendships
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(friendships.contains(&pair_key(a, b)))
    }
}

#[async_trait::async_trait]
impl RiderDirectory for StaticSocialGraph {
    async fn profile(&self, rider_id: Uuid) -> Result<Option<RiderProfile>, SocialError> {
        let profiles = self
            .profiles
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(profiles.get(&rider_id).cloned())
    }
}

#[cfg(test)]
#[path = "social_test.rs"]
mod tests;
