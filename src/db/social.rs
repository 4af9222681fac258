//! Postgres-backed social graph.
//!
//! Friendships are stored one row per pair with `rider_a < rider_b`, so a
//! lookup normalizes the pair first. Only `accepted` rows count.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::services::social::{FriendshipOracle, RiderDirectory, RiderProfile, SocialError, Vehicle};

/// Friendship lookups against the `friendships` table.
#[derive(Clone)]
pub struct PgFriendshipOracle {
    pool: PgPool,
}

impl PgFriendshipOracle {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FriendshipOracle for PgFriendshipOracle {
    async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, SocialError> {
        if a == b {
            return Ok(false);
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM friendships
                 WHERE rider_a = $1 AND rider_b = $2 AND status = 'accepted'
             )",
        )
        .bind(low)
        .bind(high)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }
}

/// Profile lookups against `riders` joined with `vehicles`.
#[derive(Clone)]
pub struct PgRiderDirectory {
    pool: PgPool,
}

impl PgRiderDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RiderDirectory for PgRiderDirectory {
    async fn profile(&self, rider_id: Uuid) -> Result<Option<RiderProfile>, SocialError> {
        let row = sqlx::query(
            r"SELECT r.id, r.display_name, r.avatar_url, v.make, v.model, v.color
              FROM riders r
              LEFT JOIN vehicles v ON v.rider_id = r.id
              WHERE r.id = $1",
        )
        .bind(rider_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let make: Option<String> = row.try_get("make")?;
        let model: Option<String> = row.try_get("model")?;
        let vehicle = match (make, model) {
            (Some(make), Some(model)) => Some(Vehicle { make, model, color: row.try_get("color")? }),
            _ => None,
        };

        Ok(Some(RiderProfile {
            rider_id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            avatar_url: row.try_get("avatar_url")?,
            vehicle,
        }))
    }
}

#[cfg(test)]
#[path = "social_test.rs"]
mod tests;
