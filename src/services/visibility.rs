//! Visibility filter: who may see whom, and what they get to see.
//!
//! DESIGN
//! ======
//! A candidate R is visible to observer O iff the O→R distance is within the
//! radius of their category (friend or stranger) and R's settings admit
//! that category. Emergency mode admits both categories but never changes
//! which category (and so which radius) applies.
//!
//! Strangers get a masked name and no avatar or vehicle. Friends get the
//! full profile.
//!
//! ERROR HANDLING
//! ==============
//! Collaborator failures degrade instead of failing the update: an oracle
//! error makes the pair strangers (the narrower, anonymized category) and a
//! directory error renders the rider without profile details.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::PresenceConfig;
use crate::services::geo::{self, CompassPoint};
use crate::services::location::{MovementStatus, RiderLocation};
use crate::services::social::{FriendshipOracle, RiderDirectory, RiderProfile, Vehicle};
use crate::services::spatial::Neighbor;

/// Name used when the real one cannot be masked or is unknown.
pub const ANONYMOUS_NAME: &str = "Anonymous rider";

/// Name shown to friends when the directory has no profile.
pub const UNKNOWN_NAME: &str = "Rider";

const NAME_MASK: &str = "***";

// =============================================================================
// VIEW
// =============================================================================

/// Observer-specific rendering of one visible rider. Never stored beyond a
/// diff cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleRiderView {
    pub rider_id: Uuid,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<Vehicle>,
    /// Raw distance in whole meters.
    pub distance_m: f64,
    /// Display form of `distance_m`.
    pub distance_label: String,
    pub compass_direction: CompassPoint,
    pub is_friend: bool,
    pub movement_status: MovementStatus,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub emergency_mode: bool,
}

// =============================================================================
// FILTER
// =============================================================================

pub struct VisibilityFilter {
    config: PresenceConfig,
    oracle: Arc<dyn FriendshipOracle>,
    directory: Arc<dyn RiderDirectory>,
}

impl VisibilityFilter {
    #[must_use]
    pub fn new(config: PresenceConfig, oracle: Arc<dyn FriendshipOracle>, directory: Arc<dyn RiderDirectory>) -> Self {
        Self { config, oracle, directory }
    }

    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Friendship lookup that treats failures as "not friends".
    pub async fn is_friend(&self, a: Uuid, b: Uuid) -> bool {
        match self.oracle.are_friends(a, b).await {
            Ok(friends) => friends,
            Err(e) => {
                warn!(%a, %b, error = %e, "visibility: friendship lookup failed, treating as strangers");
                false
            }
        }
    }

    /// The visibility rule with friendship already resolved.
    #[must_use]
    pub fn admits(&self, candidate: &RiderLocation, distance_m: f64, is_friend: bool) -> bool {
        if distance_m > self.config.radius_for(is_friend) {
            return false;
        }
        if is_friend {
            candidate.visibility.allows_friends()
        } else {
            candidate.visibility.allows_nearby()
        }
    }

    /// Evaluate `candidate` from `observer`'s side. `None` means not visible.
    pub async fn evaluate(&self, observer: &RiderLocation, candidate: &RiderLocation) -> Option<VisibleRiderView> {
        let distance_m = geo::distance_m(observer.position, candidate.position);
        self.evaluate_at(observer, candidate, distance_m).await
    }

    /// Same as `evaluate` when the distance is already known from the index.
    pub async fn evaluate_at(
        &self,
        observer: &RiderLocation,
        candidate: &RiderLocation,
        distance_m: f64,
    ) -> Option<VisibleRiderView> {
        if observer.rider_id == candidate.rider_id {
            return None;
        }
        // Nothing beyond the widest radius can be visible; skip the lookup.
        if distance_m > self.config.query_radius_m() {
            return None;
        }

        let is_friend = self.is_friend(observer.rider_id, candidate.rider_id).await;
        if !self.admits(candidate, distance_m, is_friend) {
            return None;
        }

        let profile = self.profile(candidate.rider_id).await;
        let bearing = geo::bearing_deg(observer.position, candidate.position);
        Some(build_view(candidate, profile, distance_m, CompassPoint::from_bearing(bearing), is_friend))
    }

    /// Everything `observer` can see among `neighbors`, keeping their order.
    pub async fn visible_set(&self, observer: &RiderLocation, neighbors: &[Neighbor]) -> Vec<VisibleRiderView> {
        let evaluations = neighbors
            .iter()
            .map(|n| self.evaluate_at(observer, &n.location, n.distance_m));
        join_all(evaluations).await.into_iter().flatten().collect()
    }

    async fn profile(&self, rider_id: Uuid) -> Option<RiderProfile> {
        match self.directory.profile(rider_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(%rider_id, error = %e, "visibility: profile lookup failed");
                None
            }
        }
    }
}

// =============================================================================
// RENDERING
// =============================================================================

fn build_view(
    candidate: &RiderLocation,
    profile: Option<RiderProfile>,
    distance_m: f64,
    compass_direction: CompassPoint,
    is_friend: bool,
) -> VisibleRiderView {
    let (display_name, avatar_url, vehicle) = match (is_friend, profile) {
        (true, Some(p)) => (p.display_name, p.avatar_url, p.vehicle),
        (true, None) => (UNKNOWN_NAME.to_string(), None, None),
        (false, Some(p)) => (anonymize(&p.display_name), None, None),
        (false, None) => (ANONYMOUS_NAME.to_string(), None, None),
    };

    VisibleRiderView {
        rider_id: candidate.rider_id,
        display_name,
        avatar_url,
        vehicle,
        distance_m,
        distance_label: geo::format_distance(distance_m),
        compass_direction,
        is_friend,
        movement_status: candidate.movement_status,
        heading: candidate.heading,
        speed: candidate.speed,
        emergency_mode: candidate.visibility.emergency_mode,
    }
}

/// Mask a name: each token becomes its first letter plus `***`
/// ("Rahul Sharma" → "R*** S***"). The result never equals the input.
#[must_use]
pub fn anonymize(name: &str) -> String {
    let masked = name
        .split_whitespace()
        .filter_map(|token| token.chars().next())
        .map(|initial| format!("{initial}{NAME_MASK}"))
        .collect::<Vec<_>>()
        .join(" ");

    // An empty name, or one that is already masked ("R***"), cannot be
    // masked further. The fallback cannot equal such a name.
    if masked.is_empty() || masked == name {
        return ANONYMOUS_NAME.to_string();
    }
    masked
}

#[cfg(test)]
#[path = "visibility_test.rs"]
mod tests;
