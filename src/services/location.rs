//! Location store: authoritative live position per rider.
//!
//! DESIGN
//! ======
//! One record per rider in a sharded `DashMap`, so updates for unrelated
//! riders never contend on a shared lock. Every upsert overwrites the
//! previous fix (last write wins) but keeps the rider's visibility settings.
//! Records nobody refreshes are removed by the sweep task in
//! `services::presence`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::services::geo::Coordinates;

/// Speeds above this (km/h) count as moving.
pub const MOVING_SPEED_KMH: f64 = 5.0;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
    #[error("invalid motion: {0}")]
    InvalidMotion(&'static str),
    #[error("no location shared for rider {0}")]
    NotFound(Uuid),
}

impl crate::frame::ErrorCode for LocationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCoordinates { .. } => "E_INVALID_COORDINATES",
            Self::InvalidMotion(_) => "E_INVALID_MOTION",
            Self::NotFound(_) => "E_NOT_FOUND",
        }
    }
}

/// Coarse motion state derived from speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Idle,
    Stopped,
    Moving,
}

impl MovementStatus {
    #[must_use]
    pub fn from_speed(speed: Option<f64>) -> Self {
        match speed {
            Some(s) if s > MOVING_SPEED_KMH => Self::Moving,
            Some(s) if s > 0.0 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Who may see a rider. `emergency_mode` forces both audiences on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilitySettings {
    pub visible_to_friends: bool,
    pub visible_to_nearby: bool,
    pub emergency_mode: bool,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self { visible_to_friends: true, visible_to_nearby: true, emergency_mode: false }
    }
}

impl VisibilitySettings {
    /// Merge a partial update. With emergency mode on, both audience flags
    /// are stored as `true` regardless of what the patch asked for.
    pub fn apply(&mut self, patch: VisibilityPatch) {
        if let Some(v) = patch.visible_to_friends {
            self.visible_to_friends = v;
        }
        if let Some(v) = patch.visible_to_nearby {
            self.visible_to_nearby = v;
        }
        if let Some(v) = patch.emergency_mode {
            self.emergency_mode = v;
        }
        if self.emergency_mode {
            self.visible_to_friends = true;
            self.visible_to_nearby = true;
        }
    }

    #[must_use]
    pub fn allows_friends(&self) -> bool {
        self.emergency_mode || self.visible_to_friends
    }

    #[must_use]
    pub fn allows_nearby(&self) -> bool {
        self.emergency_mode || self.visible_to_nearby
    }
}

/// Partial visibility update; absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityPatch {
    #[serde(default)]
    pub visible_to_friends: Option<bool>,
    #[serde(default)]
    pub visible_to_nearby: Option<bool>,
    #[serde(default)]
    pub emergency_mode: Option<bool>,
}

/// Optional motion attributes reported with a fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Motion {
    /// Degrees clockwise from north.
    #[serde(default)]
    pub heading: Option<f64>,
    /// km/h.
    #[serde(default)]
    pub speed: Option<f64>,
    /// Meters.
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl Motion {
    /// Check ranges and normalize a heading of 360 to 0.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMotion` for out-of-range or non-finite values.
    pub fn validated(self) -> Result<Self, LocationError> {
        let heading = match self.heading {
            Some(h) if !h.is_finite() || !(0.0..=360.0).contains(&h) => {
                return Err(LocationError::InvalidMotion("heading must be within 0-360"));
            }
            Some(h) => Some(h % 360.0),
            None => None,
        };
        if self.speed.is_some_and(|s| !s.is_finite() || s < 0.0) {
            return Err(LocationError::InvalidMotion("speed must be non-negative"));
        }
        if self.accuracy.is_some_and(|a| !a.is_finite() || a < 0.0) {
            return Err(LocationError::InvalidMotion("accuracy must be non-negative"));
        }
        Ok(Self { heading, ..self })
    }
}

/// Live location record. At most one per rider.
#[derive(Debug, Clone, PartialEq)]
pub struct RiderLocation {
    pub rider_id: Uuid,
    pub position: Coordinates,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub movement_status: MovementStatus,
    pub visibility: VisibilitySettings,
    pub updated_at: OffsetDateTime,
}

impl RiderLocation {
    fn apply_fix(&mut self, position: Coordinates, motion: Motion, now: OffsetDateTime) {
        self.position = position;
        self.heading = motion.heading;
        self.speed = motion.speed;
        self.accuracy = motion.accuracy;
        self.movement_status = MovementStatus::from_speed(motion.speed);
        self.updated_at = now;
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Sharded map of live rider locations.
#[derive(Debug, Default)]
pub struct LocationStore {
    riders: DashMap<Uuid, RiderLocation>,
}

impl LocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self { riders: DashMap::new() }
    }

    /// Record a new fix for a rider and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCoordinates` or `InvalidMotion` without touching the
    /// store.
    pub fn upsert(&self, rider_id: Uuid, position: Coordinates, motion: Motion) -> Result<RiderLocation, LocationError> {
        self.upsert_at(rider_id, position, motion, OffsetDateTime::now_utc())
    }

    pub(crate) fn upsert_at(
        &self,
        rider_id: Uuid,
        position: Coordinates,
        motion: Motion,
        now: OffsetDateTime,
    ) -> Result<RiderLocation, LocationError> {
        if !position.is_valid() {
            return Err(LocationError::InvalidCoordinates { lat: position.lat, lng: position.lng });
        }
        let motion = motion.validated()?;

        let record = match self.riders.entry(rider_id) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.apply_fix(position, motion, now);
                record.clone()
            }
            Entry::Vacant(entry) => {
                let mut record = RiderLocation {
                    rider_id,
                    position,
                    heading: None,
                    speed: None,
                    accuracy: None,
                    movement_status: MovementStatus::Idle,
                    visibility: VisibilitySettings::default(),
                    updated_at: now,
                };
                record.apply_fix(position, motion, now);
                entry.insert(record.clone());
                record
            }
        };
        Ok(record)
    }

    /// Current record for a rider.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rider is not sharing a location.
    pub fn get(&self, rider_id: Uuid) -> Result<RiderLocation, LocationError> {
        self.riders
            .get(&rider_id)
            .map(|r| r.value().clone())
            .ok_or(LocationError::NotFound(rider_id))
    }

    /// Remove a rider. Removing an absent rider is a no-op.
    pub fn remove(&self, rider_id: Uuid) -> Option<RiderLocation> {
        self.riders.remove(&rider_id).map(|(_, record)| record)
    }

    /// Merge visibility settings into a stored record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rider is not sharing a location.
    pub fn set_visibility(&self, rider_id: Uuid, patch: VisibilityPatch) -> Result<RiderLocation, LocationError> {
        let mut record = self
            .riders
            .get_mut(&rider_id)
            .ok_or(LocationError::NotFound(rider_id))?;
        record.visibility.apply(patch);
        Ok(record.value().clone())
    }

    /// Remove every record whose last update is older than `max_age`.
    /// Returns the evicted rider ids.
    pub fn evict_stale(&self, max_age: std::time::Duration) -> Vec<Uuid> {
        self.evict_stale_at(max_age, OffsetDateTime::now_utc())
    }

    pub(crate) fn evict_stale_at(&self, max_age: std::time::Duration, now: OffsetDateTime) -> Vec<Uuid> {
        let Some(cutoff) = time::Duration::try_from(max_age)
            .ok()
            .and_then(|age| now.checked_sub(age))
        else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        self.riders.retain(|rider_id, record| {
            let keep = record.updated_at >= cutoff;
            if !keep {
                evicted.push(*rider_id);
            }
            keep
        });
        evicted
    }

    /// Point-in-time copy of every record. Used by full-scan queries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RiderLocation> {
        self.riders.iter().map(|r| r.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.riders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.riders.is_empty()
    }
}

#[cfg(test)]
#[path = "location_test.rs"]
mod tests;
