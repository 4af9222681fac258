//! Presence coordinator: the location-update pipeline.
//!
//! DESIGN
//! ======
//! On every fix the coordinator:
//! 1. upserts the store (invalid input aborts before anything else),
//! 2. queries the index at the widest radius,
//! 3. re-judges the mover from the side of every connected nearby rider and
//!    every rider already watching it, pushing enter/update/exit per pair,
//! 4. re-judges the mover's own surroundings and pushes the diff to the
//!    mover only,
//! 5. acknowledges with the mover's visible count.
//!
//! All collaborators are injected; nothing here is a process global.
//!
//! LIFECYCLE
//! =========
//! Stop-sharing and stale eviction remove the rider from the store, send an
//! exit to everyone who saw it, and send the rider an exit for everyone it
//! saw. Disconnect discards the observer's own
//! snapshot; its location stays until it goes stale.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PresenceConfig;
use crate::frame::{Data, Frame, to_data};
use crate::services::connection::ConnectionRegistry;
use crate::services::geo::{self, Coordinates};
use crate::services::location::{LocationError, LocationStore, Motion, RiderLocation, VisibilityPatch, VisibilitySettings};
use crate::services::proximity::{ProximityDiff, ProximityTracker, Transition};
use crate::services::social::{FriendshipOracle, RiderDirectory};
use crate::services::spatial::{Neighbor, SpatialIndex};
use crate::services::visibility::{VisibilityFilter, VisibleRiderView};

// =============================================================================
// EVENTS
// =============================================================================

/// Ack pushed to the mover after its fix was processed.
pub const EVENT_LOCATION_UPDATED: &str = "location:updated";
/// A rider became visible. Carries the full view.
pub const EVENT_RIDER_ENTER: &str = "rider:enter";
/// A visible rider changed. Carries the refreshed view.
pub const EVENT_RIDER_UPDATE: &str = "rider:update";
/// A rider is no longer visible. Carries `rider_id` only.
pub const EVENT_RIDER_EXIT: &str = "rider:exit";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error(transparent)]
    Location(#[from] LocationError),
    /// Deliberately identical for "does not exist" and "hidden from you".
    #[error("rider not visible")]
    NotVisible,
}

impl crate::frame::ErrorCode for PresenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Location(e) => e.error_code(),
            Self::NotVisible => "E_NOT_VISIBLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationAck {
    pub ok: bool,
    pub visible_count: usize,
}

// =============================================================================
// COORDINATOR
// =============================================================================

pub struct PresenceCoordinator {
    config: PresenceConfig,
    store: Arc<LocationStore>,
    index: Arc<dyn SpatialIndex>,
    filter: VisibilityFilter,
    tracker: ProximityTracker,
    registry: Arc<dyn ConnectionRegistry>,
}

impl PresenceCoordinator {
    #[must_use]
    pub fn new(
        config: PresenceConfig,
        store: Arc<LocationStore>,
        index: Arc<dyn SpatialIndex>,
        oracle: Arc<dyn FriendshipOracle>,
        directory: Arc<dyn RiderDirectory>,
        registry: Arc<dyn ConnectionRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            index,
            filter: VisibilityFilter::new(config, oracle, directory),
            tracker: ProximityTracker::new(),
            registry,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &LocationStore {
        &self.store
    }

    #[must_use]
    pub fn tracker(&self) -> &ProximityTracker {
        &self.tracker
    }

    /// Process one location fix end to end.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCoordinates` / `InvalidMotion` before any mutation.
    pub async fn update_location(
        &self,
        rider_id: Uuid,
        position: Coordinates,
        motion: Motion,
    ) -> Result<LocationAck, PresenceError> {
        let mover = self.store.upsert(rider_id, position, motion)?;
        let neighbors = self
            .index
            .nearby(mover.position, self.config.query_radius_m(), rider_id);

        self.notify_observers(&mover, &neighbors).await;

        let visible = self.filter.visible_set(&mover, &neighbors).await;
        let visible_count = visible.len();

        if self.registry.is_connected(rider_id) {
            let diff = self.tracker.diff(rider_id, visible);
            self.push_diff(rider_id, diff);
            // A disconnect racing this update must not leave a snapshot behind.
            if !self.registry.is_connected(rider_id) {
                self.tracker.discard(rider_id);
            }
        }

        let ack = LocationAck { ok: true, visible_count };
        self.push(rider_id, EVENT_LOCATION_UPDATED, to_data(&ack));
        debug!(%rider_id, candidates = neighbors.len(), visible_count, "presence: location updated");
        Ok(ack)
    }

    /// Everything `rider_id` can currently see, nearest first. Read-only.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rider is not sharing a location.
    pub async fn get_nearby_riders(&self, rider_id: Uuid) -> Result<Vec<VisibleRiderView>, PresenceError> {
        let me = self.store.get(rider_id)?;
        let neighbors = self
            .index
            .nearby(me.position, self.config.query_radius_m(), rider_id);
        Ok(self.filter.visible_set(&me, &neighbors).await)
    }

    /// Look up a single rider as seen by `observer_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the observer is not sharing a location, and
    /// `NotVisible` whether the target is missing or merely hidden.
    pub async fn get_visible_rider(&self, observer_id: Uuid, target_id: Uuid) -> Result<VisibleRiderView, PresenceError> {
        let me = self.store.get(observer_id)?;
        let Ok(target) = self.store.get(target_id) else {
            return Err(PresenceError::NotVisible);
        };
        self.filter
            .evaluate(&me, &target)
            .await
            .ok_or(PresenceError::NotVisible)
    }

    /// Merge visibility settings and re-judge the rider for everyone around.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rider is not sharing a location.
    pub async fn update_visibility(
        &self,
        rider_id: Uuid,
        patch: VisibilityPatch,
    ) -> Result<VisibilitySettings, PresenceError> {
        let updated = self.store.set_visibility(rider_id, patch)?;
        let neighbors = self
            .index
            .nearby(updated.position, self.config.query_radius_m(), rider_id);
        self.notify_observers(&updated, &neighbors).await;

        info!(
            %rider_id,
            friends = updated.visibility.visible_to_friends,
            nearby = updated.visibility.visible_to_nearby,
            emergency = updated.visibility.emergency_mode,
            "presence: visibility updated"
        );
        Ok(updated.visibility)
    }

    /// Stop sharing. Idempotent.
    pub fn stop_sharing(&self, rider_id: Uuid) {
        let was_sharing = self.store.remove(rider_id).is_some();
        self.retire(rider_id);
        if was_sharing {
            info!(%rider_id, "presence: stopped sharing");
        }
    }

    /// Forget an observer whose last connection closed.
    pub fn observer_disconnected(&self, rider_id: Uuid) {
        if self.tracker.discard(rider_id) {
            debug!(%rider_id, "presence: observer snapshot discarded");
        }
    }

    /// Evict locations older than the staleness window. Returns how many
    /// riders were evicted.
    pub fn evict_stale(&self) -> usize {
        let evicted = self.store.evict_stale(self.config.stale_after);
        for rider_id in &evicted {
            self.retire(*rider_id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "presence: evicted stale locations");
        }
        evicted.len()
    }

    // =========================================================================
    // PIPELINE STEPS
    // =========================================================================

    /// Re-judge `mover` from the side of each connected nearby rider and each
    /// existing watcher, pushing the pair transition to that observer.
    async fn notify_observers(&self, mover: &RiderLocation, neighbors: &[Neighbor]) {
        let mut observers: HashMap<Uuid, (RiderLocation, f64)> = neighbors
            .iter()
            .filter(|n| self.registry.is_connected(n.location.rider_id))
            .map(|n| (n.location.rider_id, (n.location.clone(), n.distance_m)))
            .collect();

        for watcher_id in self.tracker.watchers_of(mover.rider_id) {
            if observers.contains_key(&watcher_id) {
                continue;
            }
            if !self.registry.is_connected(watcher_id) {
                self.tracker.discard(watcher_id);
                continue;
            }
            match self.store.get(watcher_id) {
                Ok(watcher) => {
                    let distance_m = geo::distance_m(watcher.position, mover.position);
                    observers.insert(watcher_id, (watcher, distance_m));
                }
                // The watcher stopped sharing; it can no longer be judged as
                // an observer, so the pair closes.
                Err(_) => {
                    let transition = self.tracker.observe(watcher_id, mover.rider_id, None);
                    self.push_transition(watcher_id, mover.rider_id, transition);
                }
            }
        }

        let evaluations = observers.into_iter().map(|(observer_id, (observer, distance_m))| async move {
            let view = self.filter.evaluate_at(&observer, mover, distance_m).await;
            (observer_id, view)
        });

        for (observer_id, view) in join_all(evaluations).await {
            let transition = self.tracker.observe(observer_id, mover.rider_id, view);
            // The observer may have gone offline while its lookups were in
            // flight; `observe` would otherwise resurrect its snapshot.
            if !self.registry.is_connected(observer_id) {
                self.tracker.discard(observer_id);
                continue;
            }
            self.push_transition(observer_id, mover.rider_id, transition);
        }
    }

    /// Remove a rider from every snapshot, telling each watcher, and close
    /// the rider's own snapshot with an exit per rider it was shown.
    fn retire(&self, rider_id: Uuid) {
        for watcher_id in self.tracker.forget_rider(rider_id) {
            self.push(watcher_id, EVENT_RIDER_EXIT, exit_data(rider_id));
        }
        for seen_id in self.tracker.take(rider_id) {
            self.push(rider_id, EVENT_RIDER_EXIT, exit_data(seen_id));
        }
    }

    fn push_diff(&self, observer_id: Uuid, diff: ProximityDiff) {
        for view in &diff.entered {
            self.push(observer_id, EVENT_RIDER_ENTER, to_data(view));
        }
        for view in &diff.updated {
            self.push(observer_id, EVENT_RIDER_UPDATE, to_data(view));
        }
        for rider_id in diff.exited {
            self.push(observer_id, EVENT_RIDER_EXIT, exit_data(rider_id));
        }
    }

    fn push_transition(&self, observer_id: Uuid, rider_id: Uuid, transition: Transition) {
        match transition {
            Transition::Entered(view) => self.push(observer_id, EVENT_RIDER_ENTER, to_data(&view)),
            Transition::Updated(view) => self.push(observer_id, EVENT_RIDER_UPDATE, to_data(&view)),
            Transition::Exited => self.push(observer_id, EVENT_RIDER_EXIT, exit_data(rider_id)),
            Transition::Unchanged | Transition::Hidden => {}
        }
    }

    /// Fire-and-forget push. Undelivered frames are dropped.
    fn push(&self, rider_id: Uuid, syscall: &str, data: Data) {
        let frame = Frame::request(syscall, data);
        if !self.registry.send(rider_id, &frame) {
            debug!(%rider_id, %syscall, "presence: push not delivered");
        }
    }
}

fn exit_data(rider_id: Uuid) -> Data {
    let mut data = Data::new();
    data.insert("rider_id".into(), serde_json::json!(rider_id));
    data
}

// =============================================================================
// STALE SWEEP
// =============================================================================

/// Spawn the background eviction sweep. Returns a handle for shutdown.
pub fn spawn_eviction_task(presence: Arc<PresenceCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(presence.config().sweep_interval);
        loop {
            interval.tick().await;
            presence.evict_stale();
        }
    })
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
