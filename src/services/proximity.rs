//! Proximity tracker: per-observer visible sets and enter/exit/update diffs.
//!
//! DESIGN
//! ======
//! Each observer owns a snapshot: the riders it currently sees and the last
//! view it was sent for each. Every (observer, rider) pair follows
//!
//! ```text
//! NOT_VISIBLE --enter--> VISIBLE --update--> VISIBLE --exit--> NOT_VISIBLE
//! ```
//!
//! `diff` re-judges a whole snapshot at once (the mover looking around);
//! `observe` re-judges one pair (a watcher looking at the mover). Both
//! follow the same transitions. Snapshots live in a sharded map so
//! observers never contend with each other.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use uuid::Uuid;

use crate::services::visibility::VisibleRiderView;

type Snapshot = HashMap<Uuid, VisibleRiderView>;

/// Result of re-judging an observer's whole visible set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProximityDiff {
    /// Newly visible riders, in the order they were supplied.
    pub entered: Vec<VisibleRiderView>,
    /// Riders no longer visible, sorted by id.
    pub exited: Vec<Uuid>,
    /// Still visible, with changed attributes.
    pub updated: Vec<VisibleRiderView>,
}

impl ProximityDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.exited.is_empty() && self.updated.is_empty()
    }
}

/// Result of re-judging a single (observer, rider) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Entered(VisibleRiderView),
    Updated(VisibleRiderView),
    Exited,
    /// Visible before and after, nothing changed.
    Unchanged,
    /// Not visible before or after.
    Hidden,
}

#[derive(Debug, Default)]
pub struct ProximityTracker {
    snapshots: DashMap<Uuid, Snapshot>,
}

impl ProximityTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `current` with the observer's snapshot, then replace the
    /// snapshot with `current`.
    pub fn diff(&self, observer_id: Uuid, current: Vec<VisibleRiderView>) -> ProximityDiff {
        let mut snapshot = self.snapshots.entry(observer_id).or_default();
        let mut previous = std::mem::take(snapshot.value_mut());

        let mut result = ProximityDiff::default();
        let mut next = Snapshot::with_capacity(current.len());

        for view in current {
            match previous.remove(&view.rider_id) {
                None => result.entered.push(view.clone()),
                Some(prev) if prev != view => result.updated.push(view.clone()),
                Some(_) => {}
            }
            next.insert(view.rider_id, view);
        }

        result.exited = previous.into_keys().collect();
        result.exited.sort_unstable();

        *snapshot.value_mut() = next;
        result
    }

    /// Re-judge one pair. `view` is `None` when the rider is not visible to
    /// the observer right now.
    pub fn observe(&self, observer_id: Uuid, rider_id: Uuid, view: Option<VisibleRiderView>) -> Transition {
        let Some(view) = view else {
            let removed = self
                .snapshots
                .get_mut(&observer_id)
                .and_then(|mut snapshot| snapshot.remove(&rider_id));
            return if removed.is_some() { Transition::Exited } else { Transition::Hidden };
        };

        let mut snapshot = self.snapshots.entry(observer_id).or_default();
        match snapshot.insert(rider_id, view.clone()) {
            None => Transition::Entered(view),
            Some(prev) if prev != view => Transition::Updated(view),
            Some(_) => Transition::Unchanged,
        }
    }

    /// Observers whose snapshot currently contains `rider_id`.
    #[must_use]
    pub fn watchers_of(&self, rider_id: Uuid) -> HashSet<Uuid> {
        self.snapshots
            .iter()
            .filter(|entry| entry.value().contains_key(&rider_id))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drop `rider_id` from every snapshot; returns the observers that were
    /// watching it (each of them owes an exit).
    pub fn forget_rider(&self, rider_id: Uuid) -> Vec<Uuid> {
        let mut watchers: Vec<Uuid> = self
            .snapshots
            .iter_mut()
            .filter_map(|mut entry| entry.value_mut().remove(&rider_id).map(|_| *entry.key()))
            .collect();
        watchers.sort_unstable();
        watchers
    }

    /// Discard an observer's snapshot entirely. Returns whether one existed.
    pub fn discard(&self, observer_id: Uuid) -> bool {
        self.snapshots.remove(&observer_id).is_some()
    }

    /// Discard an observer's snapshot and return the ids it held, sorted.
    /// Each of them owes the observer an exit.
    pub fn take(&self, observer_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .snapshots
            .remove(&observer_id)
            .map(|(_, snapshot)| snapshot.into_keys().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Ids currently judged visible to `observer_id`, sorted.
    #[must_use]
    pub fn visible_ids(&self, observer_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .snapshots
            .get(&observer_id)
            .map(|snapshot| snapshot.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Number of observers holding a snapshot.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.snapshots.len()
    }
}

#[cfg(test)]
#[path = "proximity_test.rs"]
mod tests;
