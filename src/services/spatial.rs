//! Spatial index: radius queries over the location store.
//!
//! DESIGN
//! ======
//! Callers depend on the `SpatialIndex` trait only. The shipped
//! implementation scans a point-in-time snapshot of the store, which is
//! linear in active riders per query; a grid or R-tree can replace it
//! without touching the coordinator. Reads may lag concurrent writes by one
//! cycle.

use std::sync::Arc;

use uuid::Uuid;

use crate::services::geo::{self, Coordinates};
use crate::services::location::{LocationStore, RiderLocation};

/// Meters per degree of latitude, used for the cheap bounding-box prefilter.
const METERS_PER_DEGREE_LAT: f64 = geo::EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// A rider found by a radius query, with its distance from the center.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub location: RiderLocation,
    pub distance_m: f64,
}

pub trait SpatialIndex: Send + Sync {
    /// Riders within `radius_m` of `center`, nearest first, never including
    /// `exclude`.
    fn nearby(&self, center: Coordinates, radius_m: f64, exclude: Uuid) -> Vec<Neighbor>;
}

// =============================================================================
// FULL SCAN
// =============================================================================

/// Brute-force index reading straight from the store.
pub struct ScanIndex {
    store: Arc<LocationStore>,
}

impl ScanIndex {
    #[must_use]
    pub fn new(store: Arc<LocationStore>) -> Self {
        Self { store }
    }
}

impl SpatialIndex for ScanIndex {
    fn nearby(&self, center: Coordinates, radius_m: f64, exclude: Uuid) -> Vec<Neighbor> {
        // One extra meter absorbs the whole-meter rounding of `distance_m`.
        let lat_window = (radius_m + 1.0) / METERS_PER_DEGREE_LAT;

        let mut found: Vec<Neighbor> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|loc| loc.rider_id != exclude)
            // Latitude degrees have constant length, so this never drops a
            // rider that is actually in range.
            .filter(|loc| (loc.position.lat - center.lat).abs() <= lat_window)
            .filter_map(|location| {
                let distance_m = geo::distance_m(center, location.position);
                (distance_m <= radius_m).then_some(Neighbor { location, distance_m })
            })
            .collect();

        sort_by_distance(&mut found);
        found
    }
}

/// Nearest first; equal distances ordered by rider id so results are stable.
pub fn sort_by_distance(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.location.rider_id.cmp(&b.location.rider_id))
    });
}

#[cfg(test)]
#[path = "spatial_test.rs"]
mod tests;
