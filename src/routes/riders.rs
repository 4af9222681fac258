//! REST mirror of the presence operations.
//!
//! Each handler maps to one coordinator call. Pushes triggered by a REST
//! call still reach the rider's websocket channels, if any.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::services::geo::Coordinates;
use crate::services::location::{LocationError, Motion, VisibilityPatch, VisibilitySettings};
use crate::services::presence::{LocationAck, PresenceError};
use crate::services::visibility::VisibleRiderView;
use crate::state::AppState;

/// Body of a location fix, shared with the websocket `location:update` frame.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationBody {
    pub lat: f64,
    pub lng: f64,
    #[serde(flatten)]
    pub motion: Motion,
}

impl LocationBody {
    #[must_use]
    pub fn position(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

/// `POST /api/riders/:id/location`: submit a fix.
pub async fn update_location(
    State(state): State<AppState>,
    Path(rider_id): Path<Uuid>,
    Json(body): Json<LocationBody>,
) -> Result<Json<LocationAck>, StatusCode> {
    let ack = state
        .presence
        .update_location(rider_id, body.position(), body.motion)
        .await
        .map_err(presence_error_to_status)?;
    Ok(Json(ack))
}

/// `DELETE /api/riders/:id/location`: stop sharing.
pub async fn stop_sharing(State(state): State<AppState>, Path(rider_id): Path<Uuid>) -> Json<serde_json::Value> {
    state.presence.stop_sharing(rider_id);
    Json(serde_json::json!({ "ok": true }))
}

/// `GET /api/riders/:id/nearby`: everything the rider can see.
pub async fn list_nearby(
    State(state): State<AppState>,
    Path(rider_id): Path<Uuid>,
) -> Result<Json<Vec<VisibleRiderView>>, StatusCode> {
    let views = state
        .presence
        .get_nearby_riders(rider_id)
        .await
        .map_err(presence_error_to_status)?;
    Ok(Json(views))
}

/// `GET /api/riders/:id/nearby/:target_id`: one rider as seen by `id`.
pub async fn get_nearby(
    State(state): State<AppState>,
    Path((rider_id, target_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<VisibleRiderView>, StatusCode> {
    let view = state
        .presence
        .get_visible_rider(rider_id, target_id)
        .await
        .map_err(presence_error_to_status)?;
    Ok(Json(view))
}

/// `PATCH /api/riders/:id/visibility`: merge visibility settings.
pub async fn update_visibility(
    State(state): State<AppState>,
    Path(rider_id): Path<Uuid>,
    Json(patch): Json<VisibilityPatch>,
) -> Result<Json<VisibilitySettings>, StatusCode> {
    let settings = state
        .presence
        .update_visibility(rider_id, patch)
        .await
        .map_err(presence_error_to_status)?;
    Ok(Json(settings))
}

pub(crate) fn presence_error_to_status(err: PresenceError) -> StatusCode {
    let status = match &err {
        PresenceError::Location(LocationError::InvalidCoordinates { .. } | LocationError::InvalidMotion(_)) => {
            StatusCode::BAD_REQUEST
        }
        PresenceError::Location(LocationError::NotFound(_)) | PresenceError::NotVisible => StatusCode::NOT_FOUND,
    };
    if status == StatusCode::BAD_REQUEST {
        warn!(code = err.error_code(), error = %err, "riders: rejected request");
    }
    status
}

#[cfg(test)]
#[path = "riders_test.rs"]
mod tests;
