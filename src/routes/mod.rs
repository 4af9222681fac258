//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the websocket transport, the REST mirror of the
//! same operations, and a health probe.

pub mod riders;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/riders/{id}/location",
            post(riders::update_location).delete(riders::stop_sharing),
        )
        .route("/api/riders/{id}/nearby", get(riders::list_nearby))
        .route("/api/riders/{id}/nearby/{target_id}", get(riders::get_nearby))
        .route("/api/riders/{id}/visibility", patch(riders::update_visibility))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
