//! WebSocket handler: bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, registers a push channel for the rider and enters a
//! `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Presence pushes (`rider:*`, `location:updated`) → forward to client
//!
//! Handlers only call the presence coordinator and return an `Outcome`; the
//! dispatch layer turns it into the `done`/`error` reply. Pushes never go
//! through this path, they arrive on the channel.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register channel → send `session:connected`
//! 2. Client sends frames → dispatch → reply to sender
//! 3. Close → unregister; the last channel gone discards the snapshot

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status, to_data};
use crate::routes::riders::LocationBody;
use crate::services::location::VisibilityPatch;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// What the sender gets back. Handlers never send frames directly.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(rider_id) = params.get("rider_id").and_then(|s| s.parse::<Uuid>().ok()) else {
        return (StatusCode::BAD_REQUEST, "rider_id required").into_response();
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, rider_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, rider_id: Uuid) {
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config().channel_capacity);
    let connection_id = state.connect(rider_id, client_tx);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("rider_id", rider_id.to_string())
        .with_data("connection_id", connection_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_ok() {
        info!(%rider_id, %connection_id, "ws: rider connected");

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(msg) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            for frame in process_inbound_text(&state, rider_id, &text).await {
                                let _ = send_frame(&mut socket, &frame).await;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(frame) = client_rx.recv() => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    state.disconnect(rider_id, connection_id);
    info!(%rider_id, %connection_id, "ws: rider disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
async fn process_inbound_text(state: &AppState, rider_id: Uuid, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%rider_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // The connection's rider is the only identity a frame can carry.
    req.from = Some(rider_id.to_string());
    debug!(%rider_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "location" => handle_location(state, rider_id, &req).await,
        "visibility" => handle_visibility(state, rider_id, &req).await,
        "nearby" => handle_nearby(state, rider_id, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_location(state: &AppState, rider_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "update" => {
            let body: LocationBody = parse_data(req)?;
            let ack = state
                .presence
                .update_location(rider_id, body.position(), body.motion)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&ack)))
        }
        "stop" => {
            state.presence.stop_sharing(rider_id);
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown location op: {op}"))),
    }
}

async fn handle_visibility(state: &AppState, rider_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "update" => {
            let patch: VisibilityPatch = parse_data(req)?;
            let settings = state
                .presence
                .update_visibility(rider_id, patch)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&settings)))
        }
        op => Err(req.error(format!("unknown visibility op: {op}"))),
    }
}

async fn handle_nearby(state: &AppState, rider_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "list" => {
            let views = state
                .presence
                .get_nearby_riders(rider_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("riders".into(), serde_json::to_value(&views).unwrap_or_default());
            Ok(Outcome::Reply(data))
        }
        "get" => {
            let Some(target_id) = req
                .data
                .get("rider_id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Uuid>().ok())
            else {
                return Err(req.error("rider_id required"));
            };
            let view = state
                .presence
                .get_visible_rider(rider_id, target_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&view)))
        }
        op => Err(req.error(format!("unknown nearby op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Deserialize the frame's data map into a typed body.
fn parse_data<T: DeserializeOwned>(req: &Frame) -> Result<T, Frame> {
    let value = serde_json::Value::Object(req.data.clone().into_iter().collect());
    serde_json::from_value(value).map_err(|e| req.error(format!("invalid data: {e}")))
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
