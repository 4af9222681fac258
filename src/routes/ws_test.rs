use super::*;
use crate::services::presence::{EVENT_LOCATION_UPDATED, EVENT_RIDER_ENTER, EVENT_RIDER_EXIT};
use crate::state::test_helpers;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn request_text(syscall: &str, data: serde_json::Value) -> String {
    let data = match data {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Data::new(),
    };
    serde_json::to_string(&Frame::request(syscall, data)).expect("frame should serialize")
}

async fn recv_push(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("push receive timed out")
        .expect("push channel closed unexpectedly")
}

async fn assert_no_push(rx: &mut mpsc::Receiver<Frame>) {
    assert!(timeout(Duration::from_millis(80), rx.recv()).await.is_err(), "expected no push frame");
}

// =============================================================================
// DISPATCH
// =============================================================================

#[tokio::test]
async fn location_update_replies_done_with_ack() {
    let (state, _graph) = test_helpers::test_app_state();
    let rider = Uuid::new_v4();
    let text = request_text("location:update", json!({"lat": 28.7041, "lng": 77.1025, "speed": 12.0}));

    let frames = process_inbound_text(&state, rider, &text).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].syscall, "location:update");
    assert!(frames[0].parent_id.is_some());
    assert_eq!(frames[0].data.get("ok"), Some(&json!(true)));
    assert_eq!(frames[0].data.get("visible_count"), Some(&json!(0)));
}

#[tokio::test]
async fn invalid_coordinates_reply_structured_error() {
    let (state, _graph) = test_helpers::test_app_state();
    let text = request_text("location:update", json!({"lat": -91.0, "lng": 10.0}));

    let frames = process_inbound_text(&state, Uuid::new_v4(), &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].data.get("code"), Some(&json!("E_INVALID_COORDINATES")));
    assert_eq!(frames[0].data.get("retryable"), Some(&json!(false)));
}

#[tokio::test]
async fn missing_fields_are_rejected_before_the_pipeline() {
    let (state, _graph) = test_helpers::test_app_state();
    let rider = Uuid::new_v4();
    let text = request_text("location:update", json!({"lat": 28.7}));

    let frames = process_inbound_text(&state, rider, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert!(state.presence.store().get(rider).is_err());
}

#[tokio::test]
async fn invalid_json_yields_gateway_error() {
    let (state, _graph) = test_helpers::test_app_state();
    let frames = process_inbound_text(&state, Uuid::new_v4(), "{not json").await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].syscall, "gateway:error");
}

#[tokio::test]
async fn unknown_prefix_and_op_are_errors() {
    let (state, _graph) = test_helpers::test_app_state();
    let rider = Uuid::new_v4();

    let frames = process_inbound_text(&state, rider, &request_text("chat:send", json!({}))).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].data.get("message"), Some(&json!("unknown prefix: chat")));

    let frames = process_inbound_text(&state, rider, &request_text("nearby:watch", json!({}))).await;
    assert_eq!(frames[0].data.get("message"), Some(&json!("unknown nearby op: watch")));
}

#[tokio::test]
async fn nearby_requests_map_presence_errors() {
    let (state, _graph) = test_helpers::test_app_state();
    let me = Uuid::new_v4();

    let frames = process_inbound_text(&state, me, &request_text("nearby:list", json!({}))).await;
    assert_eq!(frames[0].data.get("code"), Some(&json!("E_NOT_FOUND")));

    process_inbound_text(&state, me, &request_text("location:update", json!({"lat": 28.7041, "lng": 77.1025}))).await;

    let frames = process_inbound_text(&state, me, &request_text("nearby:list", json!({}))).await;
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].data.get("riders"), Some(&json!([])));

    let target = Uuid::new_v4().to_string();
    let frames = process_inbound_text(&state, me, &request_text("nearby:get", json!({"rider_id": target}))).await;
    assert_eq!(frames[0].data.get("code"), Some(&json!("E_NOT_VISIBLE")));

    let frames = process_inbound_text(&state, me, &request_text("nearby:get", json!({}))).await;
    assert_eq!(frames[0].data.get("message"), Some(&json!("rider_id required")));
}

#[tokio::test]
async fn visibility_update_replies_merged_settings() {
    let (state, _graph) = test_helpers::test_app_state();
    let me = Uuid::new_v4();
    process_inbound_text(&state, me, &request_text("location:update", json!({"lat": 28.7041, "lng": 77.1025}))).await;

    let text = request_text("visibility:update", json!({"visible_to_nearby": false}));
    let frames = process_inbound_text(&state, me, &text).await;
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].data.get("visible_to_nearby"), Some(&json!(false)));
    assert_eq!(frames[0].data.get("visible_to_friends"), Some(&json!(true)));
    assert_eq!(frames[0].data.get("emergency_mode"), Some(&json!(false)));
}

#[tokio::test]
async fn location_stop_is_done_and_idempotent() {
    let (state, _graph) = test_helpers::test_app_state();
    let me = Uuid::new_v4();
    process_inbound_text(&state, me, &request_text("location:update", json!({"lat": 28.7041, "lng": 77.1025}))).await;

    for _ in 0..2 {
        let frames = process_inbound_text(&state, me, &request_text("location:stop", json!({}))).await;
        assert_eq!(frames[0].status, Status::Done);
    }
    assert!(state.presence.store().is_empty());
}

// =============================================================================
// PUSHES
// =============================================================================

#[tokio::test]
async fn pushes_reach_the_registered_channel() {
    let (state, _graph) = test_helpers::test_app_state();
    let observer = Uuid::new_v4();
    let rider = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Frame>(16);
    state.connect(observer, tx);

    process_inbound_text(&state, observer, &request_text("location:update", json!({"lat": 28.7041, "lng": 77.1025}))).await;
    assert_eq!(recv_push(&mut rx).await.syscall, EVENT_LOCATION_UPDATED);

    process_inbound_text(&state, rider, &request_text("location:update", json!({"lat": 28.71, "lng": 77.11}))).await;
    let enter = recv_push(&mut rx).await;
    assert_eq!(enter.syscall, EVENT_RIDER_ENTER);
    assert_eq!(enter.status, Status::Request);
    assert_eq!(enter.data.get("rider_id"), Some(&json!(rider)));

    process_inbound_text(&state, rider, &request_text("location:stop", json!({}))).await;
    let exit = recv_push(&mut rx).await;
    assert_eq!(exit.syscall, EVENT_RIDER_EXIT);
    assert_no_push(&mut rx).await;
}

#[tokio::test]
async fn last_disconnect_discards_the_snapshot() {
    let (state, _graph) = test_helpers::test_app_state();
    let observer = Uuid::new_v4();
    let (tx_phone, _rx_phone) = mpsc::channel::<Frame>(16);
    let (tx_watch, _rx_watch) = mpsc::channel::<Frame>(16);
    let phone = state.connect(observer, tx_phone);
    let watch = state.connect(observer, tx_watch);

    process_inbound_text(&state, Uuid::new_v4(), &request_text("location:update", json!({"lat": 28.71, "lng": 77.11}))).await;
    process_inbound_text(&state, observer, &request_text("location:update", json!({"lat": 28.7041, "lng": 77.1025}))).await;
    assert_eq!(state.presence.tracker().observer_count(), 1);

    state.disconnect(observer, phone);
    assert_eq!(state.presence.tracker().observer_count(), 1);

    state.disconnect(observer, watch);
    assert_eq!(state.presence.tracker().observer_count(), 0);
    // Location survives the disconnect until it goes stale.
    assert!(state.presence.store().get(observer).is_ok());
}

// =============================================================================
// END TO END
// =============================================================================

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server(state: AppState) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, crate::routes::app(state)).await;
    });
    addr
}

async fn connect_client(addr: std::net::SocketAddr, rider_id: Uuid) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/ws?rider_id={rider_id}"))
        .await
        .expect("ws connect should succeed");
    client
}

/// Read frames until one with `syscall` arrives.
async fn next_with_syscall(client: &mut Client, syscall: &str) -> Frame {
    timeout(Duration::from_secs(2), async {
        loop {
            let msg = client
                .next()
                .await
                .expect("stream ended")
                .expect("ws read should succeed");
            if let WsMessage::Text(text) = msg {
                let frame: Frame = serde_json::from_str(text.as_str()).expect("server frames are valid");
                if frame.syscall == syscall {
                    return frame;
                }
            }
        }
    })
    .await
    .expect("frame receive timed out")
}

async fn send_request(client: &mut Client, syscall: &str, data: serde_json::Value) {
    client
        .send(WsMessage::Text(request_text(syscall, data).into()))
        .await
        .expect("ws send should succeed");
}

#[tokio::test]
async fn websocket_riders_see_each_other() {
    let (state, graph) = test_helpers::test_app_state();
    let addr = spawn_server(state).await;
    let observer = Uuid::new_v4();
    let friend = Uuid::new_v4();
    graph.befriend(observer, friend);

    let mut obs = connect_client(addr, observer).await;
    let mut fr = connect_client(addr, friend).await;
    next_with_syscall(&mut obs, "session:connected").await;
    next_with_syscall(&mut fr, "session:connected").await;

    send_request(&mut obs, "location:update", json!({"lat": 28.7041, "lng": 77.1025})).await;
    let reply = next_with_syscall(&mut obs, "location:update").await;
    assert_eq!(reply.status, Status::Done);

    // 10 km north: outside the stranger radius, inside the friend radius.
    send_request(&mut fr, "location:update", json!({"lat": 28.7941, "lng": 77.1025, "speed": 40.0})).await;
    let enter = next_with_syscall(&mut obs, EVENT_RIDER_ENTER).await;
    assert_eq!(enter.data.get("rider_id"), Some(&json!(friend)));
    assert_eq!(enter.data.get("is_friend"), Some(&json!(true)));
    assert_eq!(enter.data.get("compass_direction"), Some(&json!("N")));
    assert_eq!(enter.data.get("movement_status"), Some(&json!("moving")));

    let mover_view = next_with_syscall(&mut fr, EVENT_RIDER_ENTER).await;
    assert_eq!(mover_view.data.get("compass_direction"), Some(&json!("S")));

    fr.close(None).await.expect("close should succeed");
    send_request(&mut obs, "nearby:list", json!({})).await;
    let list = next_with_syscall(&mut obs, "nearby:list").await;
    assert_eq!(list.data.get("riders").and_then(|v| v.as_array()).map(Vec::len), Some(1));
}

#[tokio::test]
async fn websocket_requires_rider_id() {
    let (state, _graph) = test_helpers::test_app_state();
    let addr = spawn_server(state).await;
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/api/ws")).await;
    assert!(result.is_err());
}
