/*
 * StoneGate - control-and-monitoring server for a laboratory apparatus
 * Copyright (c) 2026  StoneGate contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! End-to-end session/RPC coverage (§4.5, §4.6, §8) driven over a real
//! loopback websocket, rather than calling the dispatcher directly. Each
//! test boots its own axum server on an ephemeral port.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use stonegate::device::drivers::Thermocouple;
use stonegate::device::DeviceKind;
use stonegate::recorder::Recorder;
use stonegate::registry::DeviceRegistry;
use stonegate::session::{self, AppState};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_test_server() -> (String, Arc<DeviceRegistry>, tokio::task::JoinHandle<()>) {
    let registry = Arc::new(DeviceRegistry::new());
    registry
        .register_device(DeviceKind::Thermocouple(Thermocouple::new("s1")))
        .await;

    let recordings_dir =
        std::env::temp_dir().join(format!("stonegate-it-{:x}", rand::random::<u64>()));
    let recorder = Arc::new(Recorder::new(recordings_dir, Arc::clone(&registry)));

    let state = AppState::new(Arc::clone(&registry), None, recorder, PathBuf::from("."), 0, "sim");
    let router = session::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    (format!("ws://{addr}/status"), registry, handle)
}

/// Reads frames until one whose `type` field is `want`, skipping any
/// `backend.log` diagnostic frames interleaved by the broadcast relay.
async fn next_of_type(ws: &mut WsStream, want: &str) -> Value {
    for _ in 0..10 {
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("socket closed waiting for {want}");
        };
        let parsed: Value = serde_json::from_str(&text).expect("valid json frame");
        if parsed["type"] == want {
            return parsed;
        }
    }
    panic!("never saw a {want} frame");
}

#[tokio::test]
async fn boot_sends_descriptor_before_anything_else() {
    let (url, _registry, _server) = spawn_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let Some(Ok(Message::Text(text))) = ws.next().await else {
        panic!("expected first frame");
    };
    let descriptor: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(descriptor["type"], "descriptor");
    let devices = descriptor["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["id"], "s1");
}

#[tokio::test]
async fn devices_list_rpc_round_trips() {
    let (url, _registry, _server) = spawn_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let _descriptor = next_of_type(&mut ws, "descriptor").await;

    let request = json!({"type": "rpc", "id": "1", "method": "devices.list", "params": {}});
    ws.send(Message::Text(request.to_string().into())).await.unwrap();

    let reply = next_of_type(&mut ws, "rpc_result").await;
    assert_eq!(reply["id"], "1");
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["result"]["devices"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn rpc_missing_id_is_rejected_with_catalog_error() {
    let (url, _registry, _server) = spawn_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let _descriptor = next_of_type(&mut ws, "descriptor").await;

    let request = json!({"type": "rpc", "method": "devices.list", "params": {}});
    ws.send(Message::Text(request.to_string().into())).await.unwrap();

    let reply = next_of_type(&mut ws, "rpc_result").await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["details"]["slug"], "D2400_RPC_MISSING_ID");
}

#[tokio::test]
async fn device_action_then_poll_observes_the_new_state() {
    let (url, _registry, _server) = spawn_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let _descriptor = next_of_type(&mut ws, "descriptor").await;

    let zero = json!({
        "type": "rpc",
        "id": "1",
        "method": "device.action",
        "params": { "device_id": "s1", "action": { "zero": true } },
    });
    ws.send(Message::Text(zero.to_string().into())).await.unwrap();
    let reply = next_of_type(&mut ws, "rpc_result").await;
    assert_eq!(reply["result"]["applied"], true);

    let poll = json!({"type": "rpc", "id": "2", "method": "devices.poll", "params": {}});
    ws.send(Message::Text(poll.to_string().into())).await.unwrap();
    let reply = next_of_type(&mut ws, "rpc_result").await;
    let updates = reply["result"]["updates"].as_array().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["id"], "s1");
}

#[tokio::test]
async fn unparseable_text_frame_gets_invalid_request_error() {
    let (url, _registry, _server) = spawn_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let _descriptor = next_of_type(&mut ws, "descriptor").await;

    ws.send(Message::Text("not json at all".into())).await.unwrap();
    let reply = next_of_type(&mut ws, "rpc_result").await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["details"]["slug"], "D2400_INVALID_REQUEST");
}

#[tokio::test]
async fn record_lifecycle_over_the_wire() {
    let (url, _registry, _server) = spawn_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let _descriptor = next_of_type(&mut ws, "descriptor").await;

    let start = json!({
        "type": "rpc",
        "id": "1",
        "method": "record.start",
        "params": { "streams": [{"device_id": "s1", "rate_hz": 20}] },
    });
    ws.send(Message::Text(start.to_string().into())).await.unwrap();
    let reply = next_of_type(&mut ws, "rpc_result").await;
    assert_eq!(reply["ok"], true);
    let recording_id = reply["result"]["recording_id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stop = json!({
        "type": "rpc",
        "id": "2",
        "method": "record.stop",
        "params": { "recording_id": recording_id },
    });
    ws.send(Message::Text(stop.to_string().into())).await.unwrap();
    let reply = next_of_type(&mut ws, "rpc_result").await;
    assert_eq!(reply["ok"], true);
    assert!(reply["result"]["samples_written"].as_u64().unwrap() > 0);
}
