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

//! The session/protocol dispatcher (§4.5, §4.6): one duplex websocket per
//! client on `/status`, a periodic broadcast of `measurement_update`, and
//! request/response RPC dispatch. Each accepted connection gets its own
//! short session id, its own bounded drop-oldest send queue, and its own
//! serialized writer task — the registry/physics/recorder locks are never
//! held across the network I/O.

pub mod action_mapping;
pub mod protocol;
pub mod rpc;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::physics::PhysicsEngine;
use crate::recorder::Recorder;
use crate::registry::DeviceRegistry;

/// How many outstanding messages a session's writer queue holds before it
/// starts dropping the oldest one (§9: bounded, drop-oldest, never block).
const SESSION_QUEUE_CAPACITY: usize = 256;
const BROADCAST_INTERVAL: Duration = Duration::from_millis(500);
const BROADCAST_CHANNEL_CAPACITY: usize = 256;

pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub physics: Option<Arc<PhysicsEngine>>,
    pub recorder: Arc<Recorder>,
    pub graph_dir: PathBuf,
    pub port: u16,
    pub mode: &'static str,
    pub broadcast_tx: broadcast::Sender<Value>,
}

impl AppState {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        physics: Option<Arc<PhysicsEngine>>,
        recorder: Arc<Recorder>,
        graph_dir: PathBuf,
        port: u16,
        mode: &'static str,
    ) -> Arc<Self> {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Arc::new(Self {
            registry,
            physics,
            recorder,
            graph_dir,
            port,
            mode,
            broadcast_tx,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Spawns the periodic broadcast task: every 500 ms, polls the registry and
/// publishes `measurement_update` to every subscribed session. Runs until
/// `cancel` fires.
pub fn spawn_broadcast_loop(state: Arc<AppState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let updates = state.registry.poll_all().await;
                    let msg = serde_json::json!({ "type": "measurement_update", "updates": updates });
                    // A send error here just means there are currently no
                    // subscribers; broadcast is best-effort.
                    let _ = state.broadcast_tx.send(msg);
                }
            }
        }
        log::debug!("broadcast loop stopped");
    });
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// A fixed-capacity drop-oldest queue feeding one session's writer task.
/// Overflow is logged at `warn!` and counted, never blocks the producer.
struct SessionQueue {
    inner: Mutex<VecDeque<Value>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl SessionQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(SESSION_QUEUE_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, msg: Value) {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= SESSION_QUEUE_CAPACITY {
            queue.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("session send queue full, dropped oldest message (total dropped: {total})");
        }
        queue.push_back(msg);
        drop(queue);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Value {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.inner.lock().unwrap().pop_front() {
                return msg;
            }
            notified.await;
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = format!("{:08x}", rand::random::<u32>());
    log::info!("session {session_id} connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let queue = Arc::new(SessionQueue::new());
    let cancel = CancellationToken::new();

    // Initial descriptor snapshot is always the first message (§5 ordering).
    let descriptors = state.registry.get_descriptor_graph().await;
    queue.push(serde_json::json!({ "type": "descriptor", "devices": descriptors }));

    let writer_queue = Arc::clone(&queue);
    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                msg = writer_queue.pop() => {
                    let Ok(text) = serde_json::to_string(&msg) else { continue };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let broadcast_queue = Arc::clone(&queue);
    let mut broadcast_rx = state.broadcast_tx.subscribe();
    let broadcast_cancel = cancel.clone();
    let broadcast_relay = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = broadcast_cancel.cancelled() => break,
                msg = broadcast_rx.recv() => {
                    match msg {
                        Ok(msg) => broadcast_queue.push(msg),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(text) = message else {
            if matches!(message, Message::Close(_)) {
                break;
            }
            continue;
        };
        let Ok(raw) = serde_json::from_str::<Value>(&text) else {
            let err = crate::errors::SgError::control(crate::errors::E_INVALID_REQUEST);
            queue.push(protocol::rpc_result_err(Value::Null, &err));
            continue;
        };

        match protocol::classify(&raw) {
            protocol::Inbound::Rpc { id, method, params } => {
                let fields = serde_json::json!({
                    "rpc_id": id,
                    "method": method,
                    "params_keys": params.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>()).unwrap_or_default(),
                });
                let _ = state.broadcast_tx.send(protocol::backend_log(
                    "session",
                    Some(&session_id),
                    "rpc.in",
                    fields,
                ));

                let response = match rpc::dispatch(&state, &id, method.as_deref(), &params).await {
                    Ok(result) => protocol::rpc_result_ok(id, result),
                    Err(err) => protocol::rpc_result_err(id, &err),
                };
                queue.push(response);
            }
            protocol::Inbound::LegacyControl(control) => {
                let _ = state.broadcast_tx.send(protocol::backend_log(
                    "session",
                    Some(&session_id),
                    "control.in",
                    serde_json::json!({ "cmd": control.get("cmd") }),
                ));
                rpc::dispatch_legacy_control(&state, &control).await;
            }
            protocol::Inbound::Invalid => {
                let err = crate::errors::SgError::control(crate::errors::E_INVALID_REQUEST);
                queue.push(protocol::rpc_result_err(Value::Null, &err));
            }
        }
    }

    cancel.cancel();
    let _ = writer_task.await;
    let _ = broadcast_relay.await;
    log::info!("session {session_id} disconnected");
}
