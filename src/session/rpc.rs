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

//! The closed set of RPC methods (§4.5 table) plus the legacy control
//! dispatch. Every RPC handler returns a plain `Result<Value, SgError>`; the
//! caller (`session::handle_socket`) wraps it into `rpc_result`.

use std::sync::Arc;

use serde_json::{json, Value};

use super::action_mapping::rewrite_action;
use super::AppState;
use crate::errors::{
    SgError, E_MISSING_ACTION, E_MISSING_DEVICE_ID, E_MISSING_RECORDING_ID, E_RPC_MISSING_ID,
    E_RPC_MISSING_METHOD, E_UNKNOWN_DEVICE, E_UNKNOWN_RPC_METHOD,
};
use crate::hash::fnv1a64_hex;
use crate::schematic;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn id_is_missing(id: &Value) -> bool {
    id.is_null() || matches!(id, Value::String(s) if s.is_empty())
}

pub async fn dispatch(
    state: &Arc<AppState>,
    id: &Value,
    method: Option<&str>,
    params: &Value,
) -> Result<Value, SgError> {
    if id_is_missing(id) {
        return Err(SgError::control(E_RPC_MISSING_ID));
    }
    let Some(method) = method else {
        return Err(SgError::control(E_RPC_MISSING_METHOD));
    };

    match method {
        "devices.list" => Ok(json!({ "devices": state.registry.get_descriptor_graph().await })),
        "devices.poll" => Ok(json!({ "updates": state.registry.poll_all().await })),
        "backend.info" => backend_info(state).await,
        "graph.get" => graph_get(state, params).await,
        "graph.save" => graph_save(state, params).await,
        "graph.list" => graph_list(state).await,
        "graph.load" => graph_load(state, params).await,
        "graph.set_active" => graph_set_active(state, params).await,
        "device.action" => device_action(state, params).await,
        "record.start" => record_start(state, params).await,
        "record.stop" => record_stop(state, params).await,
        "qec.decode" => crate::qec::decode(params),
        "qec.benchmark" => Ok(crate::qec::benchmark(params)),
        _ => Err(SgError::control(E_UNKNOWN_RPC_METHOD)),
    }
}

async fn backend_info(state: &Arc<AppState>) -> Result<Value, SgError> {
    let resolved = schematic::resolve_active_or_canonical(&state.graph_dir).await.ok();
    Ok(json!({
        "port": state.port,
        "git_commit": env!("STONEGATE_GIT_COMMIT"),
        "build_time": env!("STONEGATE_BUILD_TIME"),
        "protocol_version": super::protocol::PROTOCOL_VERSION,
        "capabilities": ["devices", "graph", "record", "qec"],
        "mode": state.mode,
        "device_graph_path": schematic::canonical_graph_path(&state.graph_dir),
        "graph_hash": resolved.as_ref().map(|r| r.graph_hash.clone()),
        "schema_hash": resolved.as_ref().map(|r| r.schema_hash.clone()),
        "active_schematic": resolved.and_then(|r| r.active_schematic),
    }))
}

async fn graph_get(state: &Arc<AppState>, params: &Value) -> Result<Value, SgError> {
    let include_graph = params.get("include_graph").and_then(Value::as_bool).unwrap_or(true);
    let include_schema = params.get("include_schema").and_then(Value::as_bool).unwrap_or(true);
    match schematic::resolve_active_or_canonical(&state.graph_dir).await {
        Ok(resolved) => Ok(json!({
            "available": true,
            "graph": if include_graph { resolved.graph } else { Value::Null },
            "schema": if include_schema { resolved.schema } else { Value::Null },
            "graph_hash": resolved.graph_hash,
            "schema_hash": resolved.schema_hash,
            "active_schematic": resolved.active_schematic,
            "using_active": resolved.using_active,
        })),
        Err(e) => {
            log::warn!("graph.get: {e}");
            Ok(json!({ "available": false }))
        }
    }
}

async fn graph_save(state: &Arc<AppState>, params: &Value) -> Result<Value, SgError> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let graph = params.get("graph").cloned().unwrap_or(Value::Object(Default::default()));
    let schema = params.get("schema").cloned().unwrap_or(Value::Object(Default::default()));
    let overwrite = params.get("overwrite").and_then(Value::as_bool).unwrap_or(false);

    match schematic::save(&state.graph_dir, name, graph, schema, overwrite, now_ms()).await {
        Ok(outcome) => Ok(json!({
            "saved": true,
            "name": outcome.name,
            "path": outcome.path,
            "graph_hash": outcome.graph_hash,
            "schema_hash": outcome.schema_hash,
        })),
        Err(e) => Err(SgError::control_msg(e.to_string())),
    }
}

async fn graph_list(state: &Arc<AppState>) -> Result<Value, SgError> {
    match schematic::list(&state.graph_dir).await {
        Ok(listing) => {
            let schematics: Vec<Value> = listing
                .into_iter()
                .map(|entry| json!({ "name": entry.name, "path": entry.path, "mtime_ms": entry.mtime_ms }))
                .collect();
            Ok(json!({ "schematics": schematics }))
        }
        Err(e) => Err(SgError::control_msg(e.to_string())),
    }
}

async fn graph_load(state: &Arc<AppState>, params: &Value) -> Result<Value, SgError> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    match schematic::load(&state.graph_dir, name).await {
        Ok(stored) => {
            let graph_bytes = serde_json::to_vec(&stored.graph).unwrap_or_default();
            let schema_bytes = serde_json::to_vec(&stored.schema).unwrap_or_default();
            Ok(json!({
                "available": true,
                "graph": stored.graph,
                "schema": stored.schema,
                "graph_hash": fnv1a64_hex(&graph_bytes),
                "schema_hash": fnv1a64_hex(&schema_bytes),
                "path": schematic::schematic_file_path(&state.graph_dir, name),
            }))
        }
        Err(e) => {
            log::warn!("graph.load({name}): {e}");
            Ok(json!({ "available": false, "graph": null, "schema": null, "graph_hash": null, "schema_hash": null, "path": null }))
        }
    }
}

async fn graph_set_active(state: &Arc<AppState>, params: &Value) -> Result<Value, SgError> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    match schematic::set_active(&state.graph_dir, name).await {
        Ok(active) => Ok(json!({ "ok": true, "active_schematic": active, "restart_required": true })),
        Err(e) => Err(SgError::control_msg(e.to_string())),
    }
}

async fn device_action(state: &Arc<AppState>, params: &Value) -> Result<Value, SgError> {
    let device_id = params
        .get("device_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SgError::control(E_MISSING_DEVICE_ID))?;
    let action = params
        .get("action")
        .filter(|a| !a.is_null())
        .ok_or_else(|| SgError::control(E_MISSING_ACTION))?;

    let applied = state
        .registry
        .with_device(device_id, |device| {
            let rewritten = rewrite_action(device.device_type(), action);
            device.perform_action(&rewritten);
        })
        .await;

    if applied.is_none() {
        return Err(SgError::control(E_UNKNOWN_DEVICE));
    }
    Ok(json!({ "device_id": device_id, "applied": true }))
}

async fn record_start(state: &Arc<AppState>, params: &Value) -> Result<Value, SgError> {
    let (recording_id, path) = state.recorder.start(params).await?;
    Ok(json!({ "recording_id": recording_id, "path": path }))
}

async fn record_stop(state: &Arc<AppState>, params: &Value) -> Result<Value, SgError> {
    let recording_id = params
        .get("recording_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SgError::control(E_MISSING_RECORDING_ID))?;
    let summary = state.recorder.stop(recording_id).await?;
    Ok(json!({
        "recording_id": summary.recording_id,
        "path": summary.path,
        "samples_written": summary.samples_written,
        "started_ts_ms": summary.started_ts_ms,
        "stopped_ts_ms": summary.stopped_ts_ms,
    }))
}

/// Legacy `{cmd, ...}` control messages (§4.5). Unlike RPC, these have no
/// response envelope — any effect is observed on the next broadcast or
/// `devices.poll`.
pub async fn dispatch_legacy_control(state: &Arc<AppState>, control: &Value) {
    match control.get("cmd").and_then(Value::as_str) {
        Some("reload_overrides") => {
            let reloaded = state.registry.trigger_reload_overrides_all().await;
            log::info!("reload_overrides: {reloaded} device(s) reloaded");
        }
        Some("action") | Some("device_action") => {
            let device_id = control.get("device_id").and_then(Value::as_str);
            let action = control.get("action");
            match (device_id, action) {
                (Some(device_id), Some(action)) => {
                    let found = state
                        .registry
                        .with_device(device_id, |device| {
                            let rewritten = rewrite_action(device.device_type(), action);
                            device.perform_action(&rewritten);
                        })
                        .await;
                    if found.is_none() {
                        log::warn!("legacy control action: unknown device {device_id}");
                    }
                }
                _ => log::warn!("legacy control action missing device_id/action"),
            }
        }
        other => log::debug!("unhandled legacy control cmd: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::drivers::Thermocouple;
    use crate::device::DeviceKind;
    use crate::recorder::Recorder;
    use crate::registry::DeviceRegistry;
    use std::path::PathBuf;

    async fn test_state() -> Arc<AppState> {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .register_device(DeviceKind::Thermocouple(Thermocouple::new("s1")))
            .await;
        let recorder = Arc::new(Recorder::new(PathBuf::from("/tmp/stonegate-rpc-test"), Arc::clone(&registry)));
        AppState::new(registry, None, recorder, PathBuf::from("/tmp/stonegate-rpc-test"), 8080, "sim")
    }

    #[tokio::test]
    async fn missing_id_is_rejected() {
        let state = test_state().await;
        let err = dispatch(&state, &Value::Null, Some("devices.list"), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.details["slug"], "D2400_RPC_MISSING_ID");
    }

    #[tokio::test]
    async fn missing_method_is_rejected() {
        let state = test_state().await;
        let err = dispatch(&state, &json!("1"), None, &json!({})).await.unwrap_err();
        assert_eq!(err.details["slug"], "D2400_RPC_MISSING_METHOD");
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let state = test_state().await;
        let err = dispatch(&state, &json!("1"), Some("nope.nope"), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.details["slug"], "D2400_UNKNOWN_RPC_METHOD");
    }

    #[tokio::test]
    async fn devices_list_returns_registered_device() {
        let state = test_state().await;
        let result = dispatch(&state, &json!("1"), Some("devices.list"), &json!({}))
            .await
            .unwrap();
        assert_eq!(result["devices"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn device_action_unknown_device_errors() {
        let state = test_state().await;
        let params = json!({ "device_id": "ghost", "action": { "zero": true } });
        let err = dispatch(&state, &json!("1"), Some("device.action"), &params)
            .await
            .unwrap_err();
        assert_eq!(err.details["slug"], "D2400_UNKNOWN_DEVICE");
    }

    #[tokio::test]
    async fn device_action_applies_and_echoes_device_id() {
        let state = test_state().await;
        let params = json!({ "device_id": "s1", "action": { "zero": true } });
        let result = dispatch(&state, &json!("1"), Some("device.action"), &params)
            .await
            .unwrap();
        assert_eq!(result["device_id"], "s1");
        assert_eq!(result["applied"], true);
    }
}
