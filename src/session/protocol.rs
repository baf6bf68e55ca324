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

//! The two inbound message shapes (§4.5): legacy free-form `{cmd, ...}`
//! control messages, and the canonical `{type:"rpc", id, method, params}`
//! request/response form.

use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "1.0.0";

pub enum Inbound {
    LegacyControl(Value),
    Rpc {
        id: Value,
        method: Option<String>,
        params: Value,
    },
    Invalid,
}

pub fn classify(raw: &Value) -> Inbound {
    if raw.get("type").and_then(Value::as_str) == Some("rpc") {
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        let method = raw.get("method").and_then(Value::as_str).map(str::to_string);
        let params = raw.get("params").cloned().unwrap_or(Value::Object(Default::default()));
        return Inbound::Rpc { id, method, params };
    }
    if raw.get("cmd").is_some() {
        return Inbound::LegacyControl(raw.clone());
    }
    Inbound::Invalid
}

pub fn rpc_result_ok(id: Value, result: Value) -> Value {
    serde_json::json!({ "type": "rpc_result", "id": id, "ok": true, "result": result })
}

pub fn rpc_result_err(id: Value, error: &crate::errors::SgError) -> Value {
    serde_json::json!({ "type": "rpc_result", "id": id, "ok": false, "error": error })
}

pub fn backend_log(
    origin: &str,
    session_id: Option<&str>,
    kind: &str,
    fields: Value,
) -> Value {
    let now_ms = chrono::Utc::now().timestamp_millis();
    serde_json::json!({
        "type": "backend.log",
        "ts": now_ms as f64 / 1000.0,
        "ts_ms": now_ms,
        "level": "info",
        "origin": origin,
        "session_id": session_id,
        "kind": kind,
        "fields": fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rpc_messages() {
        let raw = serde_json::json!({"type": "rpc", "id": "1", "method": "devices.list"});
        match classify(&raw) {
            Inbound::Rpc { id, method, .. } => {
                assert_eq!(id, serde_json::json!("1"));
                assert_eq!(method.as_deref(), Some("devices.list"));
            }
            _ => panic!("expected rpc"),
        }
    }

    #[test]
    fn classifies_legacy_control_messages() {
        let raw = serde_json::json!({"cmd": "reload_overrides"});
        assert!(matches!(classify(&raw), Inbound::LegacyControl(_)));
    }

    #[test]
    fn classifies_unrecognized_shape_as_invalid() {
        let raw = serde_json::json!({"hello": "world"});
        assert!(matches!(classify(&raw), Inbound::Invalid));
    }
}
