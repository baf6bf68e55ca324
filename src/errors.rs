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

//! The session/control error catalog (§7 of the spec). Every user-visible
//! failure carries a numeric code and a stable, machine-readable detail
//! slug, so tests and log greppers don't have to parse English sentences.

use derive_more::{Display, Error};
use serde::Serialize;

/// A single catalog entry: `(code, detail, slug)`.
#[derive(Debug, Clone, Display, Error, Serialize)]
#[display("Control rejected: {detail}")]
pub struct ControlRejected {
    pub detail: &'static str,
    pub slug: &'static str,
}

macro_rules! control_rejected {
    ($name:ident, $detail:literal, $slug:literal) => {
        pub const $name: ControlRejected = ControlRejected {
            detail: $detail,
            slug: $slug,
        };
    };
}

control_rejected!(E_INVALID_REQUEST, "invalid request", "D2400_INVALID_REQUEST");
control_rejected!(
    E_RPC_MISSING_ID,
    "rpc request missing id",
    "D2400_RPC_MISSING_ID"
);
control_rejected!(
    E_RPC_MISSING_METHOD,
    "rpc request missing method",
    "D2400_RPC_MISSING_METHOD"
);
control_rejected!(
    E_UNKNOWN_RPC_METHOD,
    "unknown rpc method",
    "D2400_UNKNOWN_RPC_METHOD"
);
control_rejected!(
    E_MISSING_DEVICE_ID,
    "missing params.device_id",
    "D2400_MISSING_DEVICE_ID"
);
control_rejected!(
    E_MISSING_ACTION,
    "missing params.action",
    "D2400_MISSING_ACTION"
);
control_rejected!(E_UNKNOWN_DEVICE, "unknown device", "D2400_UNKNOWN_DEVICE");
control_rejected!(
    E_RECORDER_NOT_INITIALIZED,
    "recorder not initialized",
    "D2400_RECORDER_NOT_INITIALIZED"
);
control_rejected!(
    E_RECORD_START_FAILED,
    "record.start failed",
    "D2400_RECORD_START_FAILED"
);
control_rejected!(
    E_MISSING_RECORDING_ID,
    "missing params.recording_id",
    "D2400_MISSING_RECORDING_ID"
);
control_rejected!(
    E_UNKNOWN_RECORDING_ID,
    "unknown recording_id",
    "D2400_UNKNOWN_RECORDING_ID"
);
control_rejected!(
    E_MEASUREMENTS_MUST_BE_ARRAY,
    "params.measurements must be array",
    "D2400_MEASUREMENTS_MUST_BE_ARRAY"
);
control_rejected!(
    E_RECORD_PARAMS_MUST_BE_OBJECT,
    "record.start params must be object",
    "D2400_RECORD_PARAMS_MUST_BE_OBJECT"
);
control_rejected!(
    E_RECORD_STREAMS_REQUIRED,
    "record.start requires non-empty streams[]",
    "D2400_RECORD_STREAMS_REQUIRED"
);
control_rejected!(
    E_RECORD_STREAM_MISSING_DEVICE_ID,
    "record.start stream missing device_id",
    "D2400_RECORD_STREAM_MISSING_DEVICE_ID"
);
control_rejected!(
    E_RECORD_STREAM_RATE_INVALID,
    "record.start stream rate_hz must be > 0",
    "D2400_RECORD_STREAM_RATE_INVALID"
);
control_rejected!(
    E_RECORD_NO_VALID_STREAMS,
    "record.start: no valid streams",
    "D2400_RECORD_NO_VALID_STREAMS"
);
control_rejected!(
    E_RECORD_OPEN_FILE_FAILED,
    "failed to open recording file",
    "D2400_RECORD_OPEN_FILE_FAILED"
);

/// `{code, message, details}` — the shape every `rpc_result.error` takes.
#[derive(Debug, Clone, Serialize)]
pub struct SgError {
    pub code: &'static str,
    pub message: String,
    pub details: serde_json::Value,
}

impl SgError {
    pub fn control(rejected: ControlRejected) -> Self {
        Self {
            code: "2400",
            message: format!("Control rejected: {}", rejected.detail),
            details: serde_json::json!({ "detail": rejected.detail, "slug": rejected.slug }),
        }
    }

    /// For errors that don't map onto a fixed catalog entry (propagated
    /// `anyhow` failures from file I/O, etc.) but still use code 2400.
    pub fn control_msg(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: "2400",
            details: serde_json::json!({ "detail": message }),
            message,
        }
    }

    pub fn session_dropped() -> Self {
        Self {
            code: "2410",
            message: "WebSocket session dropped unexpectedly".to_string(),
            details: serde_json::json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_rejected_renders_detail() {
        let err = SgError::control(E_RPC_MISSING_ID);
        assert_eq!(err.code, "2400");
        assert_eq!(err.details["detail"], "rpc request missing id");
    }
}
