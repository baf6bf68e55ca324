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

//! Action-verb rewriting for `device.action` / legacy control `action`
//! (§4.5, §4.6). The UI sends a human-shaped `{"set": {k: v, ...}}` object;
//! devices only understand the flat `set_<verb>` keys their
//! `perform_action` matches on.

use serde_json::{Map, Value};

pub fn rewrite_action(device_type: &str, action: &Value) -> Value {
    let Some(set_obj) = action.get("set").and_then(Value::as_object) else {
        return action.clone();
    };

    let mut out = Map::new();
    for (key, value) in set_obj {
        let rewritten = if key.starts_with("set_") {
            key.clone()
        } else if let Some(mapped) = device_override(device_type, key) {
            mapped.to_string()
        } else {
            let base = key.rsplit_once('_').map(|(base, _)| base).unwrap_or(key);
            format!("set_{base}")
        };
        out.insert(rewritten, value.clone());
    }
    Value::Object(out)
}

fn device_override(device_type: &str, key: &str) -> Option<&'static str> {
    match (device_type, key) {
        ("laser_controller", "phase_rad") => Some("set_phase"),
        ("laser_controller", "intensity" | "power" | "optical_power") => Some("set_intensity"),
        ("ln2_cooling_controller", "temperature_K" | "setpoint_K") => Some("set_setpoint"),
        ("ln2_cooling_controller", "flow_rate_Lmin") => Some("set_flow_rate"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laser_phase_maps_to_set_phase() {
        let rewritten = rewrite_action("laser_controller", &serde_json::json!({"set": {"phase_rad": 1.2}}));
        assert_eq!(rewritten, serde_json::json!({"set_phase": 1.2}));
    }

    #[test]
    fn ln2_setpoint_aliases_map_to_set_setpoint() {
        let rewritten =
            rewrite_action("ln2_cooling_controller", &serde_json::json!({"set": {"setpoint_K": 77.0}}));
        assert_eq!(rewritten, serde_json::json!({"set_setpoint": 77.0}));
    }

    #[test]
    fn already_prefixed_keys_pass_through() {
        let rewritten =
            rewrite_action("laser_controller", &serde_json::json!({"set": {"set_phase": 2.0}}));
        assert_eq!(rewritten, serde_json::json!({"set_phase": 2.0}));
    }

    #[test]
    fn unmapped_key_falls_back_to_unit_suffix_strip() {
        let rewritten =
            rewrite_action("thermocouple", &serde_json::json!({"set": {"offset_C": 1.5}}));
        assert_eq!(rewritten, serde_json::json!({"set_offset": 1.5}));
    }

    #[test]
    fn action_without_set_wrapper_passes_through_unchanged() {
        let action = serde_json::json!({"zero": true});
        assert_eq!(rewrite_action("thermocouple", &action), action);
    }
}
