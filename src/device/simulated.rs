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

//! `SimulatedDevice`: the device kind created by the simulator loader
//! (§4.4) for every node in a loaded device graph. Its readings are backed
//! by the shared [`PhysicsEngine`] rather than real hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde_json::{json, Map, Value};

use crate::physics::PhysicsEngine;

pub struct SimulatedDevice {
    pub id: String,
    device_type: String,
    properties: Vec<String>,
    physics: Arc<PhysicsEngine>,
    rng: Mutex<StdRng>,
    state: Mutex<HashMap<String, Value>>,
}

impl SimulatedDevice {
    pub fn new(
        id: impl Into<String>,
        device_type: impl Into<String>,
        properties: Vec<String>,
        physics: Arc<PhysicsEngine>,
    ) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            properties,
            physics,
            rng: Mutex::new(StdRng::from_entropy()),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn descriptor(&self) -> Value {
        let mut metrics = Map::new();
        for prop in &self.properties {
            metrics.insert(
                prop.clone(),
                json!({ "kind": "number", "unit": "", "backend_unit": "", "precision": 3 }),
            );
        }
        json!({
            "id": self.id,
            "type": self.device_type,
            "status": "nominal",
            "specs": {},
            "metrics": metrics,
        })
    }

    pub fn read_measurement(&self) -> Value {
        let step = self.physics.get_cached_step();
        let cached = step.get(&self.id);
        let mut out = Map::new();
        for prop in &self.properties {
            if is_thermometer_like(prop) {
                let value = cached.map(|s| s.temperature_k).unwrap_or(300.0);
                out.insert(prop.clone(), json!(value));
                continue;
            }
            let noise_coeff = cached.map(|s| s.noise_coeff).unwrap_or(0.01);
            let base = {
                let state = self.state.lock().unwrap();
                state.get(prop).and_then(Value::as_f64).unwrap_or(0.0)
            };
            let mut rng = self.rng.lock().unwrap();
            let jitter = if noise_coeff > 0.0 {
                Normal::new(0.0, noise_coeff)
                    .map(|d| d.sample(&mut *rng))
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            out.insert(prop.clone(), json!(base + jitter));
        }
        Value::Object(out)
    }

    pub fn perform_action(&self, cmd: &Value) {
        let Some(obj) = cmd.as_object() else { return };
        let mut state = self.state.lock().unwrap();
        for (key, value) in obj {
            if let Some(property) = key.strip_prefix("set_") {
                state.insert(property.to_string(), value.clone());
            } else {
                log::debug!(
                    "simulated device {} ignoring unrecognized action key {key}",
                    self.id
                );
            }
        }
    }

    /// Asks the attached engine to reload its overrides file; returns
    /// whether the reload succeeded.
    pub async fn trigger_reload_overrides(&self) -> bool {
        self.physics.force_reload_overrides().await
    }
}

fn is_thermometer_like(property: &str) -> bool {
    let lower = property.to_ascii_lowercase();
    lower.contains("temperature") || lower.contains("temp_k") || lower == "temp"
}
