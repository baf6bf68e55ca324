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

//! The fixed set of hand-written hardware drivers (§4.2). Each holds its
//! scalar state behind its own `std::sync::Mutex`, locked only across the
//! synchronous mutation/read, never across an `.await`.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde_json::{json, Value};

use crate::physics::PhysicsEngine;

fn noise(rng: &mut StdRng, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, sigma).map(|d| d.sample(rng)).unwrap_or(0.0)
}

fn new_rng() -> StdRng {
    StdRng::from_entropy()
}

pub struct Thermocouple {
    pub id: String,
    state: Mutex<ThermocoupleState>,
}

struct ThermocoupleState {
    offset_c: f64,
    rng: StdRng,
}

impl Thermocouple {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ThermocoupleState {
                offset_c: 0.0,
                rng: new_rng(),
            }),
        }
    }

    pub fn device_type(&self) -> &'static str {
        "thermocouple"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": {},
            "metrics": {
                "temperature_C": metric_num("celsius", 2),
            }
        })
    }

    pub fn read_measurement(&self) -> Value {
        let mut s = self.state.lock().unwrap();
        let base = 23.0 - s.offset_c;
        let reading = base + noise(&mut s.rng, 0.05);
        json!({ "temperature_C": reading })
    }

    pub fn perform_action(&self, cmd: &Value) {
        let mut s = self.state.lock().unwrap();
        if cmd.get("zero").and_then(Value::as_bool) == Some(true) {
            s.offset_c = 0.0;
        }
    }
}

pub struct PhotonicDetector {
    pub id: String,
    state: Mutex<PhotonicDetectorState>,
}

struct PhotonicDetectorState {
    dark_rate: f64,
    rng: StdRng,
}

impl PhotonicDetector {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(PhotonicDetectorState {
                dark_rate: 50.0,
                rng: new_rng(),
            }),
        }
    }

    pub fn device_type(&self) -> &'static str {
        "photonic_detector"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": {},
            "metrics": {
                "counts": metric_num("counts/s", 0),
                "dark_rate": metric_num("counts/s", 1),
            }
        })
    }

    pub fn read_measurement(&self) -> Value {
        let mut s = self.state.lock().unwrap();
        let dark_rate = s.dark_rate;
        let counts = (1000.0 + noise(&mut s.rng, 20.0)).max(0.0).round();
        json!({ "counts": counts, "dark_rate": dark_rate })
    }

    pub fn perform_action(&self, cmd: &Value) {
        let mut s = self.state.lock().unwrap();
        if cmd.get("zero").and_then(Value::as_bool) == Some(true) {
            s.dark_rate = 0.0;
        }
    }
}

pub struct Ln2CoolingController {
    pub id: String,
    physics: Arc<PhysicsEngine>,
    state: Mutex<Ln2State>,
}

struct Ln2State {
    setpoint_k: f64,
    flow_rate_lmin: f64,
}

impl Ln2CoolingController {
    pub fn new(id: impl Into<String>, physics: Arc<PhysicsEngine>) -> Self {
        let id = id.into();
        let controller = Self {
            id: id.clone(),
            physics,
            state: Mutex::new(Ln2State {
                setpoint_k: 77.0,
                flow_rate_lmin: 0.0,
            }),
        };
        controller.push_controller_state();
        controller
    }

    pub fn device_type(&self) -> &'static str {
        "ln2_cooling_controller"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": {},
            "metrics": {
                "temperature_K": metric_num("kelvin", 2),
                "flow_rate_Lmin": metric_num("L/min", 2),
            }
        })
    }

    fn push_controller_state(&self) {
        let s = self.state.lock().unwrap();
        self.physics.update_controller_state(
            self.id.clone(),
            json!({ "flow_rate_Lmin": s.flow_rate_lmin, "setpoint_K": s.setpoint_k }),
        );
    }

    pub fn read_measurement(&self) -> Value {
        self.push_controller_state();
        let flow_rate = self.state.lock().unwrap().flow_rate_lmin;
        let step = self.physics.get_cached_step();
        let temperature_k = step
            .get(&self.id)
            .map(|s| s.temperature_k)
            .unwrap_or_else(|| self.state.lock().unwrap().setpoint_k);
        json!({ "temperature_K": temperature_k, "flow_rate_Lmin": flow_rate })
    }

    pub fn perform_action(&self, cmd: &Value) {
        {
            let mut s = self.state.lock().unwrap();
            if let Some(v) = cmd.get("set_setpoint").and_then(Value::as_f64) {
                s.setpoint_k = v;
            }
            if let Some(v) = cmd.get("set_flow_rate").and_then(Value::as_f64) {
                s.flow_rate_lmin = v;
            }
        }
        self.push_controller_state();
    }
}

pub struct LaserController {
    pub id: String,
    state: Mutex<LaserState>,
}

struct LaserState {
    phase_rad: f64,
    intensity: f64,
    rng: StdRng,
}

impl LaserController {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(LaserState {
                phase_rad: 0.0,
                intensity: 1.0,
                rng: new_rng(),
            }),
        }
    }

    pub fn device_type(&self) -> &'static str {
        "laser_controller"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": {},
            "metrics": {
                "phase_rad": metric_num("radians", 4),
                "intensity": metric_num("mW", 3),
            }
        })
    }

    pub fn read_measurement(&self) -> Value {
        let mut s = self.state.lock().unwrap();
        let phase = s.phase_rad;
        let intensity = (s.intensity + noise(&mut s.rng, 0.01)).max(0.0);
        json!({ "phase_rad": phase, "intensity": intensity })
    }

    pub fn perform_action(&self, cmd: &Value) {
        let mut s = self.state.lock().unwrap();
        if let Some(v) = cmd.get("set_phase").and_then(Value::as_f64) {
            s.phase_rad = v;
        }
        if let Some(v) = cmd.get("set_intensity").and_then(Value::as_f64) {
            s.intensity = v;
        }
    }
}

pub struct AncillaQubit {
    pub id: String,
    state: Mutex<AncillaState>,
}

struct AncillaState {
    bit: u8,
    role: String,
}

impl AncillaQubit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(AncillaState {
                bit: 0,
                role: "ancilla".to_string(),
            }),
        }
    }

    pub fn device_type(&self) -> &'static str {
        "ancilla_qubit"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": {},
            "metrics": {
                "state": metric_raw("integer", "", 0),
                "role": metric_raw("string", "", 0),
            }
        })
    }

    pub fn read_measurement(&self) -> Value {
        let s = self.state.lock().unwrap();
        json!({ "state": s.bit, "role": s.role })
    }

    pub fn perform_action(&self, cmd: &Value) {
        let mut s = self.state.lock().unwrap();
        if cmd.get("reset").and_then(Value::as_bool) == Some(true) {
            s.bit = 0;
        }
        if let Some(role) = cmd.get("set_role").and_then(Value::as_str) {
            s.role = role.to_string();
        }
    }
}

pub struct QuantumRegister {
    pub id: String,
    state: Mutex<Vec<u8>>,
}

impl QuantumRegister {
    pub fn new(id: impl Into<String>, size: usize) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(vec![0u8; size.max(1)]),
        }
    }

    pub fn device_type(&self) -> &'static str {
        "quantum_register"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": { "size": self.state.lock().unwrap().len() },
            "metrics": {
                "state_vector": metric_raw("vector", "", 0),
            }
        })
    }

    pub fn read_measurement(&self) -> Value {
        let bits = self.state.lock().unwrap();
        json!({ "state_vector": bits.iter().map(|b| *b as i64).collect::<Vec<_>>() })
    }

    pub fn perform_action(&self, cmd: &Value) {
        let mut bits = self.state.lock().unwrap();
        if cmd.get("reset_all").and_then(Value::as_bool) == Some(true) {
            bits.iter_mut().for_each(|b| *b = 0);
        }
        if cmd.get("apply_gate").is_some() {
            bits.iter_mut().for_each(|b| *b ^= 1);
        }
    }
}

pub struct PulseSequencer {
    pub id: String,
    state: Mutex<PulseSequencerState>,
}

struct PulseSequencerState {
    current_step: i64,
    running: bool,
    program: Option<String>,
}

impl PulseSequencer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(PulseSequencerState {
                current_step: 0,
                running: false,
                program: None,
            }),
        }
    }

    pub fn device_type(&self) -> &'static str {
        "pulse_sequencer"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": {},
            "metrics": {
                "current_step": metric_raw("integer", "", 0),
                "running": metric_raw("boolean", "", 0),
            }
        })
    }

    pub fn read_measurement(&self) -> Value {
        let s = self.state.lock().unwrap();
        json!({ "current_step": s.current_step, "running": s.running })
    }

    pub fn perform_action(&self, cmd: &Value) {
        let mut s = self.state.lock().unwrap();
        if let Some(program) = cmd.get("load").and_then(Value::as_str) {
            s.program = Some(program.to_string());
            s.current_step = 0;
        }
        if cmd.get("start").and_then(Value::as_bool) == Some(true) {
            s.running = true;
        }
        if cmd.get("stop").and_then(Value::as_bool) == Some(true) {
            s.running = false;
        }
        if cmd.get("step").and_then(Value::as_bool) == Some(true) {
            s.current_step += 1;
        }
    }
}

pub struct QecModule {
    pub id: String,
    state: Mutex<QecModuleState>,
}

struct QecModuleState {
    syndrome: i64,
    correction_applied: bool,
    code_type: String,
}

impl QecModule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(QecModuleState {
                syndrome: 0,
                correction_applied: false,
                code_type: "repetition".to_string(),
            }),
        }
    }

    pub fn device_type(&self) -> &'static str {
        "qec_module"
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.device_type(),
            "status": "nominal",
            "specs": {},
            "metrics": {
                "syndrome": metric_raw("integer", "", 0),
                "correction_applied": metric_raw("boolean", "", 0),
            }
        })
    }

    pub fn read_measurement(&self) -> Value {
        let s = self.state.lock().unwrap();
        json!({ "syndrome": s.syndrome, "correction_applied": s.correction_applied })
    }

    pub fn perform_action(&self, cmd: &Value) {
        let mut s = self.state.lock().unwrap();
        if let Some(v) = cmd.get("extract_syndrome").and_then(Value::as_i64) {
            s.syndrome = v;
        }
        if let Some(v) = cmd.get("apply_correction").and_then(Value::as_bool) {
            s.correction_applied = v;
        }
        if let Some(code_type) = cmd.get("set_code_type").and_then(Value::as_str) {
            s.code_type = code_type.to_string();
        }
    }
}

fn metric_num(unit: &str, precision: u32) -> Value {
    json!({ "kind": "number", "unit": unit, "backend_unit": unit, "precision": precision })
}

fn metric_raw(kind: &str, unit: &str, precision: u32) -> Value {
    json!({ "kind": kind, "unit": unit, "backend_unit": unit, "precision": precision })
}
