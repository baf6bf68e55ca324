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

//! The device model (§3, §4.2). Rather than a trait object behind an
//! `Arc<dyn Device>` (the raw-polymorphism construct §9's redesign
//! guidance calls out), every device variant is a field of a single sealed
//! enum, `DeviceKind`, with a minimal capability surface dispatched by
//! `match`. Each variant owns its mutable state behind its own
//! `std::sync::Mutex`, locked only across synchronous reads/mutations.

pub mod drivers;
pub mod simulated;

use serde_json::Value;

use drivers::{
    AncillaQubit, Ln2CoolingController, LaserController, PhotonicDetector, PulseSequencer,
    QecModule, QuantumRegister, Thermocouple,
};
use simulated::SimulatedDevice;

pub enum DeviceKind {
    Thermocouple(Thermocouple),
    PhotonicDetector(PhotonicDetector),
    Ln2CoolingController(Ln2CoolingController),
    LaserController(LaserController),
    AncillaQubit(AncillaQubit),
    QuantumRegister(QuantumRegister),
    PulseSequencer(PulseSequencer),
    QecModule(QecModule),
    Simulated(SimulatedDevice),
}

impl DeviceKind {
    pub fn id(&self) -> &str {
        match self {
            DeviceKind::Thermocouple(d) => &d.id,
            DeviceKind::PhotonicDetector(d) => &d.id,
            DeviceKind::Ln2CoolingController(d) => &d.id,
            DeviceKind::LaserController(d) => &d.id,
            DeviceKind::AncillaQubit(d) => &d.id,
            DeviceKind::QuantumRegister(d) => &d.id,
            DeviceKind::PulseSequencer(d) => &d.id,
            DeviceKind::QecModule(d) => &d.id,
            DeviceKind::Simulated(d) => &d.id,
        }
    }

    pub fn device_type(&self) -> &str {
        match self {
            DeviceKind::Thermocouple(d) => d.device_type(),
            DeviceKind::PhotonicDetector(d) => d.device_type(),
            DeviceKind::Ln2CoolingController(d) => d.device_type(),
            DeviceKind::LaserController(d) => d.device_type(),
            DeviceKind::AncillaQubit(d) => d.device_type(),
            DeviceKind::QuantumRegister(d) => d.device_type(),
            DeviceKind::PulseSequencer(d) => d.device_type(),
            DeviceKind::QecModule(d) => d.device_type(),
            DeviceKind::Simulated(d) => d.device_type(),
        }
    }

    pub fn descriptor(&self) -> Value {
        match self {
            DeviceKind::Thermocouple(d) => d.descriptor(),
            DeviceKind::PhotonicDetector(d) => d.descriptor(),
            DeviceKind::Ln2CoolingController(d) => d.descriptor(),
            DeviceKind::LaserController(d) => d.descriptor(),
            DeviceKind::AncillaQubit(d) => d.descriptor(),
            DeviceKind::QuantumRegister(d) => d.descriptor(),
            DeviceKind::PulseSequencer(d) => d.descriptor(),
            DeviceKind::QecModule(d) => d.descriptor(),
            DeviceKind::Simulated(d) => d.descriptor(),
        }
    }

    /// Never fails: on any internal inconsistency the last-known value
    /// would be returned instead (no variant here currently has a failure
    /// path, but this is the contract new drivers must keep).
    pub fn read_measurement(&self) -> Value {
        match self {
            DeviceKind::Thermocouple(d) => d.read_measurement(),
            DeviceKind::PhotonicDetector(d) => d.read_measurement(),
            DeviceKind::Ln2CoolingController(d) => d.read_measurement(),
            DeviceKind::LaserController(d) => d.read_measurement(),
            DeviceKind::AncillaQubit(d) => d.read_measurement(),
            DeviceKind::QuantumRegister(d) => d.read_measurement(),
            DeviceKind::PulseSequencer(d) => d.read_measurement(),
            DeviceKind::QecModule(d) => d.read_measurement(),
            DeviceKind::Simulated(d) => d.read_measurement(),
        }
    }

    pub fn perform_action(&self, cmd: &Value) {
        match self {
            DeviceKind::Thermocouple(d) => d.perform_action(cmd),
            DeviceKind::PhotonicDetector(d) => d.perform_action(cmd),
            DeviceKind::Ln2CoolingController(d) => d.perform_action(cmd),
            DeviceKind::LaserController(d) => d.perform_action(cmd),
            DeviceKind::AncillaQubit(d) => d.perform_action(cmd),
            DeviceKind::QuantumRegister(d) => d.perform_action(cmd),
            DeviceKind::PulseSequencer(d) => d.perform_action(cmd),
            DeviceKind::QecModule(d) => d.perform_action(cmd),
            DeviceKind::Simulated(d) => d.perform_action(cmd),
        }
    }

    /// Only `SimulatedDevice` has overrides to reload; every hardware
    /// driver reports `false` (nothing to do, not a failure).
    pub async fn trigger_reload_overrides(&self) -> bool {
        match self {
            DeviceKind::Simulated(d) => d.trigger_reload_overrides().await,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermocouple_zero_resets_offset() {
        let tc = DeviceKind::Thermocouple(Thermocouple::new("t1"));
        tc.perform_action(&serde_json::json!({ "zero": true }));
        let reading = tc.read_measurement();
        assert!(reading["temperature_C"].as_f64().unwrap() > 15.0);
    }

    #[test]
    fn descriptor_id_matches_device_id() {
        let tc = DeviceKind::Thermocouple(Thermocouple::new("sensor-1"));
        assert_eq!(tc.id(), "sensor-1");
        assert_eq!(tc.descriptor()["id"], "sensor-1");
    }

    #[test]
    fn quantum_register_apply_gate_flips_all_bits() {
        let reg = DeviceKind::QuantumRegister(QuantumRegister::new("qr1", 3));
        reg.perform_action(&serde_json::json!({ "apply_gate": true }));
        let reading = reg.read_measurement();
        let bits: Vec<i64> = reading["state_vector"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert_eq!(bits, vec![1, 1, 1]);
    }
}
