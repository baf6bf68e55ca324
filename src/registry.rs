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

//! The device registry (§4.3): thread-safe owner of every `DeviceKind` in
//! the process. The registry's own lock guards only map operations — each
//! device is responsible for its own internal locking, so the registry
//! lock is never held across a device read/action.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::device::DeviceKind;

#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceKind>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_device(&self, device: DeviceKind) {
        let id = device.id().to_string();
        self.devices.write().await.insert(id, device);
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Looks up `id` and applies `f` to it under the registry's read lock.
    /// `f` must not block or await: the closure only does the synchronous
    /// device-level read/mutation, same contract devices themselves keep.
    pub async fn with_device<R>(&self, id: &str, f: impl FnOnce(&DeviceKind) -> R) -> Option<R> {
        let devices = self.devices.read().await;
        devices.get(id).map(f)
    }

    pub async fn get_descriptor_graph(&self) -> Vec<Value> {
        let devices = self.devices.read().await;
        devices.values().map(DeviceKind::descriptor).collect()
    }

    /// Each registered device contributes exactly one entry, regardless of
    /// concurrent actions landing mid-call (the per-device mutex makes
    /// each individual read atomic; the registry-wide result is simply the
    /// union of those atomic reads).
    pub async fn poll_all(&self) -> Vec<Value> {
        let devices = self.devices.read().await;
        devices
            .values()
            .map(|d| {
                json!({
                    "id": d.id(),
                    "measurement": {
                        "state": "nominal",
                        "measurements": d.read_measurement(),
                    }
                })
            })
            .collect()
    }

    /// Legacy `reload_overrides` control command: ask every device to
    /// reload its overrides file, returning how many actually had one.
    pub async fn trigger_reload_overrides_all(&self) -> usize {
        let devices = self.devices.read().await;
        let mut reloaded = 0;
        for device in devices.values() {
            if device.trigger_reload_overrides().await {
                reloaded += 1;
            }
        }
        reloaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::drivers::Thermocouple;

    #[tokio::test]
    async fn poll_all_entry_id_matches_device_id() {
        let registry = DeviceRegistry::new();
        registry
            .register_device(DeviceKind::Thermocouple(Thermocouple::new("s1")))
            .await;
        let updates = registry.poll_all().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["id"], "s1");
    }

    #[tokio::test]
    async fn with_device_returns_none_for_unknown_id() {
        let registry = DeviceRegistry::new();
        let result = registry.with_device("missing", |d| d.id().to_string()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn descriptor_graph_has_one_entry_per_device() {
        let registry = DeviceRegistry::new();
        registry
            .register_device(DeviceKind::Thermocouple(Thermocouple::new("s1")))
            .await;
        registry
            .register_device(DeviceKind::Thermocouple(Thermocouple::new("s2")))
            .await;
        assert_eq!(registry.get_descriptor_graph().await.len(), 2);
    }
}
