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

//! The physics engine: a pure function over a topology of parts, device
//! overrides, and controller actuator states, plus a background task that
//! watches the overrides file for hot reload. `SimulatedDevice` (see
//! `crate::device`) consults [`PhysicsEngine::get_cached_step`] on every
//! measurement read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::cc_fs;

/// One computed per-device result: `{temperature_K, noise_coeff}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceStep {
    pub temperature_k: f64,
    pub noise_coeff: f64,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    part_spec: Value,
}

#[derive(Debug, Default)]
struct Inner {
    parts_lib: HashMap<String, Value>,
    device_overrides: HashMap<String, Value>,
    nodes: HashMap<String, NodeEntry>,
    edges: Vec<(String, String)>,
    controller_states: HashMap<String, Value>,
    cached_state: HashMap<String, DeviceStep>,
    overrides_path: Option<PathBuf>,
    overrides_last_write: Option<SystemTime>,
}

/// Owns the whole simulated topology for a process. One instance shared via
/// `Arc` between the registry, the simulator loader, and every
/// `SimulatedDevice`/`Ln2CoolingController`.
pub struct PhysicsEngine {
    inner: Mutex<Inner>,
    cancel: CancellationToken,
    loop_started: Mutex<bool>,
    reload_notify: Notify,
}

impl Default for PhysicsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cancel: CancellationToken::new(),
            loop_started: Mutex::new(false),
            reload_notify: Notify::new(),
        }
    }

    /// Reads the stock parts library and, if present, a sibling
    /// `user_parts.json` whose entries override stock ones by name.
    pub async fn load_parts_library(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = cc_fs::read_txt(path)
            .await
            .with_context(|| format!("loading parts library {path:?}"))?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing parts library {path:?}"))?;
        let mut parts_lib = value_as_object(&parsed);

        if let Some(parent) = path.parent() {
            let user_parts_path = parent.join("user_parts.json");
            if let Ok(raw) = cc_fs::read_txt(&user_parts_path).await {
                match serde_json::from_str::<Value>(&raw) {
                    Ok(user_parts) => {
                        for (name, spec) in value_as_object(&user_parts) {
                            parts_lib.insert(name, spec);
                        }
                    }
                    Err(e) => {
                        log::warn!("ignoring malformed user_parts.json: {e}");
                    }
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.parts_lib = parts_lib;
        Ok(())
    }

    /// Looks up a part by name in the (stock + user-override) parts library.
    pub fn part_spec(&self, name: &str) -> Option<Value> {
        self.inner.lock().unwrap().parts_lib.get(name).cloned()
    }

    /// Reads the device-override file and remembers its path/mtime for the
    /// background hot-reload loop.
    pub async fn load_device_overrides(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        self.reload_overrides_from(&path).await?;
        let mut inner = self.inner.lock().unwrap();
        inner.overrides_path = Some(path);
        Ok(())
    }

    async fn reload_overrides_from(&self, path: &Path) -> Result<()> {
        let overrides: HashMap<String, Value> = match cc_fs::read_txt(path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parsing device overrides {path:?}"))?,
            Err(_) => HashMap::new(),
        };
        let mtime = cc_fs::modified(path).ok();
        let mut inner = self.inner.lock().unwrap();
        inner.device_overrides = overrides;
        inner.overrides_last_write = mtime;
        drop(inner);
        self.recompute();
        Ok(())
    }

    pub fn register_node(&self, id: impl Into<String>, part_spec: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(id.into(), NodeEntry { part_spec });
        drop(inner);
        self.recompute();
    }

    pub fn register_edge(&self, from: impl Into<String>, to: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.edges.push((from.into(), to.into()));
        drop(inner);
        self.recompute();
    }

    pub fn update_controller_state(&self, id: impl Into<String>, state: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.controller_states.insert(id.into(), state);
        drop(inner);
        self.recompute();
    }

    /// Pure: recomputes `{id -> {temperature_K, noise_coeff}}` from the
    /// current topology. Calling this repeatedly with unchanged inputs
    /// yields byte-identical output.
    pub fn compute_step(&self) -> HashMap<String, DeviceStep> {
        let inner = self.inner.lock().unwrap();
        compute_step_locked(&inner)
    }

    fn recompute(&self) {
        let mut inner = self.inner.lock().unwrap();
        let step = compute_step_locked(&inner);
        inner.cached_state = step;
    }

    pub fn get_cached_step(&self) -> HashMap<String, DeviceStep> {
        self.inner.lock().unwrap().cached_state.clone()
    }

    /// Spawns the mtime-watch/recompute worker. A second call while already
    /// running is a no-op.
    pub fn start_background_loop(self: &std::sync::Arc<Self>, interval: Duration) {
        let mut started = self.loop_started.lock().unwrap();
        if *started {
            return;
        }
        *started = true;
        drop(started);

        let engine = std::sync::Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.tick().await;
                    }
                }
            }
            log::debug!("physics background loop stopped");
        });
    }

    async fn tick(&self) {
        let path = { self.inner.lock().unwrap().overrides_path.clone() };
        let Some(path) = path else {
            self.recompute();
            return;
        };
        let current_mtime = cc_fs::modified(&path).ok();
        let last_write = { self.inner.lock().unwrap().overrides_last_write };
        if current_mtime.is_some() && current_mtime != last_write {
            if let Err(e) = self.reload_overrides_from(&path).await {
                log::warn!("physics overrides reload failed: {e}");
            }
            self.reload_notify.notify_waiters();
        } else {
            self.recompute();
        }
    }

    /// Signals the background worker and, best-effort, waits for it to stop.
    /// Safe to call multiple times, including from `Drop`.
    pub fn stop_background_loop(&self) {
        self.cancel.cancel();
    }

    /// Forces a reload regardless of mtime; used by `SimulatedDevice::trigger_reload_overrides`.
    pub async fn force_reload_overrides(&self) -> bool {
        let path = { self.inner.lock().unwrap().overrides_path.clone() };
        match path {
            Some(path) => self.reload_overrides_from(&path).await.is_ok(),
            None => false,
        }
    }
}

impl Drop for PhysicsEngine {
    fn drop(&mut self) {
        self.stop_background_loop();
    }
}

fn compute_step_locked(inner: &Inner) -> HashMap<String, DeviceStep> {
    let mut out = HashMap::with_capacity(inner.nodes.len());
    for (id, node) in &inner.nodes {
        let mut merged = node.part_spec.clone();
        if let Some(over) = inner.device_overrides.get(id) {
            deep_merge(&mut merged, over);
        }
        let specs = merged.get("specs").cloned().unwrap_or_else(|| Value::Object(Map::new()));
        let setpoint_default = specs
            .get("setpoint_default")
            .and_then(Value::as_f64)
            .unwrap_or(300.0);
        let noise_coeff = specs.get("noise_coeff").and_then(Value::as_f64).unwrap_or(0.01);

        let mut delta = 0.0f64;
        for (a, b) in &inner.edges {
            let other = if a == id {
                Some(b)
            } else if b == id {
                Some(a)
            } else {
                None
            };
            let Some(other) = other else { continue };
            if let Some(state) = inner.controller_states.get(other) {
                if let Some(flow) = state.get("flow_rate_Lmin").and_then(Value::as_f64) {
                    delta -= 0.5 * flow;
                }
            }
        }

        let temperature_k = (setpoint_default + delta).max(1.0);
        out.insert(
            id.clone(),
            DeviceStep {
                temperature_k,
                noise_coeff,
            },
        );
    }
    out
}

/// Recursive deep-merge: `override_val` wins for scalars/arrays; objects
/// merge key-by-key.
pub fn deep_merge(base: &mut Value, over: &Value) {
    match (base, over) {
        (Value::Object(base_map), Value::Object(over_map)) => {
            for (k, v) in over_map {
                match base_map.get_mut(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base_slot, over_val) => {
            *base_slot = over_val.clone();
        }
    }
}

fn value_as_object(v: &Value) -> HashMap<String, Value> {
    v.as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn part(setpoint: f64, noise: f64) -> Value {
        serde_json::json!({ "specs": { "setpoint_default": setpoint, "noise_coeff": noise } })
    }

    #[test]
    fn compute_step_is_pure() {
        let engine = PhysicsEngine::new();
        engine.register_node("d1", part(250.0, 0.02));
        let a = engine.compute_step();
        let b = engine.compute_step();
        assert_eq!(a["d1"].temperature_k, b["d1"].temperature_k);
        assert_eq!(a["d1"].noise_coeff, b["d1"].noise_coeff);
    }

    #[test]
    fn no_edges_uses_setpoint_default_clamped() {
        let engine = PhysicsEngine::new();
        engine.register_node("d1", part(0.3, 0.02));
        let step = engine.compute_step();
        assert_eq!(step["d1"].temperature_k, 1.0);
    }

    #[test]
    fn unknown_edge_endpoint_contributes_nothing() {
        let engine = PhysicsEngine::new();
        engine.register_node("d1", part(250.0, 0.02));
        engine.register_edge("d1", "ghost");
        let step = engine.compute_step();
        assert_eq!(step["d1"].temperature_k, 250.0);
    }

    #[test]
    fn controller_flow_rate_reduces_neighbor_temperature() {
        let engine = PhysicsEngine::new();
        engine.register_node("sensor", part(250.0, 0.02));
        engine.register_node("ctrl", part(250.0, 0.02));
        engine.register_edge("sensor", "ctrl");
        engine.update_controller_state("ctrl", serde_json::json!({ "flow_rate_Lmin": 10.0 }));
        let step = engine.compute_step();
        assert_eq!(step["sensor"].temperature_k, 245.0);
    }

    #[test]
    fn deep_merge_recurses_objects_and_replaces_scalars() {
        let mut base = serde_json::json!({
            "specs": { "setpoint_default": 250.0, "nested": { "a": 1, "b": 2 } }
        });
        let over = serde_json::json!({
            "specs": { "setpoint_default": 77.0, "nested": { "b": 99, "c": 3 } }
        });
        deep_merge(&mut base, &over);
        assert_eq!(base["specs"]["setpoint_default"], 77.0);
        assert_eq!(base["specs"]["nested"]["a"], 1);
        assert_eq!(base["specs"]["nested"]["b"], 99);
        assert_eq!(base["specs"]["nested"]["c"], 3);
    }

    #[tokio::test]
    async fn device_override_applies_on_top_of_parts_lib() {
        let engine = Arc::new(PhysicsEngine::new());
        engine.register_node("dev1", part(250.0, 0.02));
        {
            let mut inner = engine.inner.lock().unwrap();
            inner.device_overrides.insert(
                "dev1".to_string(),
                serde_json::json!({ "specs": { "setpoint_default": 77.0 } }),
            );
        }
        engine.recompute();
        let step = engine.get_cached_step();
        assert_eq!(step["dev1"].temperature_k, 77.0);
    }
}
