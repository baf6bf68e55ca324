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

//! The simulator loader (§4.4): reads the on-disk device graph and parts
//! library, wires them into a [`PhysicsEngine`], and populates a
//! [`DeviceRegistry`] with one `SimulatedDevice` per graph node.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::cc_fs;
use crate::device::simulated::SimulatedDevice;
use crate::device::DeviceKind;
use crate::physics::PhysicsEngine;
use crate::registry::DeviceRegistry;

#[derive(Debug, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeviceGraph {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ComponentSpec {
    #[serde(default)]
    pub properties: Vec<String>,
}

pub type ComponentSchema = HashMap<String, ComponentSpec>;

pub async fn load_device_graph(path: impl AsRef<Path>) -> Result<DeviceGraph> {
    let raw = cc_fs::read_txt(path.as_ref())
        .await
        .with_context(|| format!("loading device graph {:?}", path.as_ref()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing device graph {:?}", path.as_ref()))
}

pub async fn load_component_schema(path: impl AsRef<Path>) -> Result<ComponentSchema> {
    let raw = cc_fs::read_txt(path.as_ref())
        .await
        .with_context(|| format!("loading component schema {:?}", path.as_ref()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing component schema {:?}", path.as_ref()))
}

/// Resolves the graph/schema to boot from: the active schematic if one is
/// set, otherwise the canonical `DeviceGraph.json`/`ComponentSchema.json`.
pub async fn load_graph_and_schema_for_boot(
    graph_dir: &Path,
) -> Result<(DeviceGraph, ComponentSchema)> {
    let resolved = crate::schematic::resolve_active_or_canonical(graph_dir).await?;
    let graph: DeviceGraph =
        serde_json::from_value(resolved.graph).context("parsing resolved device graph")?;
    let schema: ComponentSchema =
        serde_json::from_value(resolved.schema).context("parsing resolved component schema")?;
    Ok((graph, schema))
}

/// Builds a registry of `SimulatedDevice`s from a device graph, wiring
/// nodes and edges into `physics` as it goes. Nodes whose type isn't in
/// `schema` still get a device (with an empty metric list), per §4.4.
pub async fn build_simulated_registry(
    graph: &DeviceGraph,
    schema: &ComponentSchema,
    physics: Arc<PhysicsEngine>,
) -> Result<DeviceRegistry> {
    let registry = DeviceRegistry::new();

    for node in &graph.nodes {
        let part_key = node.part.as_deref().unwrap_or(&node.node_type);
        let part_spec = physics.part_spec(part_key).unwrap_or(Value::Object(Default::default()));
        physics.register_node(node.id.clone(), part_spec);

        let properties = schema
            .get(&node.node_type)
            .map(|spec| spec.properties.clone())
            .unwrap_or_default();

        if !schema.contains_key(&node.node_type) {
            log::warn!(
                "node {} has unknown type {:?}; registering with an empty metric list",
                node.id,
                node.node_type
            );
        }

        let device = SimulatedDevice::new(
            node.id.clone(),
            node.node_type.clone(),
            properties,
            Arc::clone(&physics),
        );
        registry.register_device(DeviceKind::Simulated(device)).await;
    }

    for edge in &graph.edges {
        physics.register_edge(edge.from.clone(), edge.to.clone());
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_thermocouple_node_registers_one_device() {
        let graph = DeviceGraph {
            nodes: vec![GraphNode {
                id: "s1".to_string(),
                node_type: "thermocouple".to_string(),
                label: None,
                part: None,
                x: None,
                y: None,
            }],
            edges: vec![],
        };
        let mut schema = ComponentSchema::new();
        schema.insert(
            "thermocouple".to_string(),
            ComponentSpec {
                properties: vec!["temperature_C".to_string()],
            },
        );
        let physics = Arc::new(PhysicsEngine::new());
        let registry = build_simulated_registry(&graph, &schema, physics).await.unwrap();
        assert_eq!(registry.len().await, 1);
        let descriptors = registry.get_descriptor_graph().await;
        assert_eq!(descriptors[0]["id"], "s1");
    }

    #[tokio::test]
    async fn unknown_node_type_gets_empty_metric_list() {
        let graph = DeviceGraph {
            nodes: vec![GraphNode {
                id: "mystery".to_string(),
                node_type: "unknown_widget".to_string(),
                label: None,
                part: None,
                x: None,
                y: None,
            }],
            edges: vec![],
        };
        let schema = ComponentSchema::new();
        let physics = Arc::new(PhysicsEngine::new());
        let registry = build_simulated_registry(&graph, &schema, physics).await.unwrap();
        let descriptors = registry.get_descriptor_graph().await;
        assert_eq!(descriptors[0]["metrics"].as_object().unwrap().len(), 0);
    }
}
