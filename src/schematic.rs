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

//! Schematic persistence (§4.8): the canonical device graph, named
//! schematic snapshots, and the `active.txt` marker, all under
//! `<graph-dir>/shared/protocol/`. Every write goes through
//! [`cc_fs::write_atomic`]; every user-supplied name goes through
//! [`sanitize_name`] before it touches the filesystem.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::cc_fs;
use crate::hash::fnv1a64_hex;

const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;
const MAX_NAME_LEN: usize = 96;

static DISALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("static regex"));

pub fn protocol_dir(graph_dir: &Path) -> PathBuf {
    graph_dir.join("shared").join("protocol")
}

pub fn canonical_graph_path(graph_dir: &Path) -> PathBuf {
    protocol_dir(graph_dir).join("DeviceGraph.json")
}

pub fn canonical_schema_path(graph_dir: &Path) -> PathBuf {
    protocol_dir(graph_dir).join("ComponentSchema.json")
}

pub fn parts_library_path(graph_dir: &Path) -> PathBuf {
    protocol_dir(graph_dir).join("PartsLibrary.json")
}

pub fn device_overrides_path(graph_dir: &Path) -> PathBuf {
    protocol_dir(graph_dir).join("device_overrides.json")
}

pub fn schematics_dir(graph_dir: &Path) -> PathBuf {
    protocol_dir(graph_dir).join("schematics")
}

fn active_marker_path(graph_dir: &Path) -> PathBuf {
    schematics_dir(graph_dir).join("active.txt")
}

fn schematic_path(graph_dir: &Path, name: &str) -> PathBuf {
    schematics_dir(graph_dir).join(format!("{name}.json"))
}

/// Public wrapper over [`schematic_path`] for callers (the RPC dispatcher)
/// that need to report a resolved path without re-deriving it.
pub fn schematic_file_path(graph_dir: &Path, name: &str) -> PathBuf {
    schematic_path(graph_dir, &sanitize_name(name))
}

/// Filters to `[A-Za-z0-9_.-]`, trims leading/trailing dots, caps length,
/// and defaults to `"schematic"` when nothing survives. Idempotent:
/// `sanitize_name(sanitize_name(n)) == sanitize_name(n)`.
pub fn sanitize_name(raw: &str) -> String {
    let replaced = DISALLOWED_CHARS.replace_all(raw.trim(), "_").into_owned();
    let trimmed = replaced.trim_matches('.').to_string();
    let capped: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    if capped.is_empty() {
        "schematic".to_string()
    } else {
        capped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSchematic {
    pub format: String,
    pub version: u32,
    pub name: String,
    pub saved_ts_ms: i64,
    pub graph: Value,
    pub schema: Value,
}

pub struct SaveOutcome {
    pub name: String,
    pub path: PathBuf,
    pub graph_hash: String,
    pub schema_hash: String,
}

/// Confirms `path`, once canonicalized, lives inside `schematics_dir` — the
/// belt-and-suspenders check behind `sanitize_name` (§9).
fn assert_within_schematics_dir(graph_dir: &Path, path: &Path) -> Result<()> {
    let dir = schematics_dir(graph_dir);
    cc_fs::create_dir_all(&dir)?;
    let canon_dir = cc_fs::canonicalize(&dir)?;
    let parent = path.parent().unwrap_or(&dir);
    cc_fs::create_dir_all(parent)?;
    let canon_parent = cc_fs::canonicalize(parent)?;
    if canon_parent != canon_dir {
        bail!("refusing to write schematic outside schematics directory");
    }
    Ok(())
}

pub async fn save(
    graph_dir: &Path,
    name: &str,
    graph: Value,
    schema: Value,
    overwrite: bool,
    now_ms: i64,
) -> Result<SaveOutcome> {
    let name = sanitize_name(name);
    let path = schematic_path(graph_dir, &name);
    assert_within_schematics_dir(graph_dir, &path)?;

    if path.exists() && !overwrite {
        bail!("schematic {name} already exists (overwrite not set)");
    }

    let stored = StoredSchematic {
        format: "stonegate.schematic".to_string(),
        version: 1,
        name: name.clone(),
        saved_ts_ms: now_ms,
        graph: graph.clone(),
        schema: schema.clone(),
    };
    let serialized =
        serde_json::to_vec_pretty(&stored).context("serializing schematic payload")?;
    if serialized.len() > MAX_PAYLOAD_BYTES {
        bail!("schematic payload exceeds 8 MiB limit");
    }

    cc_fs::write_atomic(&path, &serialized).await?;

    Ok(SaveOutcome {
        name,
        path,
        graph_hash: fnv1a64_hex(&serde_json::to_vec(&graph).unwrap_or_default()),
        schema_hash: fnv1a64_hex(&serde_json::to_vec(&schema).unwrap_or_default()),
    })
}

pub async fn load(graph_dir: &Path, name: &str) -> Result<StoredSchematic> {
    let name = sanitize_name(name);
    let path = schematic_path(graph_dir, &name);
    let raw = cc_fs::read_bytes(&path)
        .await
        .with_context(|| format!("loading schematic {name}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing schematic {name}"))
}

pub struct SchematicListing {
    pub name: String,
    pub path: PathBuf,
    pub mtime_ms: i64,
}

pub async fn list(graph_dir: &Path) -> Result<Vec<SchematicListing>> {
    let dir = schematics_dir(graph_dir);
    cc_fs::create_dir_all(&dir)?;
    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .with_context(|| format!("reading schematics directory {dir:?}"))?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let mtime_ms = cc_fs::modified(&path)
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        out.push(SchematicListing {
            name: stem.to_string(),
            path,
            mtime_ms,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Reads `active.txt`; returns `None` if it doesn't exist or names a
/// schematic file that no longer exists.
pub async fn active_schematic_name(graph_dir: &Path) -> Option<String> {
    let marker = active_marker_path(graph_dir);
    let raw = cc_fs::read_txt(&marker).await.ok()?;
    let name = raw.trim();
    if name.is_empty() {
        return None;
    }
    let name = sanitize_name(name);
    if schematic_path(graph_dir, &name).exists() {
        Some(name)
    } else {
        None
    }
}

pub async fn set_active(graph_dir: &Path, name: &str) -> Result<String> {
    let name = sanitize_name(name);
    if !schematic_path(graph_dir, &name).exists() {
        bail!("unknown schematic {name}");
    }
    let marker = active_marker_path(graph_dir);
    cc_fs::write_atomic(&marker, name.as_bytes()).await?;
    Ok(name)
}

pub struct ResolvedGraph {
    pub graph: Value,
    pub schema: Value,
    pub graph_hash: String,
    pub schema_hash: String,
    pub active_schematic: Option<String>,
    pub using_active: bool,
}

/// If `active.txt` names an existing schematic, resolves to its
/// `{graph, schema}`; otherwise falls back to the canonical
/// `DeviceGraph.json`/`ComponentSchema.json` pair. Used by both
/// `backend.info` and `graph.get`.
pub async fn resolve_active_or_canonical(graph_dir: &Path) -> Result<ResolvedGraph> {
    if let Some(active) = active_schematic_name(graph_dir).await {
        let stored = load(graph_dir, &active).await?;
        let graph_bytes = serde_json::to_vec(&stored.graph).unwrap_or_default();
        let schema_bytes = serde_json::to_vec(&stored.schema).unwrap_or_default();
        return Ok(ResolvedGraph {
            graph: stored.graph,
            schema: stored.schema,
            graph_hash: fnv1a64_hex(&graph_bytes),
            schema_hash: fnv1a64_hex(&schema_bytes),
            active_schematic: Some(active),
            using_active: true,
        });
    }

    let graph_bytes = cc_fs::read_bytes(canonical_graph_path(graph_dir)).await?;
    let schema_bytes = cc_fs::read_bytes(canonical_schema_path(graph_dir)).await?;
    let graph: Value = serde_json::from_slice(&graph_bytes).context("parsing canonical graph")?;
    let schema: Value =
        serde_json::from_slice(&schema_bytes).context("parsing canonical schema")?;
    Ok(ResolvedGraph {
        graph,
        schema,
        graph_hash: fnv1a64_hex(&graph_bytes),
        schema_hash: fnv1a64_hex(&schema_bytes),
        active_schematic: None,
        using_active: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_slashes_and_spaces() {
        assert_eq!(sanitize_name(" my graph / v1 "), "my_graph___v1");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_name("../weird name!!.json");
        let twice = sanitize_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_empty_defaults_to_schematic() {
        assert_eq!(sanitize_name("   "), "schematic");
        assert_eq!(sanitize_name("..."), "schematic");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = serde_json::json!({"nodes": [{"id": "a", "type": "thermocouple"}], "edges": []});
        let schema = serde_json::json!({"thermocouple": {"properties": ["temperature_C"]}});
        let outcome = save(tmp.path(), "my graph", graph.clone(), schema.clone(), false, 1000)
            .await
            .unwrap();
        assert_eq!(outcome.name, "my_graph");

        let loaded = load(tmp.path(), "my graph").await.unwrap();
        assert_eq!(loaded.graph, graph);
        assert_eq!(loaded.schema, schema);
    }

    #[tokio::test]
    async fn save_refuses_overwrite_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = serde_json::json!({});
        let schema = serde_json::json!({});
        save(tmp.path(), "dup", graph.clone(), schema.clone(), false, 1000)
            .await
            .unwrap();
        let second = save(tmp.path(), "dup", graph, schema, false, 2000).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn set_active_then_active_schematic_name_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = serde_json::json!({});
        let schema = serde_json::json!({});
        save(tmp.path(), "chosen", graph, schema, false, 1000).await.unwrap();
        set_active(tmp.path(), "chosen").await.unwrap();
        let active = active_schematic_name(tmp.path()).await;
        assert_eq!(active, Some("chosen".to_string()));
    }
}
