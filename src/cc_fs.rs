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

//! Thin wrappers around `std`/`tokio` filesystem calls, kept in one place so
//! every atomic-write call site looks the same. Schematics, parts overrides,
//! and the active-schematic marker all go through [`write_atomic`].

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub async fn read_txt(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {path:?}"))
}

pub async fn read_bytes(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {path:?}"))
}

pub fn create_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path).with_context(|| format!("creating directory {path:?}"))
}

/// Returns the modification time of `path`, if it exists.
pub fn modified(path: impl AsRef<Path>) -> Result<SystemTime> {
    let path = path.as_ref();
    Ok(std::fs::metadata(path)
        .with_context(|| format!("reading metadata for {path:?}"))?
        .modified()?)
}

pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    std::fs::canonicalize(path).with_context(|| format!("canonicalizing {path:?}"))
}

/// Writes `data` to `path` by first writing to a sibling temp file and
/// renaming it into place, so a reader never observes a partial write.
pub async fn write_atomic(path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    tokio::fs::write(&tmp_path, data.as_ref())
        .await
        .with_context(|| format!("writing temp file {tmp_path:?}"))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("renaming {tmp_path:?} to {path:?}"))?;
    Ok(())
}
