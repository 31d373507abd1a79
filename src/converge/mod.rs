//! Idempotent, additive-only convergence of on-disk JSON documents.
//!
//! A document is read (or defaulted), required entries are appended to its
//! managed collections when no structurally equal entry exists, and the
//! file is rewritten atomically only when something changed. Unknown keys
//! and existing entries are never removed or reordered.

pub mod hooks;
pub mod trust;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` via a tempfile in the same directory.
/// Readers see either the old contents or the new, never a partial file.
pub fn atomic_write(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(data)
        .with_context(|| format!("writing temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// An on-disk JSON object with pass-through fields and managed collections.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    path: PathBuf,
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Read `path`. A missing or blank file yields `default`; a malformed
    /// file is an error, never silently reset.
    pub fn read_or(path: &Path, default: Map<String, Value>) -> anyhow::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    root: default,
                });
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("reading {}", path.display())));
            }
        };
        if contents.trim().is_empty() {
            return Ok(Self {
                path: path.to_path_buf(),
                root: default,
            });
        }
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        let Value::Object(root) = value else {
            bail!("parsing {}: top level is not an object", path.display());
        };
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Numeric schema version, if present.
    pub fn version(&self) -> Option<u64> {
        self.root.get("version").and_then(Value::as_u64)
    }

    /// Raise an unset or lower version to `required`. Returns true if raised.
    pub fn raise_version(&mut self, required: u64) -> bool {
        if self.version().is_some_and(|v| v >= required) {
            return false;
        }
        self.root.insert("version".to_string(), Value::from(required));
        true
    }

    /// The named-list collection under `key` (`hooks`), created if absent.
    pub fn keyed_collection_mut(&mut self, key: &str) -> anyhow::Result<&mut Map<String, Value>> {
        let path = self.path.display().to_string();
        let slot = self
            .root
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        slot.as_object_mut()
            .with_context(|| format!("{path}: \"{key}\" is not an object"))
    }

    /// The list collection under `key` (`trusted_folders`), created if absent.
    pub fn list_mut(&mut self, key: &str) -> anyhow::Result<&mut Vec<Value>> {
        let path = self.path.display().to_string();
        let slot = self
            .root
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        slot.as_array_mut()
            .with_context(|| format!("{path}: \"{key}\" is not a list"))
    }

    /// Write the whole document back with 2-space indentation.
    pub fn write(&self) -> anyhow::Result<()> {
        let mut data = serde_json::to_vec_pretty(&self.root)
            .with_context(|| format!("encoding {}", self.path.display()))?;
        data.push(b'\n');
        atomic_write(&self.path, &data)
    }
}

/// Append each required entry that has no structurally equal entry in
/// `existing`. Returns true if anything was appended.
pub fn merge_entries(existing: &mut Vec<Value>, required: &[Value]) -> bool {
    let mut changed = false;
    for entry in required {
        if !existing.iter().any(|candidate| candidate == entry) {
            existing.push(entry.clone());
            changed = true;
        }
    }
    changed
}

/// Merge every named list of `required` into `collections`.
pub fn merge_keyed(
    collections: &mut Map<String, Value>,
    required: &Map<String, Value>,
) -> anyhow::Result<bool> {
    let mut changed = false;
    for (name, entries) in required {
        let Some(entries) = entries.as_array() else {
            bail!("required \"{name}\" is not a list");
        };
        if entries.is_empty() {
            continue;
        }
        let slot = collections
            .entry(name.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        let Some(list) = slot.as_array_mut() else {
            bail!("existing \"{name}\" is not a list");
        };
        changed |= merge_entries(list, entries);
    }
    Ok(changed)
}

/// Read `path`, apply `update`, and write back only when it reports a change.
/// Returns whether the file was written.
pub fn converge(
    path: &Path,
    default: Map<String, Value>,
    update: impl FnOnce(&mut ConfigDocument) -> anyhow::Result<bool>,
) -> anyhow::Result<bool> {
    let mut doc = ConfigDocument::read_or(path, default)?;
    if !update(&mut doc)? {
        tracing::debug!(path = %path.display(), "already converged");
        return Ok(false);
    }
    doc.write()?;
    tracing::info!(path = %path.display(), "converged");
    Ok(true)
}
