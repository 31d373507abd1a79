//! Trusted-folder lists for providers that gate tool use on directory trust.

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

use super::{ConfigDocument, converge};
use crate::config::RuntimeConfig;
use crate::error::ExitError;
use crate::providers::TrustKind;

pub const TRUSTED_FOLDERS_KEY: &str = "trusted_folders";

const CONFIG_FILE: &str = "config.json";
const COPILOT_DIR: &str = ".copilot";

/// Lexically clean a path: drop `.` components, resolve `..` against the
/// preceding component, and drop any trailing separator.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, cleaned form used for storage and duplicate detection.
pub fn normalize_trust_path(path: &Path) -> anyhow::Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ExitError::Config("trusted folder path is empty".to_string()).into());
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("could not determine current directory")?
            .join(path)
    };
    Ok(clean_path(&absolute))
}

/// The folder actually trusted for `work_dir`: a shared parent when the
/// working directory is nested under it, otherwise the directory itself.
pub fn trust_target(work_dir: &Path, shared_parent: Option<&Path>) -> anyhow::Result<PathBuf> {
    let work_dir = normalize_trust_path(work_dir)?;
    if let Some(parent) = shared_parent {
        let parent = normalize_trust_path(parent)?;
        if work_dir.starts_with(&parent) {
            return Ok(parent);
        }
    }
    Ok(work_dir)
}

/// Path of the trust document. An explicit directory wins, then
/// `$XDG_CONFIG_HOME/.copilot`, then `~/.copilot`.
pub fn config_path(config_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = config_dir.filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir.join(CONFIG_FILE));
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join(COPILOT_DIR).join(CONFIG_FILE));
    }
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(COPILOT_DIR).join(CONFIG_FILE))
}

fn default_shape() -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert(TRUSTED_FOLDERS_KEY.to_string(), Value::Array(Vec::new()));
    doc
}

/// Add `folder` to the trust document at `path` unless an equivalent entry
/// is already listed. Returns whether the file was written.
pub fn ensure_trusted_folder_at(path: &Path, folder: &Path) -> anyhow::Result<bool> {
    let target = normalize_trust_path(folder)?;
    let entry = target
        .to_str()
        .with_context(|| format!("trusted folder is not valid UTF-8: {}", target.display()))?
        .to_string();

    converge(path, default_shape(), |doc: &mut ConfigDocument| {
        let folders = doc.list_mut(TRUSTED_FOLDERS_KEY)?;
        let present = folders
            .iter()
            .filter_map(Value::as_str)
            .any(|existing| clean_path(Path::new(existing)) == target);
        if present {
            return Ok(false);
        }
        folders.push(Value::String(entry.clone()));
        Ok(true)
    })
}

/// Trust document for this runtime, or `None` when the provider has no
/// trust concept.
pub fn trust_document_path(rc: &RuntimeConfig, config_dir: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    let kind = rc.spec().map_or(TrustKind::None, |spec| spec.trust);
    if kind == TrustKind::None {
        return Ok(None);
    }
    let env_dir = rc.config_dir_from_env();
    config_path(config_dir.or(env_dir.as_deref())).map(Some)
}

/// Parse the trust document without writing it, so a broken file is
/// reported before anything else on disk changes.
pub fn check_trust_document(rc: &RuntimeConfig, config_dir: Option<&Path>) -> anyhow::Result<()> {
    let Some(path) = trust_document_path(rc, config_dir)? else {
        return Ok(());
    };
    let mut doc = ConfigDocument::read_or(&path, default_shape())?;
    doc.list_mut(TRUSTED_FOLDERS_KEY)?;
    Ok(())
}

/// Converge provider trust for a working directory. Returns the trusted
/// folder, or `None` when the provider has no trust concept.
pub fn ensure_trust(
    rc: &RuntimeConfig,
    work_dir: &Path,
    shared_parent: Option<&Path>,
    config_dir: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    if work_dir.as_os_str().is_empty() {
        return Ok(None);
    }
    let Some(path) = trust_document_path(rc, config_dir)? else {
        return Ok(None);
    };
    let target = trust_target(work_dir, shared_parent)?;
    ensure_trusted_folder_at(&path, &target)
        .with_context(|| format!("trusting {}", target.display()))?;
    Ok(Some(target))
}
