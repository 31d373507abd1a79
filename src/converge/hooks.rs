//! Hook-definition documents: Copilot `hooks` files and Claude `settings.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde_json::{Map, Value};

use super::{ConfigDocument, converge, merge_keyed};
use crate::error::ExitError;
use crate::providers::HooksKind;
use crate::workspace::RoleClass;

const COPILOT_AUTONOMOUS: &str = include_str!("../templates/hooks-copilot-autonomous.json");
const COPILOT_INTERACTIVE: &str = include_str!("../templates/hooks-copilot-interactive.json");
const CLAUDE_AUTONOMOUS: &str = include_str!("../templates/settings-claude-autonomous.json");
const CLAUDE_INTERACTIVE: &str = include_str!("../templates/settings-claude-interactive.json");
const OPENCODE_PLUGIN: &str = include_str!("../templates/opencode-plugin.js");

/// Key holding the event name → entry list mapping.
pub const HOOKS_KEY: &str = "hooks";

/// Required hook document for a provider and role class. `None` when the
/// provider has no mergeable hooks document.
pub fn required_fragment(kind: HooksKind, class: RoleClass) -> anyhow::Result<Option<Map<String, Value>>> {
    let source = match (kind, class) {
        (HooksKind::CopilotHooks, RoleClass::Autonomous) => COPILOT_AUTONOMOUS,
        (HooksKind::CopilotHooks, RoleClass::Interactive) => COPILOT_INTERACTIVE,
        (HooksKind::ClaudeSettings, RoleClass::Autonomous) => CLAUDE_AUTONOMOUS,
        (HooksKind::ClaudeSettings, RoleClass::Interactive) => CLAUDE_INTERACTIVE,
        (HooksKind::OpencodePlugin | HooksKind::None, _) => return Ok(None),
    };
    let value: Value = serde_json::from_str(source).context("parsing embedded hooks template")?;
    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => bail!("embedded hooks template is not an object"),
    }
}

/// Plugin source installed for providers that load a script instead of a
/// hooks document.
pub const fn opencode_plugin() -> &'static str {
    OPENCODE_PLUGIN
}

/// Location of a hooks file. An empty directory means the working directory
/// itself; an empty file name is a configuration error.
pub fn hooks_path(work_dir: &Path, dir: &str, file: &str) -> anyhow::Result<PathBuf> {
    if file.trim().is_empty() {
        return Err(ExitError::Config("hooks file name is empty".to_string()).into());
    }
    let dir = dir.trim();
    let base = if dir.is_empty() || dir == "." {
        work_dir.to_path_buf()
    } else {
        work_dir.join(dir)
    };
    Ok(base.join(file))
}

/// Empty document shaped like `required`: same version, no hooks.
fn default_shape(required: &Map<String, Value>) -> Map<String, Value> {
    let mut doc = Map::new();
    if let Some(version) = required.get("version") {
        doc.insert("version".to_string(), version.clone());
    }
    doc.insert(HOOKS_KEY.to_string(), Value::Object(Map::new()));
    doc
}

/// Merge the `required` hooks document into the file at `path`.
/// Returns whether the file was written.
pub fn ensure_hooks(path: &Path, required: &Map<String, Value>) -> anyhow::Result<bool> {
    let required_hooks = match required.get(HOOKS_KEY) {
        Some(Value::Object(hooks)) => hooks.clone(),
        Some(_) => bail!("required \"{HOOKS_KEY}\" is not an object"),
        None => Map::new(),
    };
    let required_version = required.get("version").and_then(Value::as_u64);

    converge(path, default_shape(required), |doc: &mut ConfigDocument| {
        let mut changed = false;
        if let Some(version) = required_version {
            changed |= doc.raise_version(version);
        }
        let hooks = doc.keyed_collection_mut(HOOKS_KEY)?;
        changed |= merge_keyed(hooks, &required_hooks)
            .with_context(|| format!("merging hooks into {}", path.display()))?;
        Ok(changed)
    })
}

/// Write `contents` to `path` unless the file already exists. Returns
/// whether the file was written.
pub fn write_once(path: &Path, contents: &str) -> anyhow::Result<bool> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "already present");
        return Ok(false);
    }
    super::atomic_write(path, contents.as_bytes())?;
    tracing::info!(path = %path.display(), "installed");
    Ok(true)
}
