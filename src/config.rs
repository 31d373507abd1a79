use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;
use crate::providers::{self, HooksKind, ProviderId, ProviderSpec, ReadyDefaults};
use crate::workspace::{Role, Workspace};

/// Settings file name constants, relative to a town or rig root.
pub const SETTINGS_TOML: &str = "settings/config.toml";
pub const SETTINGS_JSON: &str = "settings/config.json";

/// Agent used when nothing else is configured.
pub const DEFAULT_AGENT: &str = "claude";

/// Find the settings file under `root`, preferring TOML over JSON.
/// Returns None if neither exists.
pub fn find_settings(root: &Path) -> Option<PathBuf> {
    let toml_path = root.join(SETTINGS_TOML);
    if toml_path.exists() {
        return Some(toml_path);
    }
    let json_path = root.join(SETTINGS_JSON);
    if json_path.exists() {
        return Some(json_path);
    }
    None
}

/// Town-wide agent settings (`<town>/settings/config.toml`).
///
/// Fields are snake_case with `alias` attributes so camelCase JSON written
/// by older tooling still loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TownSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Agent for roles without a specific assignment.
    #[serde(default, alias = "defaultAgent", skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
    /// Role name → agent name.
    #[serde(default, alias = "roleAgents")]
    pub role_agents: BTreeMap<String, String>,
    /// Custom agent definitions, by name.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentPreset>,
}

/// Per-rig overrides (`<rig>/settings/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RigSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, alias = "roleAgents")]
    pub role_agents: BTreeMap<String, String>,
}

/// A launchable agent definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AgentPreset {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Provider whose integration rules apply; inferred from `command` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, alias = "readyPromptPrefix", skip_serializing_if = "Option::is_none")]
    pub ready_prompt_prefix: Option<String>,
    #[serde(default, alias = "readyDelayMs", skip_serializing_if = "Option::is_none")]
    pub ready_delay_ms: Option<u64>,
    #[serde(default, alias = "sessionIdEnv", skip_serializing_if = "Option::is_none")]
    pub session_id_env: Option<String>,
    #[serde(default, alias = "configDirEnv", skip_serializing_if = "Option::is_none")]
    pub config_dir_env: Option<String>,
    #[serde(default, alias = "hooksDir", skip_serializing_if = "Option::is_none")]
    pub hooks_dir: Option<String>,
    #[serde(default, alias = "hooksFile", skip_serializing_if = "Option::is_none")]
    pub hooks_file: Option<String>,
}

fn default_version() -> u32 {
    1
}

/// Built-in agent presets.
pub fn builtin_preset(name: &str) -> Option<AgentPreset> {
    let id = ProviderId::parse(name)?;
    let args: &[&str] = match id {
        ProviderId::Claude => &["--dangerously-skip-permissions"],
        ProviderId::Copilot => &["--allow-all-tools"],
        ProviderId::Codex => &["--dangerously-bypass-approvals-and-sandbox"],
        ProviderId::Gemini => &["--approval-mode", "yolo"],
        ProviderId::Opencode => &[],
    };
    Some(AgentPreset {
        command: id.as_str().to_string(),
        args: args.iter().map(ToString::to_string).collect(),
        provider: Some(id.as_str().to_string()),
        ..AgentPreset::default()
    })
}

/// Readiness settings for the session pane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessSettings {
    pub ready_prompt_prefix: Option<String>,
    pub ready_delay_ms: u64,
}

/// Where a provider reads its hook definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HooksSettings {
    pub kind: HooksKind,
    pub dir: String,
    pub file: String,
}

/// Per-provider settings for one invocation.
///
/// Built fresh each time; the only post-construction change is filling in
/// provider defaults (see [`RuntimeConfig::with_ready_defaults`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Agent name the config was resolved from (`claude`, or a custom name).
    pub agent: String,
    pub provider: Option<ProviderId>,
    pub command: String,
    pub args: Vec<String>,
    pub readiness: ReadinessSettings,
    pub session_id_env: Option<String>,
    pub config_dir_env: Option<String>,
    pub hooks: Option<HooksSettings>,
}

impl RuntimeConfig {
    /// Build from a preset, filling provider defaults for unset fields.
    pub fn from_preset(agent: &str, preset: &AgentPreset) -> Self {
        let provider = preset
            .provider
            .as_deref()
            .and_then(ProviderId::parse)
            .or_else(|| ProviderId::from_command(&preset.command));
        let spec = provider.map(providers::lookup);

        let hooks = spec.and_then(|spec| {
            (spec.hooks != HooksKind::None).then(|| HooksSettings {
                kind: spec.hooks,
                dir: preset
                    .hooks_dir
                    .clone()
                    .unwrap_or_else(|| spec.hooks_dir.to_string()),
                file: preset
                    .hooks_file
                    .clone()
                    .unwrap_or_else(|| spec.hooks_file.to_string()),
            })
        });

        Self {
            agent: agent.to_string(),
            provider,
            command: preset.command.clone(),
            args: preset.args.clone(),
            readiness: ReadinessSettings {
                ready_prompt_prefix: preset.ready_prompt_prefix.clone(),
                ready_delay_ms: preset.ready_delay_ms.unwrap_or(0),
            },
            session_id_env: preset
                .session_id_env
                .clone()
                .or_else(|| spec.and_then(|s| s.session_id_env).map(String::from)),
            config_dir_env: preset
                .config_dir_env
                .clone()
                .or_else(|| spec.and_then(|s| s.config_dir_env).map(String::from)),
            hooks,
        }
    }

    /// Capabilities of the resolved provider.
    pub fn spec(&self) -> Option<&'static ProviderSpec> {
        self.provider.map(providers::lookup)
    }

    /// Provider readiness defaults, when the provider needs special handling.
    pub fn ready_defaults(&self) -> Option<ReadyDefaults> {
        self.spec().and_then(|spec| spec.ready)
    }

    /// Copy with an unset ready marker and zero delay replaced by the
    /// provider's defaults.
    #[must_use]
    pub fn with_ready_defaults(&self, defaults: ReadyDefaults) -> Self {
        let mut ready = self.clone();
        if ready
            .readiness
            .ready_prompt_prefix
            .as_deref()
            .is_none_or(str::is_empty)
        {
            ready.readiness.ready_prompt_prefix = Some(defaults.prompt_prefix.to_string());
        }
        if ready.readiness.ready_delay_ms == 0 {
            ready.readiness.ready_delay_ms = defaults.delay_ms;
        }
        ready
    }

    /// Directory named by the provider's config-dir variable, if set.
    pub fn config_dir_from_env(&self) -> Option<PathBuf> {
        let var = self.config_dir_env.as_deref()?;
        std::env::var_os(var)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let preset = builtin_preset(DEFAULT_AGENT).unwrap_or_default();
        Self::from_preset(DEFAULT_AGENT, &preset)
    }
}

fn load_settings<T: serde::de::DeserializeOwned + Default>(root: &Path) -> anyhow::Result<T> {
    let Some(path) = find_settings(root) else {
        return Ok(T::default());
    };
    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let parsed = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&contents).map_err(|e| e.to_string())
    } else {
        toml::from_str(&contents).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| ExitError::Config(format!("invalid {}: {e}", path.display())).into())
}

impl TownSettings {
    /// Load from `<town>/settings/`, or defaults when no file exists.
    pub fn load(town_root: &Path) -> anyhow::Result<Self> {
        load_settings(town_root)
    }

    /// Serialize to a TOML string with helpful comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing town settings to TOML")?;
        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# Gas Town agent settings\n# Resolution: --agent, rig role_agents, town role_agents, rig agent, default_agent\n\n");
        if let Some(tbl) = doc.get_mut("role_agents").and_then(|i| i.as_table_mut()) {
            tbl.decor_mut()
                .set_prefix("\n# Per-role agent assignments\n");
        }
        if let Some(tbl) = doc.get_mut("agents").and_then(|i| i.as_table_mut()) {
            tbl.decor_mut()
                .set_prefix("\n# Custom agent definitions\n");
        }
        Ok(doc.to_string())
    }

    /// Write TOML settings under `town_root`.
    pub fn save(&self, town_root: &Path) -> anyhow::Result<()> {
        let path = town_root.join(SETTINGS_TOML);
        crate::converge::atomic_write(&path, self.to_toml()?.as_bytes())
    }
}

impl RigSettings {
    pub fn load(rig_path: &Path) -> anyhow::Result<Self> {
        load_settings(rig_path)
    }
}

/// Settings for one town/rig pair.
#[derive(Debug, Clone, Default)]
pub struct AgentSettings {
    pub town: TownSettings,
    pub rig: RigSettings,
}

impl AgentSettings {
    pub fn load(ws: &Workspace) -> anyhow::Result<Self> {
        let town = TownSettings::load(&ws.town_root)?;
        let rig = if ws.rig_path == ws.town_root {
            RigSettings::default()
        } else {
            RigSettings::load(&ws.rig_path)?
        };
        Ok(Self { town, rig })
    }

    /// Agent name configured for `role`, without an explicit override.
    pub fn agent_for_role(&self, role: Role) -> String {
        let key = role.as_str();
        self.rig
            .role_agents
            .get(key)
            .or_else(|| self.town.role_agents.get(key))
            .or(self.rig.agent.as_ref())
            .or(self.town.default_agent.as_ref())
            .cloned()
            .unwrap_or_else(|| DEFAULT_AGENT.to_string())
    }

    /// Look up an agent by name: custom definitions first, then built-ins,
    /// then a command path whose base name is a built-in.
    pub fn preset(&self, name: &str) -> Option<AgentPreset> {
        if let Some(custom) = self.town.agents.get(name) {
            return Some(custom.clone());
        }
        if let Some(builtin) = builtin_preset(name) {
            return Some(builtin);
        }
        let id = ProviderId::from_command(name)?;
        builtin_preset(id.as_str()).map(|preset| AgentPreset {
            command: name.to_string(),
            ..preset
        })
    }

    /// Runtime config for an explicitly requested agent. Unknown names are
    /// an error.
    pub fn resolve_override(&self, agent: &str) -> anyhow::Result<RuntimeConfig> {
        let preset = self
            .preset(agent)
            .ok_or_else(|| ExitError::Config(format!("unknown agent: {agent}")))?;
        Ok(RuntimeConfig::from_preset(agent, &preset))
    }

    /// Runtime config for a role. A misconfigured agent name falls back to
    /// the default agent with a warning.
    pub fn resolve_role(&self, role: Role) -> RuntimeConfig {
        let agent = self.agent_for_role(role);
        if let Some(preset) = self.preset(&agent) {
            return RuntimeConfig::from_preset(&agent, &preset);
        }
        tracing::warn!(%role, %agent, "unknown agent in settings, using {DEFAULT_AGENT}");
        RuntimeConfig::default()
    }

    /// Override when given, else the role's configured agent.
    pub fn resolve(&self, role: Role, agent_override: Option<&str>) -> anyhow::Result<RuntimeConfig> {
        match agent_override.filter(|a| !a.is_empty()) {
            Some(agent) => self.resolve_override(agent),
            None => Ok(self.resolve_role(role)),
        }
    }
}
