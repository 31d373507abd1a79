//! Stored role configuration, read from role beads through the `bd` CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::subprocess::{Tool, is_not_found};

/// Escape hatch that keeps `bd` from talking to its background daemon.
pub const NO_DAEMON_ENV: &str = "BEADS_NO_DAEMON";

const BD_TIMEOUT: Duration = Duration::from_secs(10);

/// Start command and environment patterns declared on a role bead.
/// Values may contain role-pattern tokens (`{rig}`, `{town}`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleConfig {
    pub start_command: Option<String>,
    /// In declaration order; later duplicates win when applied.
    pub env_vars: Vec<(String, String)>,
}

impl RoleConfig {
    pub fn is_empty(&self) -> bool {
        self.start_command.is_none() && self.env_vars.is_empty()
    }

    /// Parse `start_command:` and `env_var: KEY=VALUE` lines from a bead
    /// description. Other lines are ignored.
    pub fn parse(description: &str) -> Self {
        let mut config = Self::default();
        for line in description.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "start_command" if !value.is_empty() => {
                    config.start_command = Some(value.to_string());
                }
                "env_var" => {
                    if let Some((k, v)) = value.split_once('=') {
                        let k = k.trim();
                        if !k.is_empty() {
                            config.env_vars.push((k.to_string(), v.trim().to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        config
    }
}

/// Where role configuration comes from.
pub trait RoleConfigSource {
    /// Role config stored under `bead_id`, or `None` when there is none.
    fn get_role_config(&self, bead_id: &str) -> anyhow::Result<Option<RoleConfig>>;
}

/// Reads role beads with `bd show <id> --json`.
#[derive(Debug, Clone)]
pub struct BdCli {
    town_root: PathBuf,
}

impl BdCli {
    pub fn new(town_root: &Path) -> Self {
        Self {
            town_root: town_root.to_path_buf(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShowOutput {
    Many(Vec<BeadRecord>),
    One(BeadRecord),
}

#[derive(Debug, Deserialize)]
struct BeadRecord {
    #[serde(default)]
    description: String,
}

impl RoleConfigSource for BdCli {
    fn get_role_config(&self, bead_id: &str) -> anyhow::Result<Option<RoleConfig>> {
        let mut tool = Tool::new("bd")
            .args(&["show", bead_id, "--json"])
            .current_dir(&self.town_root)
            .timeout(BD_TIMEOUT);
        if let Ok(value) = std::env::var(NO_DAEMON_ENV) {
            tool = tool.env(NO_DAEMON_ENV, &value);
        }

        let output = match tool.run() {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => {
                tracing::debug!(bead_id, "bd not installed, no role config");
                return Ok(None);
            }
            Err(e) => return Err(e.context(format!("reading role bead {bead_id}"))),
        };
        if !output.success() {
            let stderr = output.stderr.to_ascii_lowercase();
            if stderr.contains("not found") || stderr.contains("no issue") {
                tracing::debug!(bead_id, "role bead not found");
                return Ok(None);
            }
            anyhow::bail!(
                "bd show {bead_id} failed (exit {}): {}",
                output.exit_code,
                output.stderr.trim()
            );
        }
        parse_show_output(&output.stdout).with_context(|| format!("reading role bead {bead_id}"))
    }
}

fn parse_show_output(stdout: &str) -> anyhow::Result<Option<RoleConfig>> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let parsed: ShowOutput = serde_json::from_str(stdout).context("parsing bd show output")?;
    let record = match parsed {
        ShowOutput::One(record) => Some(record),
        ShowOutput::Many(records) => records.into_iter().next(),
    };
    Ok(record
        .map(|r| RoleConfig::parse(&r.description))
        .filter(|c| !c.is_empty()))
}

/// Fixed role config, for callers that already know it (and tests).
#[derive(Debug, Clone, Default)]
pub struct StaticRoleConfig(pub Option<RoleConfig>);

impl RoleConfigSource for StaticRoleConfig {
    fn get_role_config(&self, _bead_id: &str) -> anyhow::Result<Option<RoleConfig>> {
        Ok(self.0.clone())
    }
}
