//! Resolving the exact command line that launches a role's agent.

use std::path::Path;

use anyhow::Context;

use crate::beads::RoleConfig;
use crate::config::RuntimeConfig;
use crate::error::ExitError;
use crate::template::{TokenValues, expand_role_pattern, render_initial_prompt};
use crate::workspace::{RoleIdentity, Workspace};

/// Command handed to the new session, plus what it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupCommand {
    pub command: String,
    /// Prompt baked into a generic command; `None` for stored templates.
    pub initial_prompt: Option<String>,
    /// True when the command came from the role's stored template.
    pub from_role_config: bool,
}

/// Quote for POSIX `sh` unless the word is plainly safe.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Identity environment for the agent process, lowest priority first.
pub fn agent_env(id: &RoleIdentity, ws: &Workspace, rc: &RuntimeConfig) -> Vec<(String, String)> {
    let actor = id.address();
    let mut env = vec![("GT_ROLE".to_string(), id.role().as_str().to_string())];
    if !id.role().is_town_level() {
        env.push(("GT_RIG".to_string(), id.rig().to_string()));
    }
    env.push(("GT_ROOT".to_string(), ws.town_root.display().to_string()));
    env.push(("BD_ACTOR".to_string(), actor.clone()));
    env.push(("GIT_AUTHOR_NAME".to_string(), actor));
    if let Some(ref var) = rc.session_id_env {
        env.push(("GT_SESSION_ID_ENV".to_string(), var.clone()));
    }
    env
}

/// Role-config environment with tokens expanded, in declaration order.
pub fn role_config_env(
    role_config: Option<&RoleConfig>,
    values: &TokenValues,
) -> anyhow::Result<Vec<(String, String)>> {
    let Some(role_config) = role_config else {
        return Ok(Vec::new());
    };
    role_config
        .env_vars
        .iter()
        .map(|(key, pattern)| {
            let value = expand_role_pattern(pattern, values)
                .with_context(|| format!("expanding role env var {key}"))?;
            Ok((key.clone(), value))
        })
        .collect()
}

/// `export K=V ... && exec <agent> <args> <prompt>`.
pub fn build_agent_command(
    rc: &RuntimeConfig,
    env: &[(String, String)],
    prompt: Option<&str>,
) -> anyhow::Result<String> {
    let command = rc.command.trim();
    if command.is_empty() {
        return Err(ExitError::Config(format!("agent {} has no command", rc.agent)).into());
    }
    let mut line = String::new();
    if !env.is_empty() {
        line.push_str("export");
        for (key, value) in env {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&shell_quote(value));
        }
        line.push_str(" && ");
    }
    line.push_str("exec ");
    line.push_str(&shell_quote(command));
    for arg in &rc.args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    if let Some(prompt) = prompt.filter(|p| !p.is_empty()) {
        line.push(' ');
        line.push_str(&shell_quote(prompt));
    }
    Ok(line)
}

/// Pick the launch command for a role.
///
/// An explicit agent override always builds the generic command for that
/// agent; a stored start command is only used without one.
pub fn resolve_start_command(
    id: &RoleIdentity,
    ws: &Workspace,
    rc: &RuntimeConfig,
    role_config: Option<&RoleConfig>,
    agent_override: Option<&str>,
) -> anyhow::Result<StartupCommand> {
    let role_config = role_config.filter(|_| agent_override.is_none_or(str::is_empty));
    if let Some(template) = role_config.and_then(|c| c.start_command.as_deref()) {
        let values = TokenValues::for_identity(id, &ws.town_root);
        let command = expand_role_pattern(template, &values)
            .with_context(|| format!("expanding start command for {}", id.role()))?;
        return Ok(StartupCommand {
            command,
            initial_prompt: None,
            from_role_config: true,
        });
    }

    let prompt = render_initial_prompt(id).context("rendering initial prompt")?;
    let command = build_agent_command(rc, &agent_env(id, ws, rc), Some(&prompt))
        .context("building startup command")?;
    Ok(StartupCommand {
        command,
        initial_prompt: Some(prompt),
        from_role_config: false,
    })
}

/// Name of the agent a command line will actually run: skips leading
/// `export ... &&` clauses, `exec`, and `env` options and assignments, then
/// takes the executable's base name.
pub fn infer_agent_from_command(command: &str) -> Option<String> {
    let mut rest = command.trim();
    while rest.starts_with("export ") {
        let Some(idx) = unquoted_and(rest) else {
            break;
        };
        rest = rest[idx + 2..].trim();
    }

    let mut fields = rest.split_whitespace().peekable();
    if fields.peek() == Some(&"exec") {
        fields.next();
    }
    if fields.peek() == Some(&"env") {
        fields.next();
        while let Some(field) = fields.peek() {
            if *field == "--" {
                fields.next();
                break;
            }
            if field.starts_with('-') || field.contains('=') {
                fields.next();
                continue;
            }
            break;
        }
    }

    let program = fields.next()?.trim_matches(|c| c == '\'' || c == '"');
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(ToString::to_string)
}

/// Byte offset of the first `&&` that is not inside quotes or escaped.
fn unquoted_and(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev_amp = false;
    for (i, c) in s.char_indices() {
        let amp = match (quote, c) {
            _ if escaped => {
                escaped = false;
                false
            }
            (Some('\''), '\'') | (Some('"'), '"') => {
                quote = None;
                false
            }
            (Some('\''), _) => false,
            (_, '\\') => {
                escaped = true;
                false
            }
            (Some(_), _) => false,
            (None, '\'' | '"') => {
                quote = Some(c);
                false
            }
            (None, '&') => {
                if prev_amp {
                    return Some(i - 1);
                }
                true
            }
            (None, _) => false,
        };
        prev_amp = amp;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_preset;
    use crate::workspace::Role;
    use std::path::PathBuf;

    fn ws() -> Workspace {
        Workspace {
            town_root: PathBuf::from("/town"),
            rig_path: PathBuf::from("/town/demo"),
            rig_name: "demo".into(),
        }
    }

    fn claude() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    fn witness() -> RoleIdentity {
        RoleIdentity::new(Role::Witness, "demo", None).unwrap()
    }

    #[test]
    fn quote_only_when_needed() {
        assert_eq!(shell_quote("claude"), "claude");
        assert_eq!(shell_quote("--model=fast"), "--model=fast");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn generic_command_exports_env_and_prompt() {
        let cmd = resolve_start_command(&witness(), &ws(), &claude(), None, None).unwrap();
        assert!(!cmd.from_role_config);
        assert!(cmd.command.starts_with("export GT_ROLE=witness GT_RIG=demo GT_ROOT=/town BD_ACTOR=demo/witness"));
        assert!(cmd.command.contains(" && exec claude --dangerously-skip-permissions 'I am Witness for demo."));
        assert!(cmd.initial_prompt.unwrap().contains("mol-witness-patrol"));
    }

    #[test]
    fn stored_template_is_expanded_verbatim() {
        let rc_cfg = RoleConfig {
            start_command: Some("cd {town}/{rig} && exec claude --role {role}".into()),
            env_vars: Vec::new(),
        };
        let cmd = resolve_start_command(&witness(), &ws(), &claude(), Some(&rc_cfg), None).unwrap();
        assert!(cmd.from_role_config);
        assert_eq!(cmd.command, "cd /town/demo && exec claude --role witness");
        assert!(cmd.initial_prompt.is_none());
    }

    #[test]
    fn override_ignores_stored_template() {
        let rc_cfg = RoleConfig {
            start_command: Some("exec claude --resume".into()),
            env_vars: Vec::new(),
        };
        let copilot = RuntimeConfig::from_preset("copilot", &builtin_preset("copilot").unwrap());
        let cmd =
            resolve_start_command(&witness(), &ws(), &copilot, Some(&rc_cfg), Some("copilot")).unwrap();
        assert!(!cmd.from_role_config);
        assert!(cmd.command.contains("exec copilot --allow-all-tools"));
        assert!(cmd.command.contains("GT_SESSION_ID_ENV=COPILOT_SESSION_ID"));
    }

    #[test]
    fn bad_template_is_an_error() {
        let rc_cfg = RoleConfig {
            start_command: Some("exec claude {bogus}".into()),
            env_vars: Vec::new(),
        };
        let err = resolve_start_command(&witness(), &ws(), &claude(), Some(&rc_cfg), None).unwrap_err();
        assert!(format!("{err:#}").contains("bogus"));
    }

    #[test]
    fn empty_agent_command_is_an_error() {
        let mut rc = claude();
        rc.command = String::new();
        assert!(resolve_start_command(&witness(), &ws(), &rc, None, None).is_err());
    }

    #[test]
    fn infer_agent_strips_wrappers() {
        let cases = [
            ("claude --resume", Some("claude")),
            ("exec /usr/local/bin/copilot --yolo", Some("copilot")),
            ("export A=1 B=2 && exec opencode", Some("opencode")),
            ("export A=1 && export B=2 && codex", Some("codex")),
            ("exec env -i FOO=bar gemini", Some("gemini")),
            ("env -- claude", Some("claude")),
            ("env FOO=bar", None),
            ("", None),
            ("export ONLY=1", Some("export")),
            ("export GT_ROOT='/a && b' && exec copilot", Some("copilot")),
            ("export X=\"q && r\" && exec opencode", Some("opencode")),
            (r"export N='it'\''s && x' && exec codex", Some("codex")),
            (r"export E=a\&\&b && exec gemini", Some("gemini")),
        ];
        for (command, expected) in cases {
            assert_eq!(infer_agent_from_command(command).as_deref(), expected, "{command}");
        }
    }

    #[test]
    fn infer_agent_with_quoted_town_path() {
        let mut town = ws();
        town.town_root = PathBuf::from("/srv/a && b");
        let rc = RuntimeConfig::from_preset("copilot", &builtin_preset("copilot").unwrap());
        let cmd = resolve_start_command(&witness(), &town, &rc, None, None).unwrap();
        assert!(cmd.command.contains("GT_ROOT='/srv/a && b'"));
        assert_eq!(infer_agent_from_command(&cmd.command).as_deref(), Some("copilot"));
    }

    #[test]
    fn infer_agent_on_generic_command_matches_agent() {
        let cmd = resolve_start_command(&witness(), &ws(), &claude(), None, None).unwrap();
        assert_eq!(infer_agent_from_command(&cmd.command).as_deref(), Some("claude"));
    }

    #[test]
    fn agent_env_for_polecat() {
        let id = RoleIdentity::new(Role::Polecat, "demo", Some("capable")).unwrap();
        let env = agent_env(&id, &ws(), &claude());
        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("GT_ROLE"), Some("polecat"));
        assert_eq!(get("BD_ACTOR"), Some("demo/polecats/capable"));
        assert_eq!(get("GT_SESSION_ID_ENV"), Some("CLAUDE_SESSION_ID"));
    }

    #[test]
    fn town_level_env_has_no_rig() {
        let id = RoleIdentity::new(Role::Mayor, "", None).unwrap();
        let env = agent_env(&id, &ws(), &claude());
        assert!(env.iter().all(|(k, _)| k != "GT_RIG"));
    }

    #[test]
    fn role_config_env_expands_tokens() {
        let cfg = RoleConfig {
            start_command: None,
            env_vars: vec![("PATROL".into(), "{rig}-{role}".into())],
        };
        let values = TokenValues::for_identity(&witness(), Path::new("/town"));
        let env = role_config_env(Some(&cfg), &values).unwrap();
        assert_eq!(env, vec![("PATROL".to_string(), "demo-witness".to_string())]);

        let bad = RoleConfig {
            start_command: None,
            env_vars: vec![("X".into(), "{nope}".into())],
        };
        assert!(role_config_env(Some(&bad), &values).is_err());
        assert!(role_config_env(None, &values).unwrap().is_empty());
    }
}
