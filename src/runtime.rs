//! Per-provider runtime integration: hook settings, startup fallback, and
//! session-id discovery.

use std::path::Path;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::converge::hooks::{ensure_hooks, hooks_path, opencode_plugin, required_fragment, write_once};
use crate::providers::HooksKind;
use crate::readiness::{Clock, wait_for_provider_ready};
use crate::session::SessionBackend;
use crate::workspace::{Role, RoleClass};

/// Names the variable that holds the provider's session id.
pub const SESSION_ID_ENV_VAR: &str = "GT_SESSION_ID_ENV";
/// Session-id variable used when no indirection is set.
pub const DEFAULT_SESSION_ID_ENV: &str = "CLAUDE_SESSION_ID";

const FALLBACK_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Install or converge the provider's hook settings under `work_dir`.
/// Returns whether anything was written.
pub fn ensure_settings_for_role(work_dir: &Path, role: Role, rc: &RuntimeConfig) -> anyhow::Result<bool> {
    let Some(ref hooks) = rc.hooks else {
        return Ok(false);
    };
    let path = hooks_path(work_dir, &hooks.dir, &hooks.file)?;
    match hooks.kind {
        HooksKind::None => Ok(false),
        HooksKind::OpencodePlugin => write_once(&path, opencode_plugin()),
        kind @ (HooksKind::ClaudeSettings | HooksKind::CopilotHooks) => {
            let Some(required) = required_fragment(kind, role.class())? else {
                return Ok(false);
            };
            ensure_hooks(&path, &required)
        }
    }
}

/// Whether the provider's hooks file can be found. Absolute locations are
/// checked as-is; Copilot looks relative to the working directory, other
/// providers relative to the home directory.
pub fn hooks_available(rc: &RuntimeConfig, work_dir: &Path, home: Option<&Path>) -> bool {
    let Some(ref hooks) = rc.hooks else {
        return false;
    };
    if hooks.dir.is_empty() || hooks.file.is_empty() {
        return false;
    }
    let relative = Path::new(&hooks.dir).join(&hooks.file);
    if relative.is_absolute() {
        return relative.exists();
    }
    if hooks.kind == HooksKind::CopilotHooks {
        return work_dir.join(&relative).exists();
    }
    home.is_some_and(|home| home.join(&relative).exists())
}

/// Commands to type into a fresh session when the provider will not run
/// lifecycle hooks itself. Empty when hooks take care of it.
pub fn startup_fallback_commands(role: Role, rc: &RuntimeConfig, work_dir: &Path) -> Vec<String> {
    let always_loaded = rc.spec().is_some_and(|spec| spec.hooks_always_loaded);
    fallback_commands(role, rc, always_loaded, work_dir, dirs::home_dir().as_deref())
}

fn fallback_commands(
    role: Role,
    rc: &RuntimeConfig,
    always_loaded: bool,
    work_dir: &Path,
    home: Option<&Path>,
) -> Vec<String> {
    let has_hooks = rc.hooks.as_ref().is_some_and(|h| h.kind != HooksKind::None);
    if has_hooks && (always_loaded || hooks_available(rc, work_dir, home)) {
        return Vec::new();
    }

    let mut command = String::from("gt prime");
    if role.class() == RoleClass::Autonomous {
        command.push_str(" && gt mail check --inject");
    }
    command.push_str(" && gt nudge deacon session-started");
    vec![command]
}

/// Type the startup fallback commands into the session, after the
/// provider's prompt is up. Returns how many were sent.
pub fn run_startup_fallback(
    backend: &dyn SessionBackend,
    clock: &dyn Clock,
    session: &str,
    role: Role,
    rc: &RuntimeConfig,
    work_dir: &Path,
) -> anyhow::Result<usize> {
    let commands = startup_fallback_commands(role, rc, work_dir);
    if commands.is_empty() {
        return Ok(0);
    }
    wait_for_provider_ready(backend, clock, session, rc, FALLBACK_READY_TIMEOUT);
    for command in &commands {
        backend.nudge_session(session, command)?;
    }
    Ok(commands.len())
}

/// Session id of the current agent, following `GT_SESSION_ID_ENV` to the
/// provider's variable and falling back to `CLAUDE_SESSION_ID`.
pub fn session_id_from_env() -> Option<String> {
    session_id_from(|key| std::env::var(key).ok())
}

fn session_id_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
    non_empty(SESSION_ID_ENV_VAR)
        .and_then(|var| non_empty(var.as_str()))
        .or_else(|| non_empty(DEFAULT_SESSION_ID_ENV))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_preset;
    use crate::readiness::fake_clock::FakeClock;
    use crate::session::fake::FakeBackend;
    use std::collections::HashMap;

    fn rc(agent: &str) -> RuntimeConfig {
        RuntimeConfig::from_preset(agent, &builtin_preset(agent).unwrap())
    }

    #[test]
    fn claude_settings_written_once() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_settings_for_role(dir.path(), Role::Witness, &rc("claude")).unwrap());
        let settings = dir.path().join(".claude/settings.json");
        let text = std::fs::read_to_string(&settings).unwrap();
        assert!(text.contains("gt mail check --inject"));
        assert!(!ensure_settings_for_role(dir.path(), Role::Witness, &rc("claude")).unwrap());
    }

    #[test]
    fn copilot_hooks_by_role_class() {
        let dir = tempfile::tempdir().unwrap();
        ensure_settings_for_role(dir.path(), Role::Crew, &rc("copilot")).unwrap();
        let path = dir.path().join(".github/hooks/gastown.json");
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["version"], 1);
        assert_eq!(doc["hooks"]["sessionStart"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn opencode_plugin_and_noop_providers() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_settings_for_role(dir.path(), Role::Polecat, &rc("opencode")).unwrap());
        assert!(dir.path().join(".opencode/plugin/gastown.js").exists());
        assert!(!ensure_settings_for_role(dir.path(), Role::Polecat, &rc("codex")).unwrap());
    }

    #[test]
    fn fallback_commands_by_provider() {
        let dir = tempfile::tempdir().unwrap();
        assert!(startup_fallback_commands(Role::Witness, &rc("claude"), dir.path()).is_empty());
        assert!(startup_fallback_commands(Role::Witness, &rc("opencode"), dir.path()).is_empty());

        let codex = startup_fallback_commands(Role::Witness, &rc("codex"), dir.path());
        assert_eq!(
            codex,
            vec!["gt prime && gt mail check --inject && gt nudge deacon session-started"]
        );
        let mayor = startup_fallback_commands(Role::Mayor, &rc("codex"), dir.path());
        assert_eq!(mayor, vec!["gt prime && gt nudge deacon session-started"]);
    }

    #[test]
    fn copilot_fallback_depends_on_hooks_file() {
        let dir = tempfile::tempdir().unwrap();
        let copilot = rc("copilot");
        assert_eq!(startup_fallback_commands(Role::Polecat, &copilot, dir.path()).len(), 1);

        ensure_settings_for_role(dir.path(), Role::Polecat, &copilot).unwrap();
        assert!(hooks_available(&copilot, dir.path(), None));
        assert!(startup_fallback_commands(Role::Polecat, &copilot, dir.path()).is_empty());
    }

    #[test]
    fn fallback_follows_always_loaded_flag() {
        let home_dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let claude = rc("claude");
        let home = Some(home_dir.path());

        assert!(fallback_commands(Role::Witness, &claude, true, work.path(), home).is_empty());
        // Not always loaded: only skipped once the settings file exists.
        assert_eq!(fallback_commands(Role::Witness, &claude, false, work.path(), home).len(), 1);
        let settings = home_dir.path().join(".claude/settings.json");
        std::fs::create_dir_all(settings.parent().unwrap()).unwrap();
        std::fs::write(&settings, "{}").unwrap();
        assert!(fallback_commands(Role::Witness, &claude, false, work.path(), home).is_empty());

        // No hooks at all: the flag cannot help.
        assert_eq!(fallback_commands(Role::Mayor, &rc("codex"), true, work.path(), home).len(), 1);
    }

    #[test]
    fn hooks_available_uses_home_for_other_providers() {
        let home = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let claude = rc("claude");
        assert!(!hooks_available(&claude, work.path(), Some(home.path())));
        std::fs::create_dir_all(home.path().join(".claude")).unwrap();
        std::fs::write(home.path().join(".claude/settings.json"), "{}").unwrap();
        assert!(hooks_available(&claude, work.path(), Some(home.path())));
        assert!(!hooks_available(&claude, work.path(), None));
    }

    #[test]
    fn fallback_waits_for_prompt_then_nudges() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        backend.create("s", "copilot");
        backend.push_pane("s", "❯ ");
        let clock = FakeClock::new();
        let sent =
            run_startup_fallback(&backend, &clock, "s", Role::Witness, &rc("copilot"), dir.path()).unwrap();
        assert_eq!(sent, 1);
        assert_eq!(backend.nudges("s").len(), 1);
        assert!(backend.nudges("s")[0].starts_with("gt prime"));
    }

    #[test]
    fn fallback_skipped_when_hooks_cover_it() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let clock = FakeClock::new();
        let sent =
            run_startup_fallback(&backend, &clock, "s", Role::Witness, &rc("claude"), dir.path()).unwrap();
        assert_eq!(sent, 0);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn session_id_indirection() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GT_SESSION_ID_ENV", "COPILOT_SESSION_ID"),
            ("COPILOT_SESSION_ID", "cp-1"),
            ("CLAUDE_SESSION_ID", "cl-1"),
        ]);
        let lookup = |k: &str| env.get(k).map(ToString::to_string);
        assert_eq!(session_id_from(lookup).as_deref(), Some("cp-1"));

        let env: HashMap<&str, &str> = HashMap::from([
            ("GT_SESSION_ID_ENV", "COPILOT_SESSION_ID"),
            ("CLAUDE_SESSION_ID", "cl-1"),
        ]);
        let lookup = |k: &str| env.get(k).map(ToString::to_string);
        assert_eq!(session_id_from(lookup).as_deref(), Some("cl-1"));

        let lookup = |_: &str| None;
        assert_eq!(session_id_from(lookup), None);
    }
}
