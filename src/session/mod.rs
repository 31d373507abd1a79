//! Session backend surface and session theming.
//!
//! The multiplexer session is the only record of whether a role is running.
//! Nothing here caches session state; every query goes to the backend.

#[cfg(test)]
pub mod fake;
pub mod tmux;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Shells that mean "the agent is not running" when they own the pane.
pub const SUPPORTED_SHELLS: [&str; 6] = ["bash", "zsh", "sh", "fish", "tcsh", "ksh"];

/// Text shown by the one-time permission-bypass confirmation dialog.
pub const BYPASS_DIALOG_MARKER: &str = "Bypass Permissions mode";

/// Observed session metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
    pub attached: bool,
    pub windows: u32,
    pub current_command: Option<String>,
}

/// Status-bar colours for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    pub bg: &'static str,
    pub fg: &'static str,
}

const PALETTE: [Theme; 8] = [
    Theme { name: "ocean", bg: "#1e3a5f", fg: "#e0e0e0" },
    Theme { name: "forest", bg: "#2d5a3d", fg: "#e0e0e0" },
    Theme { name: "rust", bg: "#8b4513", fg: "#f5f5dc" },
    Theme { name: "plum", bg: "#4a2c5a", fg: "#e0e0e0" },
    Theme { name: "slate", bg: "#3c4650", fg: "#e0e0e0" },
    Theme { name: "ember", bg: "#7a2e1f", fg: "#f5f5dc" },
    Theme { name: "teal", bg: "#1f5f5f", fg: "#e0e0e0" },
    Theme { name: "sand", bg: "#c2b280", fg: "#1a1a1a" },
];

/// Theme for town-level sessions (mayor, deacon).
pub const HQ_THEME: Theme = Theme {
    name: "hq",
    bg: "#b8860b",
    fg: "#1a1a1a",
};

/// Deterministic theme for a rig: the same rig always gets the same colours.
pub fn assign_theme(rig: &str) -> Theme {
    let digest = Sha256::digest(rig.as_bytes());
    PALETTE[usize::from(digest[0]) % PALETTE.len()]
}

/// Cosmetic session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStyle {
    pub theme: Theme,
    pub rig: String,
    pub role: String,
    /// Short label shown in the status bar (`witness`, `polecat/capable`).
    pub label: String,
}

impl SessionStyle {
    pub fn status_left(&self) -> String {
        if self.rig.is_empty() {
            format!("[{}] ", self.label)
        } else {
            format!("[{}/{}] ", self.rig, self.label)
        }
    }
}

/// Operations the lifecycle controller needs from a terminal multiplexer.
pub trait SessionBackend {
    fn has_session(&self, id: &str) -> anyhow::Result<bool>;

    fn session_info(&self, id: &str) -> anyhow::Result<SessionInfo>;

    fn kill_session(&self, id: &str) -> anyhow::Result<()>;

    /// Kill the session and every process started inside it.
    fn kill_session_with_processes(&self, id: &str) -> anyhow::Result<()>;

    /// Create a detached session whose initial command is `command`.
    fn new_session_with_command(&self, id: &str, work_dir: &Path, command: &str) -> anyhow::Result<()>;

    fn set_environment(&self, id: &str, key: &str, value: &str) -> anyhow::Result<()>;

    /// Name of the foreground process in the session's pane.
    fn pane_command(&self, id: &str) -> anyhow::Result<String>;

    /// Visible pane text, including up to `lines` of scrollback.
    fn capture_pane(&self, id: &str, lines: usize) -> anyhow::Result<String>;

    /// Send a single key (`Enter`, `Down`) without literal interpretation.
    fn send_key(&self, id: &str, key: &str) -> anyhow::Result<()>;

    /// Type `text` into the pane and submit it.
    fn nudge_session(&self, id: &str, text: &str) -> anyhow::Result<()>;

    fn configure_session(&self, id: &str, style: &SessionStyle) -> anyhow::Result<()>;

    /// True when something other than a bare shell owns the pane.
    fn is_agent_running(&self, id: &str, shells: &[&str]) -> anyhow::Result<bool> {
        let command = self.pane_command(id)?;
        let command = command.trim();
        Ok(!command.is_empty() && !shells.contains(&command))
    }

    /// Accept the permission-bypass dialog if it is showing. Returns whether
    /// the dialog was found.
    fn accept_bypass_permissions_warning(&self, id: &str) -> anyhow::Result<bool> {
        let pane = self.capture_pane(id, 30)?;
        if !pane.contains(BYPASS_DIALOG_MARKER) {
            return Ok(false);
        }
        // Option 2 is "Yes, I accept".
        self.send_key(id, "Down")?;
        self.send_key(id, "Enter")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::FakeBackend;

    #[test]
    fn theme_is_stable_per_rig() {
        assert_eq!(assign_theme("demo"), assign_theme("demo"));
        let names: std::collections::HashSet<_> = ["a", "b", "c", "d", "e", "f", "g", "h", "i"]
            .iter()
            .map(|rig| assign_theme(rig).name)
            .collect();
        assert!(names.len() > 1);
    }

    #[test]
    fn session_info_serializes_created_as_rfc3339() {
        use chrono::TimeZone;
        let info = SessionInfo {
            name: "gt-demo-witness".into(),
            created: Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()),
            attached: false,
            windows: 1,
            current_command: Some("claude".into()),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["created"], "2026-01-02T03:04:05Z");
        assert_eq!(json["current_command"], "claude");
        assert!(serde_json::to_value(SessionInfo::default()).unwrap()["created"].is_null());
    }

    #[test]
    fn status_left_includes_rig() {
        let style = SessionStyle {
            theme: HQ_THEME,
            rig: "demo".into(),
            role: "witness".into(),
            label: "witness".into(),
        };
        assert_eq!(style.status_left(), "[demo/witness] ");
        let hq = SessionStyle {
            rig: String::new(),
            label: "mayor".into(),
            ..style
        };
        assert_eq!(hq.status_left(), "[mayor] ");
    }

    #[test]
    fn shell_in_pane_means_not_running() {
        let backend = FakeBackend::new();
        backend.create("s", "bash");
        assert!(!backend.is_agent_running("s", &SUPPORTED_SHELLS).unwrap());
        backend.set_pane_command("s", "node");
        assert!(backend.is_agent_running("s", &SUPPORTED_SHELLS).unwrap());
        backend.set_pane_command("s", "");
        assert!(!backend.is_agent_running("s", &SUPPORTED_SHELLS).unwrap());
    }

    #[test]
    fn bypass_dialog_is_accepted_only_when_shown() {
        let backend = FakeBackend::new();
        backend.create("s", "claude");
        backend.push_pane("s", "Welcome");
        assert!(!backend.accept_bypass_permissions_warning("s").unwrap());

        backend.push_pane("s", "WARNING: Bypass Permissions mode\n1. No\n2. Yes, I accept");
        assert!(backend.accept_bypass_permissions_warning("s").unwrap());
        assert_eq!(backend.keys("s"), vec!["Down", "Enter"]);
    }
}
