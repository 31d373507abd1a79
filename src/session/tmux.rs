//! tmux implementation of [`SessionBackend`].

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::DateTime;

use super::{SessionBackend, SessionInfo, SessionStyle};
use crate::subprocess::{RunOutput, Tool};

const TMUX_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between typing a nudge and pressing Enter, so the agent's input
/// box sees the paste finish before the submit.
const NUDGE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Drives sessions on the default tmux server (or a named socket).
#[derive(Debug, Clone, Default)]
pub struct Tmux {
    socket: Option<String>,
}

impl Tmux {
    pub const fn new() -> Self {
        Self { socket: None }
    }

    /// Use a dedicated server socket (`tmux -L <name>`).
    pub fn with_socket(name: &str) -> Self {
        Self {
            socket: Some(name.to_string()),
        }
    }

    fn tool(&self, args: &[&str]) -> Tool {
        let mut tool = Tool::new("tmux").timeout(TMUX_TIMEOUT);
        if let Some(ref socket) = self.socket {
            tool = tool.args(&["-L", socket]);
        }
        tool.args(args)
    }

    fn run(&self, args: &[&str]) -> anyhow::Result<RunOutput> {
        self.tool(args).run_ok()
    }

    fn pane_pids(&self, id: &str) -> anyhow::Result<Vec<String>> {
        let output = self.run(&["list-panes", "-s", "-t", id, "-F", "#{pane_pid}"])?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|pid| !pid.is_empty() && pid.chars().all(|c| c.is_ascii_digit()))
            .map(ToString::to_string)
            .collect())
    }
}

/// Exact-match target so `gt-demo` never resolves to `gt-demo-witness`.
fn exact(id: &str) -> String {
    format!("={id}")
}

fn parse_info(id: &str, line: &str) -> anyhow::Result<SessionInfo> {
    let fields: Vec<&str> = line.trim_end().splitn(5, '|').collect();
    let [name, created, attached, windows, command] = fields[..] else {
        anyhow::bail!("unexpected tmux session info for {id}: {line:?}");
    };
    let created = created
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    Ok(SessionInfo {
        name: name.to_string(),
        created,
        attached: attached.parse::<u32>().is_ok_and(|n| n > 0),
        windows: windows.parse().unwrap_or(0),
        current_command: Some(command.to_string()).filter(|c| !c.is_empty()),
    })
}

impl SessionBackend for Tmux {
    fn has_session(&self, id: &str) -> anyhow::Result<bool> {
        let output = self.tool(&["has-session", "-t", &exact(id)]).run()?;
        Ok(output.success())
    }

    fn session_info(&self, id: &str) -> anyhow::Result<SessionInfo> {
        let output = self
            .run(&[
                "display-message",
                "-p",
                "-t",
                id,
                "#{session_name}|#{session_created}|#{session_attached}|#{session_windows}|#{pane_current_command}",
            ])
            .with_context(|| format!("reading session info for {id}"))?;
        parse_info(id, &output.stdout)
    }

    fn kill_session(&self, id: &str) -> anyhow::Result<()> {
        self.run(&["kill-session", "-t", &exact(id)])
            .with_context(|| format!("killing session {id}"))?;
        Ok(())
    }

    fn kill_session_with_processes(&self, id: &str) -> anyhow::Result<()> {
        // Children first, so nothing is reparented to init and left running.
        for pid in self.pane_pids(id).unwrap_or_default() {
            let _ = Tool::new("pkill")
                .args(&["-TERM", "-P", &pid])
                .timeout(TMUX_TIMEOUT)
                .run();
            let _ = Tool::new("kill")
                .args(&["-TERM", &pid])
                .timeout(TMUX_TIMEOUT)
                .run();
        }
        self.kill_session(id)
    }

    fn new_session_with_command(&self, id: &str, work_dir: &Path, command: &str) -> anyhow::Result<()> {
        let dir = work_dir.to_string_lossy();
        self.run(&["new-session", "-d", "-s", id, "-c", &dir, command])
            .with_context(|| format!("creating session {id}"))?;
        Ok(())
    }

    fn set_environment(&self, id: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.run(&["set-environment", "-t", id, key, value])
            .with_context(|| format!("setting {key} on {id}"))?;
        Ok(())
    }

    fn pane_command(&self, id: &str) -> anyhow::Result<String> {
        let output = self.run(&["display-message", "-p", "-t", id, "#{pane_current_command}"])?;
        Ok(output.stdout.trim().to_string())
    }

    fn capture_pane(&self, id: &str, lines: usize) -> anyhow::Result<String> {
        let start = format!("-{lines}");
        let output = self.run(&["capture-pane", "-p", "-t", id, "-S", &start])?;
        Ok(output.stdout)
    }

    fn send_key(&self, id: &str, key: &str) -> anyhow::Result<()> {
        self.run(&["send-keys", "-t", id, key])?;
        Ok(())
    }

    fn nudge_session(&self, id: &str, text: &str) -> anyhow::Result<()> {
        self.run(&["send-keys", "-t", id, "-l", text])
            .with_context(|| format!("typing nudge into {id}"))?;
        std::thread::sleep(NUDGE_DEBOUNCE);
        self.send_key(id, "Enter")
            .with_context(|| format!("submitting nudge in {id}"))
    }

    fn configure_session(&self, id: &str, style: &SessionStyle) -> anyhow::Result<()> {
        let status_style = format!("bg={},fg={}", style.theme.bg, style.theme.fg);
        self.run(&["set-option", "-t", id, "status-style", &status_style])?;
        self.run(&["set-option", "-t", id, "status-left-length", "40"])?;
        self.run(&["set-option", "-t", id, "status-left", &style.status_left()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_info_line() {
        let info = parse_info("gt-demo-witness", "gt-demo-witness|1700000000|1|2|claude\n").unwrap();
        assert_eq!(info.name, "gt-demo-witness");
        assert_eq!(info.created.unwrap().timestamp(), 1_700_000_000);
        assert!(info.attached);
        assert_eq!(info.windows, 2);
        assert_eq!(info.current_command.as_deref(), Some("claude"));
    }

    #[test]
    fn parse_session_info_tolerates_blank_fields() {
        let info = parse_info("s", "s|||1|").unwrap();
        assert!(info.created.is_none());
        assert!(!info.attached);
        assert!(info.current_command.is_none());
        assert!(parse_info("s", "garbage").is_err());
    }

    #[test]
    fn socket_is_passed_first() {
        let tmux = Tmux::with_socket("gt-test");
        let tool = tmux.tool(&["has-session"]);
        assert_eq!(tool.program(), "tmux");
        assert_eq!(format!("{tool:?}").matches("gt-test").count(), 1);
    }
}
