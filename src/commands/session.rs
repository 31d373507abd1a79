use std::path::PathBuf;

use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::beads::BdCli;
use crate::config::AgentSettings;
use crate::error::ExitError;
use crate::lifecycle::{SessionController, SessionStatus, StartOptions, StartReport};
use crate::readiness::SystemClock;
use crate::session::tmux::Tmux;
use crate::workspace::{Role, RoleIdentity, Workspace};

/// Which role identity a command acts on.
#[derive(Debug, Clone, Args)]
pub struct RoleTarget {
    /// Rig directory (town-level roles only use it to find the town)
    #[arg(long, default_value = ".")]
    pub rig: PathBuf,
    /// Role: witness, polecat, refinery, deacon, mayor, crew
    #[arg(long)]
    pub role: Role,
    /// Instance name (required for polecat and crew)
    #[arg(long)]
    pub name: Option<String>,
    /// tmux server socket name
    #[arg(long)]
    pub socket: Option<String>,
}

impl RoleTarget {
    fn resolve(&self) -> anyhow::Result<(Workspace, RoleIdentity)> {
        let ws = Workspace::discover(&self.rig)?;
        let rig = if self.role.is_town_level() { "" } else { ws.rig_name.as_str() };
        let id = RoleIdentity::new(self.role, rig, self.name.as_deref())?;
        Ok((ws, id))
    }

    fn backend(&self) -> Tmux {
        self.socket.as_deref().map_or_else(Tmux::new, Tmux::with_socket)
    }
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Start the role's agent session in the background
    Start {
        #[command(flatten)]
        target: RoleTarget,
        /// Agent to run instead of the configured one
        #[arg(long)]
        agent: Option<String>,
        /// Extra environment for the agent (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// No longer supported; sessions always start in the background
        #[arg(long)]
        foreground: bool,
        /// Directory holding the provider's trust config
        #[arg(long)]
        trust_config_dir: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Stop the role's session
    Stop {
        #[command(flatten)]
        target: RoleTarget,
    },
    /// Show whether the role's session is running
    Status {
        #[command(flatten)]
        target: RoleTarget,
        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

impl SessionCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Start {
                target,
                agent,
                env,
                foreground,
                trust_config_dir,
                format,
            } => {
                // Reject before touching the town or tmux.
                if foreground {
                    return Err(ExitError::ForegroundDeprecated.into());
                }
                let (ws, id) = target.resolve()?;
                let settings = AgentSettings::load(&ws)?;
                let backend = target.backend();
                let roles = BdCli::new(&ws.town_root);
                let clock = SystemClock;
                let controller = SessionController::new(&backend, &roles, &clock, ws, id, settings)
                    .with_trust_config_dir(trust_config_dir);
                let report = controller.start(&StartOptions {
                    foreground,
                    agent_override: agent,
                    env_overrides: env,
                })?;
                print_start(&report, OutputFormat::resolve(format))
            }
            Self::Stop { target } => {
                let (ws, id) = target.resolve()?;
                let settings = AgentSettings::load(&ws)?;
                let backend = target.backend();
                let roles = BdCli::new(&ws.town_root);
                let clock = SystemClock;
                let controller = SessionController::new(&backend, &roles, &clock, ws, id, settings);
                controller.stop()?;
                println!("stopped {}", controller.session_name());
                Ok(())
            }
            Self::Status { target, format } => {
                let (ws, id) = target.resolve()?;
                let settings = AgentSettings::load(&ws)?;
                let backend = target.backend();
                let roles = BdCli::new(&ws.town_root);
                let clock = SystemClock;
                let controller = SessionController::new(&backend, &roles, &clock, ws, id, settings);
                let status = controller.status()?;
                print_status(&status, OutputFormat::resolve(format))
            }
        }
    }
}

/// Parse `KEY=VALUE`; the key must be non-empty.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn print_start(report: &StartReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Pretty => {
            println!("Started {} ({})", report.session, report.agent);
            println!("  work dir: {}", report.work_dir.display());
            if report.from_role_config {
                println!("  command:  from role config");
            }
            for warning in &report.warnings {
                println!("  ! {}: {}", warning.step, warning.message);
            }
        }
        OutputFormat::Text => {
            println!("{}\t{}\t{}", report.session, report.agent, report.work_dir.display());
            for warning in &report.warnings {
                println!("warning\t{}\t{}", warning.step, warning.message);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn print_status(status: &SessionStatus, format: OutputFormat) -> anyhow::Result<()> {
    let info = &status.info;
    match format {
        OutputFormat::Pretty => {
            println!("{} is {:?}", status.session, status.state);
            if let Some(ref created) = info.created {
                println!("  created:  {}", created.to_rfc3339());
            }
            println!("  attached: {}", if info.attached { "yes" } else { "no" });
            println!("  windows:  {}", info.windows);
            if let Some(ref command) = info.current_command {
                println!("  command:  {command}");
            }
        }
        OutputFormat::Text => {
            let state = serde_json::to_value(status.state)?;
            println!(
                "{}\t{}\t{}",
                status.session,
                state.as_str().unwrap_or_default(),
                info.current_command.as_deref().unwrap_or("-")
            );
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(status)?),
    }
    Ok(())
}
