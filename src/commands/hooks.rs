use std::path::PathBuf;

use clap::Subcommand;

use crate::config::{AgentSettings, DEFAULT_AGENT};
use crate::runtime::ensure_settings_for_role;
use crate::workspace::Role;

#[derive(Debug, Subcommand)]
pub enum HooksCommand {
    /// Install or converge an agent's hook settings for a role
    Ensure {
        /// Role's working directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Role the hooks are for
        #[arg(long)]
        role: Role,
        /// Agent whose hook format to write (claude, copilot, opencode)
        #[arg(long, default_value = DEFAULT_AGENT)]
        provider: String,
    },
}

impl HooksCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Ensure { dir, role, provider } => {
                let rc = AgentSettings::default().resolve_override(provider)?;
                if ensure_settings_for_role(dir, *role, &rc)? {
                    println!("updated {provider} hooks for {role} in {}", dir.display());
                } else {
                    println!("{provider} hooks for {role} already up to date");
                }
                Ok(())
            }
        }
    }
}
