use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;

use crate::converge::trust::{config_path, ensure_trusted_folder_at, trust_target};
use crate::workspace::{Role, Workspace};

#[derive(Debug, Subcommand)]
pub enum TrustCommand {
    /// Add a folder to the agent's trusted folders
    Add {
        /// Folder to trust
        dir: PathBuf,
        /// Role working in the folder; roles with a shared parent trust it instead
        #[arg(long, requires = "rig")]
        role: Option<Role>,
        /// Rig the role belongs to
        #[arg(long)]
        rig: Option<PathBuf>,
        /// Directory holding config.json (default: ~/.copilot)
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}

impl TrustCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::Add {
                dir,
                role,
                rig,
                config_dir,
            } => {
                let shared_parent = match (role, rig) {
                    (Some(role), Some(rig)) => Workspace::discover(rig)?.shared_parent(*role),
                    _ => None,
                };
                let target = trust_target(dir, shared_parent.as_deref())?;
                let path = config_path(config_dir.as_deref())?;
                let written = ensure_trusted_folder_at(&path, &target)
                    .with_context(|| format!("trusting {}", target.display()))?;
                if written {
                    println!("trusted {} in {}", target.display(), path.display());
                } else {
                    println!("{} already trusted", target.display());
                }
                Ok(())
            }
        }
    }
}
