//! Roles, role identities and the on-disk town/rig layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Marker file that identifies a town root.
pub const TOWN_MARKER: &str = "mayor/town.json";

/// Agent roles hosted in sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Witness,
    Polecat,
    Refinery,
    Deacon,
    Mayor,
    Crew,
}

/// Whether a role works without human prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleClass {
    Autonomous,
    Interactive,
}

impl Role {
    pub const ALL: [Self; 6] = [
        Self::Witness,
        Self::Polecat,
        Self::Refinery,
        Self::Deacon,
        Self::Mayor,
        Self::Crew,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Witness => "witness",
            Self::Polecat => "polecat",
            Self::Refinery => "refinery",
            Self::Deacon => "deacon",
            Self::Mayor => "mayor",
            Self::Crew => "crew",
        }
    }

    /// Autonomous roles get mail injection on startup; mayor and crew are
    /// human-guided.
    pub const fn class(self) -> RoleClass {
        match self {
            Self::Witness | Self::Polecat | Self::Refinery | Self::Deacon => RoleClass::Autonomous,
            Self::Mayor | Self::Crew => RoleClass::Interactive,
        }
    }

    /// Town-level roles live outside any rig.
    pub const fn is_town_level(self) -> bool {
        matches!(self, Self::Mayor | Self::Deacon)
    }

    /// Roles that run one session per named instance.
    pub const fn needs_instance_name(self) -> bool {
        matches!(self, Self::Polecat | Self::Crew)
    }

    /// Directory under the rig (or town) that holds this role's workspaces.
    const fn home_dir_name(self) -> &'static str {
        match self {
            Self::Polecat => "polecats",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ExitError::Config(format!("unknown role: {s}")).into())
    }
}

/// Town root, rig path and rig name for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub town_root: PathBuf,
    pub rig_path: PathBuf,
    pub rig_name: String,
}

impl Workspace {
    /// Discover the town that encloses `rig_path`. A rig outside any town is
    /// its own root.
    pub fn discover(rig_path: &Path) -> anyhow::Result<Self> {
        let rig_path = if rig_path.is_absolute() {
            rig_path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("could not determine current directory")?
                .join(rig_path)
        };
        let rig_name = rig_path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ExitError::Config(format!("invalid rig path: {}", rig_path.display())))?
            .to_string();
        let town_root = find_town_root(&rig_path).unwrap_or_else(|| rig_path.clone());
        Ok(Self {
            town_root,
            rig_path,
            rig_name,
        })
    }

    /// Directory shared by every instance of `role`, for roles that nest
    /// disposable working directories under one parent.
    pub fn shared_parent(&self, role: Role) -> Option<PathBuf> {
        (role == Role::Polecat).then(|| self.rig_path.join(role.home_dir_name()))
    }
}

/// Walk up from `start` to the first directory containing the town marker.
pub fn find_town_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(TOWN_MARKER).is_file())
        .map(Path::to_path_buf)
}

/// A role instance: deterministically names exactly one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleIdentity {
    role: Role,
    rig: String,
    name: Option<String>,
}

impl RoleIdentity {
    pub fn new(role: Role, rig: &str, name: Option<&str>) -> anyhow::Result<Self> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        match (role.needs_instance_name(), name) {
            (true, None) => {
                return Err(ExitError::Config(format!("{role} requires an instance name")).into());
            }
            (false, Some(n)) => {
                return Err(
                    ExitError::Config(format!("{role} does not take an instance name ({n})")).into(),
                );
            }
            _ => {}
        }
        if !role.is_town_level() && rig.trim().is_empty() {
            return Err(ExitError::Config(format!("{role} requires a rig")).into());
        }
        Ok(Self {
            role,
            rig: rig.to_string(),
            name: name.map(ToString::to_string),
        })
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    pub fn rig(&self) -> &str {
        &self.rig
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The multiplexer session name for this identity.
    pub fn session_name(&self) -> String {
        match (self.role, self.name.as_deref()) {
            (Role::Mayor | Role::Deacon, _) => format!("hq-{}", self.role),
            (Role::Crew, Some(name)) => format!("gt-{}-crew-{name}", self.rig),
            (Role::Polecat, Some(name)) => format!("gt-{}-{name}", self.rig),
            (role, _) => format!("gt-{}-{role}", self.rig),
        }
    }

    /// Mail address used for nudges and `BD_ACTOR`.
    pub fn address(&self) -> String {
        match (self.role, self.name.as_deref()) {
            (Role::Mayor | Role::Deacon, _) => self.role.as_str().to_string(),
            (Role::Polecat, Some(name)) => format!("{}/polecats/{name}", self.rig),
            (Role::Crew, Some(name)) => format!("{}/crew/{name}", self.rig),
            (role, _) => format!("{}/{role}", self.rig),
        }
    }

    /// Root that holds this role's directories: the town for town-level
    /// roles, otherwise the rig.
    fn base<'a>(&self, ws: &'a Workspace) -> &'a Path {
        if self.role.is_town_level() {
            &ws.town_root
        } else {
            &ws.rig_path
        }
    }

    /// The role's own directory, never a nested source checkout. Generated
    /// settings go here. Polecats share `polecats/`.
    pub fn parent_dir(&self, ws: &Workspace) -> PathBuf {
        let base = self.base(ws).join(self.role.home_dir_name());
        match (self.role, self.name.as_deref()) {
            (Role::Crew, Some(name)) => base.join(name),
            _ => base,
        }
    }

    /// Shared parent for roles whose disposable working directories are
    /// nested under one directory.
    pub fn shared_parent(&self, ws: &Workspace) -> Option<PathBuf> {
        ws.shared_parent(self.role)
    }

    /// Candidate working directories in preference order.
    pub fn work_dir_candidates(&self, ws: &Workspace) -> Vec<PathBuf> {
        let own = match (self.role, self.name.as_deref()) {
            (Role::Polecat, Some(name)) => self.parent_dir(ws).join(name),
            _ => self.parent_dir(ws),
        };
        let nested = if self.role.is_town_level() {
            own.join("rig")
        } else if self.role.needs_instance_name() {
            own.join(&ws.rig_name)
        } else {
            own.join("rig")
        };
        vec![nested, own]
    }

    /// First candidate that exists on disk; falls back to the enclosing root.
    pub fn resolve_work_dir(&self, ws: &Workspace) -> PathBuf {
        self.work_dir_candidates(ws)
            .into_iter()
            .find(|dir| dir.is_dir())
            .unwrap_or_else(|| self.base(ws).to_path_buf())
    }

    /// Role bead id holding stored role configuration.
    pub fn role_bead_id(&self) -> String {
        format!("hq-{}-role", self.role)
    }
}

impl fmt::Display for RoleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}
