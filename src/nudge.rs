//! Text injected into a running session after startup.

use std::path::Path;

use chrono::{DateTime, TimeZone};

use crate::session::SessionBackend;
use crate::template::{render_propulsion, render_startup_beacon};
use crate::workspace::{Role, RoleIdentity};

/// Routing for the predecessor-discovery beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupNudge {
    pub recipient: String,
    pub sender: String,
    pub topic: String,
}

impl StartupNudge {
    /// Beacon for a role: patrol roles are woken by the deacon, the deacon
    /// itself by the mayor.
    pub fn for_identity(id: &RoleIdentity) -> Self {
        let (sender, topic) = match id.role() {
            Role::Witness | Role::Refinery => ("deacon", "patrol"),
            Role::Deacon => ("mayor", "patrol"),
            Role::Polecat => ("witness", "assigned"),
            Role::Mayor | Role::Crew => ("human", "start"),
        };
        Self {
            recipient: id.address(),
            sender: sender.to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn render<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> anyhow::Result<String>
    where
        Tz::Offset: std::fmt::Display,
    {
        let timestamp = at.format("%Y-%m-%d %H:%M").to_string();
        render_startup_beacon(&self.recipient, &self.sender, &self.topic, &timestamp)
    }
}

/// Send the startup beacon so the new agent can find its predecessor's work.
pub fn send_startup_nudge<Tz: TimeZone>(
    backend: &dyn SessionBackend,
    session: &str,
    nudge: &StartupNudge,
    at: &DateTime<Tz>,
) -> anyhow::Result<()>
where
    Tz::Offset: std::fmt::Display,
{
    let text = nudge.render(at)?;
    backend.nudge_session(session, &text)?;
    tracing::info!(session, recipient = %nudge.recipient, "startup nudge sent");
    Ok(())
}

/// Send the propulsion nudge that starts the role's work loop.
pub fn send_propulsion_nudge(
    backend: &dyn SessionBackend,
    session: &str,
    role: Role,
    work_dir: &Path,
) -> anyhow::Result<()> {
    let text = render_propulsion(role, work_dir)?;
    backend.nudge_session(session, &text)?;
    tracing::info!(session, %role, "propulsion nudge sent");
    Ok(())
}
