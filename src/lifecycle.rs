//! Start, stop and observe the session for one role identity.
//!
//! The session backend is the only authority on whether a role is running;
//! state is derived on every call and never stored. Steps before session
//! creation fail the start. After creation, only the launch-command wait is
//! fatal; everything else is best-effort and reported as an [`Advisory`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::beads::RoleConfigSource;
use crate::config::{AgentSettings, RuntimeConfig};
use crate::converge::trust::{check_trust_document, ensure_trust};
use crate::error::ExitError;
use crate::nudge::{StartupNudge, send_propulsion_nudge, send_startup_nudge};
use crate::providers::ProviderId;
use crate::readiness::{
    Clock, ReadyOutcome, settle_delay, sleep_for_ready_delay, wait_for_command,
    wait_for_propulsion_ready, wait_for_provider_ready,
};
use crate::runtime::{ensure_settings_for_role, run_startup_fallback};
use crate::session::{HQ_THEME, SUPPORTED_SHELLS, SessionBackend, SessionInfo, SessionStyle, assign_theme};
use crate::startup::{agent_env, infer_agent_from_command, resolve_start_command, role_config_env};
use crate::template::TokenValues;
use crate::workspace::{RoleIdentity, Workspace};

/// Observed state of a role's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session exists.
    Absent,
    /// The session exists but only a shell is left in it.
    Zombie,
    /// The agent process is alive.
    Healthy,
}

/// A best-effort step that failed without failing the start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub step: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub session: String,
    pub work_dir: PathBuf,
    pub agent: String,
    /// Command came from the role's stored start command.
    pub from_role_config: bool,
    pub warnings: Vec<Advisory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session: String,
    pub state: SessionState,
    pub info: SessionInfo,
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Removed capability; always rejected.
    pub foreground: bool,
    pub agent_override: Option<String>,
    /// Caller-supplied environment; wins over everything else.
    pub env_overrides: Vec<(String, String)>,
}

/// Bounds for every wait in a start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Launch command replacing the shell. Expiry is fatal.
    pub command: Duration,
    /// Provider prompt detection, before the startup nudge and fallback.
    pub provider_ready: Duration,
    /// Prompt detection before the propulsion nudge.
    pub runtime_ready: Duration,
    /// Pause after dismissing dialogs, before the first readiness check.
    pub settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(60),
            provider_ready: Duration::from_secs(30),
            runtime_ready: Duration::from_secs(30),
            settle: Duration::from_millis(500),
        }
    }
}

/// Lifecycle controller for one role identity.
pub struct SessionController<'a> {
    backend: &'a dyn SessionBackend,
    roles: &'a dyn RoleConfigSource,
    clock: &'a dyn Clock,
    ws: Workspace,
    id: RoleIdentity,
    settings: AgentSettings,
    trust_config_dir: Option<PathBuf>,
    timeouts: Timeouts,
}

impl<'a> SessionController<'a> {
    pub fn new(
        backend: &'a dyn SessionBackend,
        roles: &'a dyn RoleConfigSource,
        clock: &'a dyn Clock,
        ws: Workspace,
        id: RoleIdentity,
        settings: AgentSettings,
    ) -> Self {
        Self {
            backend,
            roles,
            clock,
            ws,
            id,
            settings,
            trust_config_dir: None,
            timeouts: Timeouts::default(),
        }
    }

    /// Write provider trust to this directory instead of the default.
    #[must_use]
    pub fn with_trust_config_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.trust_config_dir = dir;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn session_name(&self) -> String {
        self.id.session_name()
    }

    /// Ask the backend what state the session is in.
    pub fn observe(&self) -> anyhow::Result<SessionState> {
        let session = self.session_name();
        if !self.backend.has_session(&session)? {
            return Ok(SessionState::Absent);
        }
        if self.backend.is_agent_running(&session, &SUPPORTED_SHELLS)? {
            Ok(SessionState::Healthy)
        } else {
            Ok(SessionState::Zombie)
        }
    }

    pub fn status(&self) -> anyhow::Result<SessionStatus> {
        let session = self.session_name();
        let state = self.observe()?;
        if state == SessionState::Absent {
            return Err(ExitError::NotRunning { session }.into());
        }
        let info = self
            .backend
            .session_info(&session)
            .with_context(|| format!("reading session {session}"))?;
        Ok(SessionStatus {
            session,
            state,
            info,
        })
    }

    /// Terminate the session, healthy or not.
    pub fn stop(&self) -> anyhow::Result<()> {
        let session = self.session_name();
        if !self.backend.has_session(&session)? {
            return Err(ExitError::NotRunning { session }.into());
        }
        self.backend.kill_session(&session)?;
        tracing::info!(%session, "session stopped");
        Ok(())
    }

    /// Runtime config for the agent the command will actually run.
    fn effective_runtime(&self, nominal: RuntimeConfig, command: &str, agent_override: Option<&str>) -> RuntimeConfig {
        if agent_override.is_some() {
            return nominal;
        }
        let Some(inferred) = infer_agent_from_command(command) else {
            return nominal;
        };
        if inferred == nominal.agent || ProviderId::from_command(&inferred) == nominal.provider {
            return nominal;
        }
        match self.settings.preset(&inferred) {
            Some(preset) => {
                tracing::debug!(agent = %inferred, "start command runs a different agent");
                RuntimeConfig::from_preset(&inferred, &preset)
            }
            None => nominal,
        }
    }

    fn style(&self) -> SessionStyle {
        let role = self.id.role();
        let label = self
            .id
            .name()
            .map_or_else(|| role.as_str().to_string(), |name| format!("{role}/{name}"));
        if role.is_town_level() {
            SessionStyle {
                theme: HQ_THEME,
                rig: String::new(),
                role: role.as_str().to_string(),
                label,
            }
        } else {
            SessionStyle {
                theme: assign_theme(self.id.rig()),
                rig: self.id.rig().to_string(),
                role: role.as_str().to_string(),
                label,
            }
        }
    }

    /// Start the session. See the module docs for which failures are fatal.
    pub fn start(&self, opts: &StartOptions) -> anyhow::Result<StartReport> {
        if opts.foreground {
            return Err(ExitError::ForegroundDeprecated.into());
        }
        let session = self.session_name();
        let role = self.id.role();
        let agent_override = opts.agent_override.as_deref().filter(|a| !a.is_empty());

        match self.observe()? {
            SessionState::Healthy => {
                return Err(ExitError::AlreadyRunning { session }.into());
            }
            SessionState::Zombie => {
                tracing::info!(%session, "killing zombie session");
                self.backend
                    .kill_session(&session)
                    .with_context(|| format!("killing zombie session {session}"))?;
            }
            SessionState::Absent => {}
        }

        let work_dir = self.id.resolve_work_dir(&self.ws);
        let nominal = self.settings.resolve(role, agent_override)?;
        let role_config = self
            .roles
            .get_role_config(&self.id.role_bead_id())
            .with_context(|| format!("loading {role} role config"))?;
        let startup = resolve_start_command(
            &self.id,
            &self.ws,
            &nominal,
            role_config.as_ref(),
            agent_override,
        )?;
        let rc = self.effective_runtime(nominal, &startup.command, agent_override);
        let rc = match rc.ready_defaults() {
            Some(defaults) => rc.with_ready_defaults(defaults),
            None => rc,
        };

        let values = TokenValues::for_identity(&self.id, &self.ws.town_root);
        let mut env = agent_env(&self.id, &self.ws, &rc);
        env.extend(role_config_env(role_config.as_ref(), &values)?);
        env.extend(opts.env_overrides.iter().cloned());

        check_trust_document(&rc, self.trust_config_dir.as_deref())
            .with_context(|| format!("reading {} trust config", rc.agent))?;

        // Settings go in the role's own directory, never a nested checkout.
        let settings_dir = self.id.parent_dir(&self.ws);
        ensure_settings_for_role(&settings_dir, role, &rc)
            .with_context(|| format!("ensuring runtime settings in {}", settings_dir.display()))?;

        ensure_trust(
            &rc,
            &work_dir,
            self.id.shared_parent(&self.ws).as_deref(),
            self.trust_config_dir.as_deref(),
        )
        .with_context(|| format!("ensuring {} trust", rc.agent))?;

        if let Err(e) = self
            .backend
            .new_session_with_command(&session, &work_dir, &startup.command)
        {
            let _ = self.backend.kill_session_with_processes(&session);
            return Err(e.context(format!("creating session {session}")));
        }
        tracing::info!(%session, agent = %rc.agent, work_dir = %work_dir.display(), "session created");

        let mut warnings = Vec::new();
        let mut advise = |step: &'static str, result: anyhow::Result<()>| {
            if let Err(e) = result {
                tracing::warn!(%session, step, error = %format!("{e:#}"), "best-effort step failed");
                warnings.push(Advisory {
                    step,
                    message: format!("{e:#}"),
                });
            }
        };

        for (key, value) in &env {
            advise("environment", self.backend.set_environment(&session, key, value));
        }
        advise("theme", self.backend.configure_session(&session, &self.style()));

        if let Err(e) = wait_for_command(
            self.backend,
            self.clock,
            &session,
            &SUPPORTED_SHELLS,
            self.timeouts.command,
        ) {
            let _ = self.backend.kill_session_with_processes(&session);
            return Err(anyhow::Error::new(e).context(format!("waiting for {} to start", rc.agent)));
        }

        if rc.spec().is_some_and(|spec| spec.bypass_dialog) {
            advise(
                "bypass-dialog",
                self.backend
                    .accept_bypass_permissions_warning(&session)
                    .map(|_| ()),
            );
        }
        self.clock.sleep(self.timeouts.settle);

        if let ReadyOutcome::FellBack { slept } = wait_for_provider_ready(
            self.backend,
            self.clock,
            &session,
            &rc,
            self.timeouts.provider_ready,
        ) {
            advise(
                "readiness",
                Err(anyhow::anyhow!("prompt not detected, waited {}ms", slept.as_millis())),
            );
        }

        let beacon = StartupNudge::for_identity(&self.id);
        advise(
            "startup-nudge",
            send_startup_nudge(self.backend, &session, &beacon, &chrono::Local::now()),
        );
        sleep_for_ready_delay(self.clock, &rc);
        advise(
            "startup-fallback",
            run_startup_fallback(self.backend, self.clock, &session, role, &rc, &work_dir).map(|_| ()),
        );

        // The propulsion nudge must not land while the startup nudge is still
        // being processed.
        if let Err(e) = wait_for_propulsion_ready(
            self.backend,
            self.clock,
            &session,
            &rc,
            self.timeouts.runtime_ready,
        ) {
            self.clock.sleep(settle_delay(&rc));
            advise("propulsion-ready", Err(e.into()));
        }
        advise(
            "propulsion-nudge",
            send_propulsion_nudge(self.backend, &session, role, &work_dir),
        );

        Ok(StartReport {
            session,
            work_dir,
            agent: rc.agent,
            from_role_config: startup.from_role_config,
            warnings,
        })
    }
}
