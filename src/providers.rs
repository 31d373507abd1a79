//! Provider capability registry.
//!
//! Everything that differs between agent providers (readiness defaults,
//! trust handling, hook integration) is looked up here instead of being
//! switched on in the controller. Adding a provider means adding a row.

use std::fmt;
use std::path::Path;

/// Supported agent providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Claude,
    Copilot,
    Opencode,
    Codex,
    Gemini,
}

impl ProviderId {
    pub const ALL: [Self; 5] = [
        Self::Claude,
        Self::Copilot,
        Self::Opencode,
        Self::Codex,
        Self::Gemini,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Copilot => "copilot",
            Self::Opencode => "opencode",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    /// Case-insensitive lookup by provider name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(name))
    }

    /// Lookup by the base name of a command path (`/opt/bin/copilot`).
    pub fn from_command(command: &str) -> Option<Self> {
        let base = Path::new(command.trim()).file_name()?.to_str()?;
        Self::parse(base)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ready-marker defaults for providers that need explicit readiness handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyDefaults {
    pub prompt_prefix: &'static str,
    pub delay_ms: u64,
    /// Minimum sleep when the marker never shows up.
    pub fallback_floor_ms: u64,
}

/// How a provider is told to trust a working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustKind {
    None,
    CopilotTrustedFolders,
}

/// How a provider picks up lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HooksKind {
    None,
    ClaudeSettings,
    CopilotHooks,
    OpencodePlugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub ready: Option<ReadyDefaults>,
    pub trust: TrustKind,
    pub hooks: HooksKind,
    /// Hooks are always loaded, so the startup fallback never runs.
    pub hooks_always_loaded: bool,
    pub hooks_dir: &'static str,
    pub hooks_file: &'static str,
    pub session_id_env: Option<&'static str>,
    pub config_dir_env: Option<&'static str>,
    /// Whether the provider shows a one-time permission-bypass dialog.
    pub bypass_dialog: bool,
}

/// Minimum settle time before injecting keystrokes into a provider whose
/// prompt was not detected.
pub const FALLBACK_FLOOR_MS: u64 = 10_000;

static REGISTRY: [ProviderSpec; 5] = [
    ProviderSpec {
        id: ProviderId::Claude,
        ready: None,
        trust: TrustKind::None,
        hooks: HooksKind::ClaudeSettings,
        hooks_always_loaded: true,
        hooks_dir: ".claude",
        hooks_file: "settings.json",
        session_id_env: Some("CLAUDE_SESSION_ID"),
        config_dir_env: Some("CLAUDE_CONFIG_DIR"),
        bypass_dialog: true,
    },
    ProviderSpec {
        id: ProviderId::Copilot,
        ready: Some(ReadyDefaults {
            prompt_prefix: "❯",
            delay_ms: 3000,
            fallback_floor_ms: FALLBACK_FLOOR_MS,
        }),
        trust: TrustKind::CopilotTrustedFolders,
        hooks: HooksKind::CopilotHooks,
        hooks_always_loaded: false,
        hooks_dir: ".github/hooks",
        hooks_file: "gastown.json",
        session_id_env: Some("COPILOT_SESSION_ID"),
        config_dir_env: Some("COPILOT_CONFIG_DIR"),
        bypass_dialog: false,
    },
    ProviderSpec {
        id: ProviderId::Opencode,
        ready: None,
        trust: TrustKind::None,
        hooks: HooksKind::OpencodePlugin,
        hooks_always_loaded: true,
        hooks_dir: ".opencode/plugin",
        hooks_file: "gastown.js",
        session_id_env: None,
        config_dir_env: None,
        bypass_dialog: false,
    },
    ProviderSpec {
        id: ProviderId::Codex,
        ready: None,
        trust: TrustKind::None,
        hooks: HooksKind::None,
        hooks_always_loaded: false,
        hooks_dir: "",
        hooks_file: "",
        session_id_env: None,
        config_dir_env: None,
        bypass_dialog: false,
    },
    ProviderSpec {
        id: ProviderId::Gemini,
        ready: None,
        trust: TrustKind::None,
        hooks: HooksKind::None,
        hooks_always_loaded: false,
        hooks_dir: "",
        hooks_file: "",
        session_id_env: Some("GEMINI_SESSION_ID"),
        config_dir_env: None,
        bypass_dialog: false,
    },
];

/// Capabilities for a provider.
pub fn lookup(id: ProviderId) -> &'static ProviderSpec {
    REGISTRY
        .iter()
        .find(|spec| spec.id == id)
        .unwrap_or(&REGISTRY[0])
}
