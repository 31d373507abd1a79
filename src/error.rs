use std::process::ExitCode;

/// Errors that cause gt to exit with a specific code.
///
/// The precondition variants (`AlreadyRunning`, `NotRunning`,
/// `ForegroundDeprecated`) are distinguished values: callers downcast and
/// branch on them instead of treating them as unexpected failures.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("session {session} already running")]
    AlreadyRunning { session: String },

    #[error("session {session} not running")]
    NotRunning { session: String },

    #[error("foreground mode is deprecated; use background mode (remove --foreground flag)")]
    ForegroundDeprecated,

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) | Self::ForegroundDeprecated => ExitCode::from(2),
            Self::ToolNotFound { .. } => ExitCode::from(3),
            Self::ToolFailed { .. } => ExitCode::from(4),
            Self::Timeout { .. } => ExitCode::from(5),
            Self::AlreadyRunning { .. } => ExitCode::from(6),
            Self::NotRunning { .. } => ExitCode::from(7),
            Self::Other(_) => ExitCode::from(1),
        }
    }

    /// True for the precondition values a caller is expected to branch on.
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning { .. } | Self::NotRunning { .. } | Self::ForegroundDeprecated
        )
    }
}

/// Returns the `ExitError` inside an anyhow chain, if any.
pub fn exit_error(err: &anyhow::Error) -> Option<&ExitError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ExitError>())
}
