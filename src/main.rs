use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gastown::commands::hooks::HooksCommand;
use gastown::commands::schema::run_schema;
use gastown::commands::session::SessionCommand;
use gastown::commands::trust::TrustCommand;
use gastown::{error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "gt",
    version,
    about = "Session lifecycle and config convergence for multi-agent tmux workspaces"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start, stop, and inspect role sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Manage agent hook settings
    Hooks {
        #[command(subcommand)]
        command: HooksCommand,
    },
    /// Manage agent trusted folders
    Trust {
        #[command(subcommand)]
        command: TrustCommand,
    },
    /// Print the JSON Schema for the town settings file
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Hooks { .. } => "hooks",
            Self::Trust { .. } => "trust",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Session { command } => command.execute(),
        Commands::Hooks { command } => command.execute(),
        Commands::Trust { command } => command.execute(),
        Commands::Schema => run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            error::exit_error(&e).map_or(ExitCode::FAILURE, error::ExitError::exit_code)
        }
    }
}
