//! Gas Town - session lifecycle and config convergence for tmux-hosted agents

pub mod beads;
pub mod commands;
pub mod config;
pub mod converge;
pub mod error;
pub mod lifecycle;
pub mod nudge;
pub mod providers;
pub mod readiness;
pub mod runtime;
pub mod session;
pub mod startup;
pub mod subprocess;
pub mod telemetry;
pub mod template;
pub mod workspace;
