//! Deciding when an interactive agent inside a session can take input.
//!
//! Readiness is read off the pane: the process is alive the whole time it is
//! thinking, so exit status says nothing. Every wait is bounded; a timeout
//! here is a signal to fall back to a fixed delay, never a failure.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::config::RuntimeConfig;
use crate::providers::FALLBACK_FLOOR_MS;
use crate::session::SessionBackend;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const CAPTURE_LINES: usize = 50;

/// Source of time, so waits can be driven without sleeping in tests.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A bounded wait ran out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {}ms waiting for {what} in {session}", timeout.as_millis())]
pub struct WaitTimeout {
    pub session: String,
    pub what: String,
    pub timeout: Duration,
}

/// How a provider-aware readiness wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Provider needs no special handling.
    Skipped,
    Ready,
    /// Marker never appeared; slept the fallback delay instead.
    FellBack { slept: Duration },
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("valid ANSI regex")
    })
}

/// Remove terminal escape sequences from captured pane text.
pub fn strip_ansi(text: &str) -> String {
    ansi_re().replace_all(text, "").into_owned()
}

/// True when some line of the pane starts with `marker` (after trimming).
pub fn pane_shows_marker(pane: &str, marker: &str) -> bool {
    let marker = marker.trim();
    if marker.is_empty() {
        return false;
    }
    strip_ansi(pane)
        .lines()
        .any(|line| line.trim_start().starts_with(marker))
}

fn poll_until(
    clock: &dyn Clock,
    session: &str,
    what: &str,
    timeout: Duration,
    mut check: impl FnMut() -> bool,
) -> Result<(), WaitTimeout> {
    let start = clock.now();
    loop {
        if check() {
            return Ok(());
        }
        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= timeout {
            return Err(WaitTimeout {
                session: session.to_string(),
                what: what.to_string(),
                timeout,
            });
        }
        clock.sleep(POLL_INTERVAL.min(timeout - elapsed));
    }
}

/// Poll the pane until a line starts with `marker`.
pub fn wait_for_ready(
    backend: &dyn SessionBackend,
    clock: &dyn Clock,
    session: &str,
    marker: &str,
    timeout: Duration,
) -> Result<(), WaitTimeout> {
    poll_until(clock, session, &format!("prompt {marker:?}"), timeout, || {
        match backend.capture_pane(session, CAPTURE_LINES) {
            Ok(pane) => pane_shows_marker(&pane, marker),
            Err(e) => {
                tracing::debug!(session, error = %e, "capture failed while waiting for prompt");
                false
            }
        }
    })
}

/// Wait until the launch command has replaced the shell in the pane.
pub fn wait_for_command(
    backend: &dyn SessionBackend,
    clock: &dyn Clock,
    session: &str,
    shells: &[&str],
    timeout: Duration,
) -> Result<(), WaitTimeout> {
    poll_until(clock, session, "agent command", timeout, || {
        backend.is_agent_running(session, shells).unwrap_or(false)
    })
}

/// Wait for the configured ready marker; with no marker, sleep the
/// configured delay instead.
pub fn wait_for_runtime_ready(
    backend: &dyn SessionBackend,
    clock: &dyn Clock,
    session: &str,
    rc: &RuntimeConfig,
    timeout: Duration,
) -> Result<(), WaitTimeout> {
    match rc.readiness.ready_prompt_prefix.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(marker) => wait_for_ready(backend, clock, session, marker, timeout),
        None => {
            sleep_for_ready_delay(clock, rc);
            Ok(())
        }
    }
}

/// Provider-aware readiness. A no-op for providers without readiness
/// defaults; otherwise fills the defaults and, if the marker never shows,
/// sleeps at least the provider's fallback floor.
pub fn wait_for_provider_ready(
    backend: &dyn SessionBackend,
    clock: &dyn Clock,
    session: &str,
    rc: &RuntimeConfig,
    timeout: Duration,
) -> ReadyOutcome {
    let Some(defaults) = rc.ready_defaults() else {
        return ReadyOutcome::Skipped;
    };
    let effective = rc.with_ready_defaults(defaults);
    match wait_for_runtime_ready(backend, clock, session, &effective, timeout) {
        Ok(()) => ReadyOutcome::Ready,
        Err(e) => {
            let slept = Duration::from_millis(
                effective
                    .readiness
                    .ready_delay_ms
                    .max(defaults.fallback_floor_ms),
            );
            tracing::warn!(session, error = %e, slept_ms = slept.as_millis(), "prompt not detected, using fallback delay");
            clock.sleep(slept);
            ReadyOutcome::FellBack { slept }
        }
    }
}

/// Gate for the propulsion nudge. With a marker, wait for the prompt to
/// come back; without one the startup nudge cannot be seen finishing, so
/// sleep the settle delay instead.
pub fn wait_for_propulsion_ready(
    backend: &dyn SessionBackend,
    clock: &dyn Clock,
    session: &str,
    rc: &RuntimeConfig,
    timeout: Duration,
) -> Result<(), WaitTimeout> {
    match rc.readiness.ready_prompt_prefix.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(marker) => wait_for_ready(backend, clock, session, marker, timeout),
        None => {
            clock.sleep(settle_delay(rc));
            Ok(())
        }
    }
}

/// Sleep the configured ready delay, if any.
pub fn sleep_for_ready_delay(clock: &dyn Clock, rc: &RuntimeConfig) {
    if rc.readiness.ready_delay_ms > 0 {
        clock.sleep(Duration::from_millis(rc.readiness.ready_delay_ms));
    }
}

/// Fixed settle delay used when the prompt could not be confirmed before a
/// keystroke injection: the configured delay, but never under the floor.
pub fn settle_delay(rc: &RuntimeConfig) -> Duration {
    Duration::from_millis(rc.readiness.ready_delay_ms.max(FALLBACK_FLOOR_MS))
}

#[cfg(test)]
pub mod fake_clock {
    use std::cell::{Cell, RefCell};
    use std::time::{Duration, Instant};

    use super::Clock;

    /// Virtual clock: `sleep` advances time instantly and is recorded.
    #[derive(Debug)]
    pub struct FakeClock {
        start: Instant,
        elapsed: Cell<Duration>,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
                elapsed: Cell::new(Duration::ZERO),
                sleeps: RefCell::new(Vec::new()),
            }
        }

        pub fn elapsed(&self) -> Duration {
            self.elapsed.get()
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.borrow().clone()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.start + self.elapsed.get()
        }

        fn sleep(&self, duration: Duration) {
            self.elapsed.set(self.elapsed.get() + duration);
            self.sleeps.borrow_mut().push(duration);
        }
    }
}
