use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::error::ExitError;

const WAIT_POLL: Duration = Duration::from_millis(20);

/// Result of running a subprocess.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunOutput {
    /// Returns true if the process exited successfully.
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Parse stdout as JSON.
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.stdout)
            .with_context(|| "parsing JSON output from subprocess".to_string())
    }
}

/// Builder for running external programs (tmux, bd, pkill).
#[derive(Debug, Clone)]
pub struct Tool {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Tool {
    /// Create a new tool invocation.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(ToString::to_string));
        self
    }

    /// Set an environment variable for the child only.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Run the child in `dir`.
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Set a timeout for the subprocess.
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the tool, capturing stdout and stderr.
    pub fn run(&self) -> anyhow::Result<RunOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(program = %self.program, args = ?self.args, "running tool");

        let output: Output = if let Some(timeout) = self.timeout {
            run_with_timeout(&mut cmd, timeout, &self.program)?
        } else {
            cmd.output().map_err(|e| spawn_error(e, &self.program))?
        };

        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run the tool and return an error if it fails.
    pub fn run_ok(&self) -> anyhow::Result<RunOutput> {
        let output = self.run()?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExitError::ToolFailed {
                tool: self.program.clone(),
                code: output.exit_code,
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }
}

/// Maps a spawn failure, keeping "not installed" distinguishable.
fn spawn_error(e: std::io::Error, tool: &str) -> anyhow::Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        ExitError::ToolNotFound {
            tool: tool.to_string(),
        }
        .into()
    } else {
        anyhow::Error::new(e).context(format!("running {tool}"))
    }
}

/// True when the error chain says the program is not installed.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        crate::error::exit_error(err),
        Some(ExitError::ToolNotFound { .. })
    )
}

/// Read a pipe to the end on its own thread, so the child never blocks on
/// a full pipe while we poll for its exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn run_with_timeout(cmd: &mut Command, timeout: Duration, tool: &str) -> anyhow::Result<Output> {
    let mut child = cmd.spawn().map_err(|e| spawn_error(e, tool))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("waiting for {tool}"))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(tool, timeout_ms = timeout.as_millis(), "killed slow tool");
            return Err(ExitError::Timeout {
                tool: tool.to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into());
        }
        std::thread::sleep(WAIT_POLL);
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_echo() {
        let output = Tool::new("echo").arg("hello").run().unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn run_false_fails() {
        let output = Tool::new("false").run().unwrap();
        assert!(!output.success());
    }

    #[test]
    fn run_ok_returns_error_on_failure() {
        let err = Tool::new("false").run_ok().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::ToolFailed { .. })
        ));
    }

    #[test]
    fn run_not_found() {
        let err = Tool::new("nonexistent-tool-xyz").run().unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn run_with_timeout_succeeds() {
        let output = Tool::new("echo")
            .arg("fast")
            .timeout(Duration::from_secs(5))
            .run()
            .unwrap();
        assert_eq!(output.stdout.trim(), "fast");
    }

    #[test]
    fn run_with_timeout_kills_slow_child() {
        let err = Tool::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100))
            .run()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Timeout { .. })
        ));
    }

    #[test]
    fn timeout_path_drains_large_output() {
        let output = Tool::new("sh")
            .args(&["-c", "yes | head -c 200000"])
            .timeout(Duration::from_secs(10))
            .run()
            .unwrap();
        assert_eq!(output.stdout.len(), 200_000);
    }

    #[test]
    fn env_and_cwd_reach_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let output = Tool::new("sh")
            .args(&["-c", "printf '%s %s' \"$GT_PROBE\" \"$(pwd)\""])
            .env("GT_PROBE", "ok")
            .current_dir(dir.path())
            .run()
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(output.stdout, format!("ok {}", canonical.display()));
    }

    #[test]
    fn parse_json_output() {
        let output = RunOutput {
            stdout: r#"{"key": "value"}"#.to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        let parsed: serde_json::Value = output.parse_json().unwrap();
        assert_eq!(parsed["key"], "value");
    }
}
