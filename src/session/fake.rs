//! In-memory backend that records calls and replays scripted pane text.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use super::{SessionBackend, SessionInfo, SessionStyle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    NewSession {
        id: String,
        work_dir: PathBuf,
        command: String,
    },
    Kill(String),
    KillWithProcesses(String),
    SetEnv {
        id: String,
        key: String,
        value: String,
    },
    Configure(String),
    Nudge {
        id: String,
        text: String,
    },
}

#[derive(Debug, Default)]
struct FakeSession {
    pane_command: String,
    panes: VecDeque<String>,
    last_pane: String,
    keys: Vec<String>,
}

#[derive(Debug)]
pub struct FakeBackend {
    sessions: RefCell<BTreeMap<String, FakeSession>>,
    calls: RefCell<Vec<Call>>,
    start_command: RefCell<String>,
    start_panes: RefCell<Vec<String>>,
    pub fail_new_session: Cell<bool>,
    pub fail_configure: Cell<bool>,
    pub fail_nudge: Cell<bool>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            sessions: RefCell::new(BTreeMap::new()),
            calls: RefCell::new(Vec::new()),
            start_command: RefCell::new("claude".to_string()),
            start_panes: RefCell::new(Vec::new()),
            fail_new_session: Cell::new(false),
            fail_configure: Cell::new(false),
            fail_nudge: Cell::new(false),
        }
    }

    /// Pre-create a session whose pane runs `pane_command`.
    pub fn create(&self, id: &str, pane_command: &str) {
        self.sessions.borrow_mut().insert(
            id.to_string(),
            FakeSession {
                pane_command: pane_command.to_string(),
                ..FakeSession::default()
            },
        );
    }

    /// Pane command that newly created sessions report.
    pub fn starts_as(&self, pane_command: &str) {
        *self.start_command.borrow_mut() = pane_command.to_string();
    }

    /// Pane text that newly created sessions replay, in order.
    pub fn starts_showing(&self, panes: &[&str]) {
        *self.start_panes.borrow_mut() = panes.iter().map(ToString::to_string).collect();
    }

    pub fn set_pane_command(&self, id: &str, command: &str) {
        if let Some(session) = self.sessions.borrow_mut().get_mut(id) {
            session.pane_command = command.to_string();
        }
    }

    /// Queue pane text; each capture consumes one, the last one sticks.
    pub fn push_pane(&self, id: &str, text: &str) {
        if let Some(session) = self.sessions.borrow_mut().get_mut(id) {
            session.panes.push_back(text.to_string());
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.sessions.borrow().contains_key(id)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn keys(&self, id: &str) -> Vec<String> {
        self.sessions
            .borrow()
            .get(id)
            .map(|s| s.keys.clone())
            .unwrap_or_default()
    }

    /// Environment set on `id`, in call order.
    pub fn env(&self, id: &str) -> Vec<(String, String)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::SetEnv { id: sid, key, value } if sid == id => {
                    Some((key.clone(), value.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn nudges(&self, id: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Nudge { id: sid, text } if sid == id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn missing(id: &str) -> anyhow::Error {
        anyhow::anyhow!("can't find session: {id}")
    }
}

impl SessionBackend for FakeBackend {
    fn has_session(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.exists(id))
    }

    fn session_info(&self, id: &str) -> anyhow::Result<SessionInfo> {
        let sessions = self.sessions.borrow();
        let session = sessions.get(id).ok_or_else(|| Self::missing(id))?;
        Ok(SessionInfo {
            name: id.to_string(),
            created: None,
            attached: false,
            windows: 1,
            current_command: Some(session.pane_command.clone()),
        })
    }

    fn kill_session(&self, id: &str) -> anyhow::Result<()> {
        self.record(Call::Kill(id.to_string()));
        self.sessions
            .borrow_mut()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::missing(id))
    }

    fn kill_session_with_processes(&self, id: &str) -> anyhow::Result<()> {
        self.record(Call::KillWithProcesses(id.to_string()));
        self.sessions.borrow_mut().remove(id);
        Ok(())
    }

    fn new_session_with_command(&self, id: &str, work_dir: &Path, command: &str) -> anyhow::Result<()> {
        self.record(Call::NewSession {
            id: id.to_string(),
            work_dir: work_dir.to_path_buf(),
            command: command.to_string(),
        });
        if self.fail_new_session.get() {
            anyhow::bail!("duplicate session: {id}");
        }
        self.sessions.borrow_mut().insert(
            id.to_string(),
            FakeSession {
                pane_command: self.start_command.borrow().clone(),
                panes: self.start_panes.borrow().iter().cloned().collect(),
                ..FakeSession::default()
            },
        );
        Ok(())
    }

    fn set_environment(&self, id: &str, key: &str, value: &str) -> anyhow::Result<()> {
        if !self.exists(id) {
            return Err(Self::missing(id));
        }
        self.record(Call::SetEnv {
            id: id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn pane_command(&self, id: &str) -> anyhow::Result<String> {
        self.sessions
            .borrow()
            .get(id)
            .map(|s| s.pane_command.clone())
            .ok_or_else(|| Self::missing(id))
    }

    fn capture_pane(&self, id: &str, _lines: usize) -> anyhow::Result<String> {
        let mut sessions = self.sessions.borrow_mut();
        let session = sessions.get_mut(id).ok_or_else(|| Self::missing(id))?;
        if let Some(next) = session.panes.pop_front() {
            session.last_pane = next;
        }
        Ok(session.last_pane.clone())
    }

    fn send_key(&self, id: &str, key: &str) -> anyhow::Result<()> {
        let mut sessions = self.sessions.borrow_mut();
        let session = sessions.get_mut(id).ok_or_else(|| Self::missing(id))?;
        session.keys.push(key.to_string());
        Ok(())
    }

    fn nudge_session(&self, id: &str, text: &str) -> anyhow::Result<()> {
        if self.fail_nudge.get() {
            anyhow::bail!("send-keys failed for {id}");
        }
        self.record(Call::Nudge {
            id: id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn configure_session(&self, id: &str, _style: &SessionStyle) -> anyhow::Result<()> {
        self.record(Call::Configure(id.to_string()));
        if self.fail_configure.get() {
            anyhow::bail!("set-option failed for {id}");
        }
        Ok(())
    }
}
