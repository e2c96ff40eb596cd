//! Sleep inhibition for long optimizer sessions.

use crate::domain::error::BandtraderError;
use crate::ports::session_port::KeepAwake;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Does nothing; the default when no inhibitor command is configured.
pub struct NoopKeepAwake;

impl KeepAwake for NoopKeepAwake {
    fn acquire(&self) -> Result<(), BandtraderError> {
        Ok(())
    }

    fn release(&self) {}
}

/// Runs an inhibitor command (e.g. `caffeinate -i` or
/// `systemd-inhibit sleep infinity`) for the duration of a session.
pub struct CommandKeepAwake {
    command: String,
    child: Mutex<Option<Child>>,
}

impl CommandKeepAwake {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            child: Mutex::new(None),
        }
    }
}

impl KeepAwake for CommandKeepAwake {
    fn acquire(&self) -> Result<(), BandtraderError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or_else(|| BandtraderError::ConfigInvalid {
            section: "optimizer".into(),
            key: "keep_awake_command".into(),
            reason: "command is empty".into(),
        })?;

        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!(command = %self.command, pid = child.id(), "sleep inhibitor started");

        if let Ok(mut slot) = self.child.lock() {
            *slot = Some(child);
        }
        Ok(())
    }

    fn release(&self) {
        let Ok(mut slot) = self.child.lock() else {
            return;
        };
        if let Some(mut child) = slot.take() {
            if let Err(e) = child.kill() {
                warn!(error = %e, "could not stop sleep inhibitor");
            }
            let _ = child.wait();
            debug!("sleep inhibitor stopped");
        }
    }
}
