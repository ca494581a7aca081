use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to open log sink {0}: {1}")]
    LogSink(String, std::io::Error),
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("{0} has no stdout handle")]
    NoStdout(String),
    #[error("{0} already exited")]
    AlreadyGone(String),
    #[error("failed to signal {0}: {1}")]
    Signal(String, Errno),
}

/// An external process together with its append-mode log file.
///
/// stderr (and stdout unless captured) of the child go to the log. The handle
/// is consumed by [`ProcessHandle::release`], so it is released exactly once.
pub struct ProcessHandle {
    name: String,
    child: Child,
    log: Option<File>,
}

impl ProcessHandle {
    /// Spawn `cmd` with stdout and stderr appended to `log_path`.
    pub fn spawn(name: &str, cmd: Command, log_path: &Path) -> Result<Self, ProcessError> {
        Self::launch(name, cmd, log_path, false)
    }

    /// Spawn `cmd` with stderr appended to `log_path` and stdout piped back.
    pub fn spawn_captured(
        name: &str,
        cmd: Command,
        log_path: &Path,
    ) -> Result<(Self, ChildStdout), ProcessError> {
        let mut handle = Self::launch(name, cmd, log_path, true)?;
        match handle.child.stdout.take() {
            Some(stdout) => Ok((handle, stdout)),
            None => {
                if let Err(e) = handle.signal_terminate() {
                    warn!(process = name, error = %e, "failed to stop process without stdout");
                }
                Err(ProcessError::NoStdout(name.to_string()))
            }
        }
    }

    fn launch(
        name: &str,
        mut cmd: Command,
        log_path: &Path,
        capture_stdout: bool,
    ) -> Result<Self, ProcessError> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| ProcessError::LogSink(log_path.display().to_string(), e))?;
        let stderr = log
            .try_clone()
            .map_err(|e| ProcessError::LogSink(log_path.display().to_string(), e))?;

        let stdout = if capture_stdout {
            Stdio::piped()
        } else {
            let out = log
                .try_clone()
                .map_err(|e| ProcessError::LogSink(log_path.display().to_string(), e))?;
            Stdio::from(out)
        };

        cmd.stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);

        let child = cmd
            .spawn()
            .map_err(|e| ProcessError::Spawn(name.to_string(), e))?;

        info!(
            process = name,
            pid = child.id(),
            log = %log_path.display(),
            "process launched"
        );

        Ok(Self {
            name: name.to_string(),
            child,
            log: Some(log),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send SIGTERM. A process that has already exited yields
    /// [`ProcessError::AlreadyGone`].
    pub fn signal_terminate(&self) -> Result<(), ProcessError> {
        let Some(pid) = self.child.id() else {
            return Err(ProcessError::AlreadyGone(self.name.clone()));
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(ProcessError::AlreadyGone(self.name.clone())),
            Err(e) => Err(ProcessError::Signal(self.name.clone(), e)),
        }
    }

    /// Wait up to `grace` for the process to exit.
    pub async fn wait(&mut self, grace: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(process = self.name, error = %e, "failed to wait for process");
                None
            }
            Err(_) => None,
        }
    }

    /// Signal termination, close the log sink, and reap the child in the
    /// background. The log sink is closed whatever the signal outcome.
    pub fn release(mut self, grace: Duration) {
        info!(process = self.name, pid = self.pid(), "stopping process");
        let signalled = self.signal_terminate();
        self.log.take();

        match signalled {
            Ok(()) => {}
            Err(e @ ProcessError::AlreadyGone(_)) => {
                warn!(process = self.name, error = %e, "process already terminated");
            }
            Err(e) => {
                error!(process = self.name, error = %e, "error while terminating process");
            }
        }

        tokio::spawn(async move {
            match self.wait(grace).await {
                Some(status) => debug!(process = self.name, %status, "process exited"),
                None => warn!(
                    process = self.name,
                    grace_secs = grace.as_secs(),
                    "process still running after SIGTERM grace period"
                ),
            }
        });
    }
}
