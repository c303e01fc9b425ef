use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};

/// Exit code reported for a program that does not exist, as a shell would.
const NOT_FOUND_CODE: i32 = 127;
/// Exit code reported for a program that exists but cannot be executed.
const NOT_EXECUTABLE_CODE: i32 = 126;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where a child's stdout or stderr goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolicy {
    #[default]
    Discard,
    Inherit,
    /// Appended to the given file, created if missing.
    File(PathBuf),
}

impl OutputPolicy {
    fn stdio(&self, name: &str) -> Result<Stdio> {
        match self {
            OutputPolicy::Discard => Ok(Stdio::null()),
            OutputPolicy::Inherit => Ok(Stdio::inherit()),
            OutputPolicy::File(path) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Stdio::from)
                .map_err(|source| SupervisorError::Output {
                    name: name.to_string(),
                    path: path.clone(),
                    source,
                }),
        }
    }
}

/// Everything needed to launch one supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub command: CommandSpec,
    pub stdout: OutputPolicy,
    pub stderr: OutputPolicy,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
            stdout: OutputPolicy::Discard,
            stderr: OutputPolicy::Discard,
        }
    }

    pub fn stdout(mut self, policy: OutputPolicy) -> Self {
        self.stdout = policy;
        self
    }

    pub fn stderr(mut self, policy: OutputPolicy) -> Self {
        self.stderr = policy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

/// One external process owned by the harness.
///
/// Children are spawned with kill-on-drop, so dropping a handle (for example
/// when the harness is interrupted mid-trial) never leaves the process behind.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    child: Option<Child>,
    state: ProcessState,
    exit: Option<ExitStatus>,
}

impl ProcessHandle {
    /// A handle for a process that has not been launched yet.
    pub fn idle(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid: None,
            child: None,
            state: ProcessState::NotStarted,
            exit: None,
        }
    }

    /// Launches the process and returns without waiting for it to be ready.
    ///
    /// A program that is missing or not executable does not fail here: the
    /// returned handle has already exited with status 127 or 126, which the
    /// caller observes through [`ProcessHandle::poll`].
    pub fn start(spec: &ProcessSpec) -> Result<Self> {
        let mut command = Command::new(&spec.command.program);
        command
            .args(&spec.command.args)
            .stdin(Stdio::null())
            .stdout(spec.stdout.stdio(&spec.name)?)
            .stderr(spec.stderr.stdio(&spec.name)?)
            .kill_on_drop(true);

        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                debug!(name = %spec.name, pid = ?pid, command = %spec.command, "process started");
                Ok(Self {
                    name: spec.name.clone(),
                    pid,
                    child: Some(child),
                    state: ProcessState::Running,
                    exit: None,
                })
            }
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
            {
                let code = if e.kind() == io::ErrorKind::NotFound {
                    NOT_FOUND_CODE
                } else {
                    NOT_EXECUTABLE_CODE
                };
                warn!(name = %spec.name, command = %spec.command, "failed to launch: {e}");
                Ok(Self {
                    name: spec.name.clone(),
                    pid: None,
                    child: None,
                    state: ProcessState::Stopped,
                    exit: Some(ExitStatus::from_raw(code << 8)),
                })
            }
            Err(source) => Err(SupervisorError::Spawn {
                name: spec.name.clone(),
                source,
            }),
        }
    }

    /// Starts the process and waits for it to exit.
    pub async fn run_to_completion(spec: &ProcessSpec) -> Result<ExitStatus> {
        let mut handle = Self::start(spec)?;
        handle.wait().await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Returns the exit status if the process has terminated, without blocking.
    pub fn poll(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        let exited = child.try_wait().map_err(|source| SupervisorError::Wait {
            name: self.name.clone(),
            source,
        })?;
        if let Some(status) = exited {
            self.reaped(status);
        }
        Ok(exited)
    }

    /// Waits for the process to exit on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let Some(child) = self.child.as_mut() else {
            return Err(SupervisorError::Wait {
                name: self.name.clone(),
                source: io::Error::other("process was never started"),
            });
        };
        let status = child.wait().await.map_err(|source| SupervisorError::Wait {
            name: self.name.clone(),
            source,
        })?;
        self.reaped(status);
        Ok(status)
    }

    /// Sends SIGKILL and waits until the process is reaped.
    pub async fn kill(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.poll()? {
            return Ok(status);
        }
        let Some(child) = self.child.as_mut() else {
            return Err(SupervisorError::Wait {
                name: self.name.clone(),
                source: io::Error::other("process was never started"),
            });
        };
        child.kill().await.map_err(|source| SupervisorError::Wait {
            name: self.name.clone(),
            source,
        })?;
        let status = child.wait().await.map_err(|source| SupervisorError::Wait {
            name: self.name.clone(),
            source,
        })?;
        self.reaped(status);
        Ok(status)
    }

    /// Sends SIGINT and waits up to `grace` for the process to exit, then
    /// kills it. Returns once the process has been reaped.
    ///
    /// Calling `stop` on a handle that never started or already stopped is a
    /// no-op.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        if matches!(self.state, ProcessState::NotStarted | ProcessState::Stopped) {
            return Ok(());
        }
        if let Some(status) = self.poll()? {
            debug!(name = %self.name, %status, "process had already exited");
            return Ok(());
        }

        self.state = ProcessState::StopRequested;
        if let Some(pid) = self.pid {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                // ESRCH: exited between the poll and the signal
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(source) => {
                    return Err(SupervisorError::Signal {
                        name: self.name.clone(),
                        pid,
                        source,
                    });
                }
            }
        }

        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        match time::timeout(grace, child.wait()).await {
            Ok(waited) => {
                let status = waited.map_err(|source| SupervisorError::Wait {
                    name: self.name.clone(),
                    source,
                })?;
                info!(name = %self.name, %status, "process stopped");
                self.reaped(status);
            }
            Err(_) => {
                warn!(
                    name = %self.name,
                    pid = ?self.pid,
                    "no exit within {grace:?} of SIGINT, killing"
                );
                let status = self.kill().await?;
                info!(name = %self.name, %status, "process killed");
            }
        }
        Ok(())
    }

    fn reaped(&mut self, status: ExitStatus) {
        self.exit = Some(status);
        self.child = None;
        self.state = ProcessState::Stopped;
    }
}

/// Flattens an exit status into one integer: the exit code, or the negated
/// signal number when the process was killed by a signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}
