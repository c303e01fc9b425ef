use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open output file {} for {name}: {source}", path.display())]
    Output {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal {name} (pid {pid}): {source}")]
    Signal {
        name: String,
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("failed to wait for {name}: {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{name} exited during startup with {status}")]
    ExitedEarly { name: String, status: ExitStatus },

    #[error("{name} did not become ready within {timeout:?}")]
    NotReady { name: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
