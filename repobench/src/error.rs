use std::io;

use libsupervisor::SupervisorError;
use thiserror::Error;

/// Failures that abandon the remaining work for one payload size.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("{daemon} failed to start: {source}")]
    DaemonStart {
        daemon: String,
        #[source]
        source: SupervisorError,
    },

    #[error("put of {size} bytes exited with status {status}")]
    PutFailed { size: u64, status: i32 },

    #[error("failed to prepare {size} byte payload: {source}")]
    Payload {
        size: u64,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}
