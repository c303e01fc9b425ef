use std::time::{Duration, Instant};

use libsupervisor::{ProcessHandle, ProcessSpec, exit_code};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, warn};

/// Status recorded for a fetch the harness killed after the fetch timeout.
pub const TIMEOUT_STATUS: i32 = -255;
/// Status recorded when the harness could not launch or observe the get tool.
pub const LAUNCH_FAILED_STATUS: i32 = -254;

/// The result of a single retrieval attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchOutcome {
    /// Unique within one batch, in `0..concurrency`.
    pub id: usize,
    /// Get tool exit code, `-signum` if it was killed by a signal, or one of
    /// [`TIMEOUT_STATUS`] and [`LAUNCH_FAILED_STATUS`].
    pub status: i32,
    pub duration: Duration,
}

impl FetchOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == 0
    }
}

/// Fans a batch of get-tool processes out against the running daemon pair.
pub struct FetchDispatcher {
    spec: ProcessSpec,
    timeout: Option<Duration>,
}

impl FetchDispatcher {
    pub fn new(spec: ProcessSpec, timeout: Option<Duration>) -> Self {
        Self { spec, timeout }
    }

    /// Launches `concurrency` fetches at once and waits for all of them.
    ///
    /// Every fetch is spawned before any is awaited. Outcomes come back in
    /// completion order and carry their request id. Failed fetches are not
    /// retried.
    pub async fn run(&self, concurrency: usize) -> Vec<FetchOutcome> {
        let mut fetches = JoinSet::new();
        for id in 0..concurrency {
            let mut spec = self.spec.clone();
            spec.name = format!("{}-{id}", self.spec.name);
            fetches.spawn(fetch_once(id, spec, self.timeout));
        }

        let mut outcomes = Vec::with_capacity(concurrency);
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("fetch task failed: {e}"),
            }
        }
        outcomes
    }
}

async fn fetch_once(id: usize, spec: ProcessSpec, timeout: Option<Duration>) -> FetchOutcome {
    let started = Instant::now();
    let status = match ProcessHandle::start(&spec) {
        Ok(mut handle) => match timeout {
            None => wait_status(&mut handle).await,
            Some(limit) => match time::timeout(limit, handle.wait()).await {
                Ok(waited) => match waited {
                    Ok(status) => exit_code(&status),
                    Err(e) => {
                        warn!(id, "fetch could not be observed: {e}");
                        LAUNCH_FAILED_STATUS
                    }
                },
                Err(_) => {
                    warn!(id, "fetch exceeded {limit:?}, killing");
                    if let Err(e) = handle.kill().await {
                        warn!(id, "failed to kill timed out fetch: {e}");
                    }
                    TIMEOUT_STATUS
                }
            },
        },
        Err(e) => {
            warn!(id, "fetch could not be launched: {e}");
            LAUNCH_FAILED_STATUS
        }
    };
    let duration = started.elapsed();
    debug!(id, status, ?duration, "fetch finished");
    FetchOutcome {
        id,
        status,
        duration,
    }
}

async fn wait_status(handle: &mut ProcessHandle) -> i32 {
    match handle.wait().await {
        Ok(status) => exit_code(&status),
        Err(e) => {
            warn!(name = handle.name(), "fetch could not be observed: {e}");
            LAUNCH_FAILED_STATUS
        }
    }
}
