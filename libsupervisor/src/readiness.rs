use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::error::{Result, SupervisorError};
use crate::process::{CommandSpec, ProcessHandle, ProcessSpec};

/// How to decide that a freshly started daemon accepts requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// Sleep for a fixed delay, then check the daemon is still alive.
    Settle { delay_ms: u64 },
    /// Run `command` until it exits 0, backing off exponentially between
    /// attempts. Giving up after `timeout_ms` is fatal.
    Probe {
        command: CommandSpec,
        #[serde(default = "default_initial_backoff_ms")]
        initial_backoff_ms: u64,
        #[serde(default = "default_max_backoff_ms")]
        max_backoff_ms: u64,
        timeout_ms: u64,
    },
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::Settle { delay_ms: 5_000 }
    }
}

impl Readiness {
    pub fn settle(delay: Duration) -> Self {
        Readiness::Settle {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Waits until `handle` is ready. Fails with `ExitedEarly` if the process
    /// has terminated, or `NotReady` if a probe never succeeds.
    pub async fn await_ready(&self, handle: &mut ProcessHandle) -> Result<()> {
        match self {
            Readiness::Settle { delay_ms } => {
                time::sleep(Duration::from_millis(*delay_ms)).await;
                ensure_alive(handle)
            }
            Readiness::Probe {
                command,
                initial_backoff_ms,
                max_backoff_ms,
                timeout_ms,
            } => {
                let timeout = Duration::from_millis(*timeout_ms);
                let max_backoff = Duration::from_millis(*max_backoff_ms);
                let deadline = Instant::now() + timeout;
                let probe = ProcessSpec::new(format!("{}-probe", handle.name()), command.clone());
                let mut backoff = Duration::from_millis(*initial_backoff_ms);
                let mut attempt = 0u32;

                loop {
                    ensure_alive(handle)?;
                    attempt += 1;
                    let outcome =
                        time::timeout_at(deadline, ProcessHandle::run_to_completion(&probe)).await;
                    match outcome {
                        Ok(Ok(status)) if status.success() => {
                            debug!(name = handle.name(), attempt, "readiness probe succeeded");
                            return ensure_alive(handle);
                        }
                        Ok(Ok(status)) => {
                            debug!(name = handle.name(), attempt, %status, "readiness probe failed")
                        }
                        Ok(Err(e)) => {
                            warn!(name = handle.name(), attempt, "readiness probe error: {e}")
                        }
                        Err(_) => break,
                    }
                    if Instant::now() + backoff >= deadline {
                        break;
                    }
                    time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }

                ensure_alive(handle)?;
                Err(SupervisorError::NotReady {
                    name: handle.name().to_string(),
                    timeout,
                })
            }
        }
    }
}

fn ensure_alive(handle: &mut ProcessHandle) -> Result<()> {
    match handle.poll()? {
        Some(status) => Err(SupervisorError::ExitedEarly {
            name: handle.name().to_string(),
            status,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    fn daemon(script: &str) -> ProcessHandle {
        ProcessHandle::start(&ProcessSpec::new("daemon", sh(script))).unwrap()
    }

    #[tokio::test]
    async fn test_settle_running_daemon() {
        let mut handle = daemon("exec sleep 30");
        Readiness::settle(Duration::from_millis(50))
            .await_ready(&mut handle)
            .await
            .unwrap();
        handle.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_detects_early_exit() {
        let mut handle = daemon("exit 1");
        let err = Readiness::settle(Duration::from_millis(200))
            .await_ready(&mut handle)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ExitedEarly { .. }));
    }

    #[tokio::test]
    async fn test_probe_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("ready");
        let mut handle = daemon(&format!("sleep 0.2; touch {}; exec sleep 30", flag.display()));
        let readiness = Readiness::Probe {
            command: sh(&format!("test -e {}", flag.display())),
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
            timeout_ms: 5_000,
        };
        readiness.await_ready(&mut handle).await.unwrap();
        assert!(flag.exists());
        handle.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let mut handle = daemon("exec sleep 30");
        let readiness = Readiness::Probe {
            command: sh("exit 1"),
            initial_backoff_ms: 20,
            max_backoff_ms: 50,
            timeout_ms: 300,
        };
        let err = readiness.await_ready(&mut handle).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotReady { .. }));
        handle.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_detects_dead_daemon() {
        let mut handle = daemon("exit 2");
        time::sleep(Duration::from_millis(100)).await;
        let readiness = Readiness::Probe {
            command: sh("exit 0"),
            initial_backoff_ms: 20,
            max_backoff_ms: 50,
            timeout_ms: 1_000,
        };
        let err = readiness.await_ready(&mut handle).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ExitedEarly { .. }));
    }
}
