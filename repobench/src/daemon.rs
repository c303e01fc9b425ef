use std::time::Duration;

use libsupervisor::{
    ProcessHandle, ProcessSpec, ProcessState, Readiness, SupervisorError, kill_strays,
};
use tokio::time;
use tracing::{info, warn};

use crate::config::BenchConfig;
use crate::error::TrialError;

pub static FORWARDER: &str = "forwarder";
pub static STORE: &str = "store";

/// How the pair is launched and torn down.
#[derive(Debug, Clone)]
pub struct DaemonPlan {
    pub forwarder: ProcessSpec,
    pub forwarder_ready: Readiness,
    pub store: ProcessSpec,
    pub store_ready: Readiness,
    pub grace: Duration,
    pub restart_settle: Duration,
    pub stray_names: Vec<String>,
}

impl DaemonPlan {
    pub fn from_config(cfg: &BenchConfig) -> Self {
        Self {
            forwarder: cfg.forwarder.process_spec(FORWARDER),
            forwarder_ready: cfg.forwarder.readiness.clone(),
            store: cfg.store.process_spec(STORE),
            store_ready: cfg.store.readiness.clone(),
            grace: cfg.stop_grace(),
            restart_settle: cfg.restart_settle(),
            stray_names: cfg.stray_names.clone(),
        }
    }
}

/// The forwarder and store daemon, started and stopped as a unit.
///
/// At most one generation of the pair is alive at any time: a restart always
/// stops the old instances before the forwarder of the new one starts.
#[derive(Debug)]
pub struct DaemonPair {
    forwarder: ProcessHandle,
    store: ProcessHandle,
}

impl Default for DaemonPair {
    fn default() -> Self {
        Self {
            forwarder: ProcessHandle::idle(FORWARDER),
            store: ProcessHandle::idle(STORE),
        }
    }
}

impl DaemonPair {
    /// Replaces this pair with a fresh one.
    ///
    /// If either daemon exits during startup, whatever was already started is
    /// stopped again and `TrialError::DaemonStart` is returned.
    pub async fn restart(mut self, plan: &DaemonPlan) -> Result<DaemonPair, TrialError> {
        info!("restarting daemon pair");
        self.stop(plan.grace).await?;

        let swept = kill_strays(&plan.stray_names);
        if swept > 0 {
            warn!(swept, "killed stray daemon processes");
        }
        time::sleep(plan.restart_settle).await;

        info!(command = %plan.forwarder.command, "starting forwarder");
        let mut forwarder = launch(&plan.forwarder, &plan.forwarder_ready).await?;

        info!(command = %plan.store.command, "starting store daemon");
        let store = match launch(&plan.store, &plan.store_ready).await {
            Ok(store) => store,
            Err(e) => {
                if let Err(stop_err) = forwarder.stop(plan.grace).await {
                    warn!("failed to stop forwarder after store start failure: {stop_err}");
                }
                return Err(e);
            }
        };

        Ok(DaemonPair { forwarder, store })
    }

    /// Stops the store daemon, then the forwarder.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), SupervisorError> {
        self.store.stop(grace).await?;
        self.forwarder.stop(grace).await
    }

    /// Whether both daemons are still running.
    pub fn is_running(&mut self) -> Result<bool, SupervisorError> {
        let forwarder = self.forwarder.state() == ProcessState::Running
            && self.forwarder.poll()?.is_none();
        let store =
            self.store.state() == ProcessState::Running && self.store.poll()?.is_none();
        Ok(forwarder && store)
    }

    pub fn forwarder(&self) -> &ProcessHandle {
        &self.forwarder
    }

    pub fn store(&self) -> &ProcessHandle {
        &self.store
    }
}

async fn launch(spec: &ProcessSpec, readiness: &Readiness) -> Result<ProcessHandle, TrialError> {
    let daemon_start = |source| TrialError::DaemonStart {
        daemon: spec.name.clone(),
        source,
    };
    let mut handle = ProcessHandle::start(spec).map_err(daemon_start)?;
    if let Err(e) = readiness.await_ready(&mut handle).await {
        // a probe timeout leaves the daemon running
        if let Err(stop_err) = handle.kill().await {
            warn!(name = %spec.name, "failed to kill unready daemon: {stop_err}");
        }
        return Err(daemon_start(e));
    }
    info!(name = %spec.name, pid = ?handle.pid(), "daemon ready");
    Ok(handle)
}
