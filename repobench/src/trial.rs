use std::path::Path;
use std::time::Duration;

use futures::stream::{self, Stream};
use libsupervisor::{ProcessHandle, ProcessSpec, exit_code};
use tracing::{info, warn};

use crate::config::BenchConfig;
use crate::daemon::{DaemonPair, DaemonPlan};
use crate::dispatch::{FetchDispatcher, FetchOutcome};
use crate::error::TrialError;
use crate::payload;
use crate::sink::ResultRow;

/// All rows measured in one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialBatch {
    pub size: u64,
    pub trial: u32,
    pub rows: Vec<ResultRow>,
}

impl TrialBatch {
    pub fn new(size: u64, trial: u32, outcomes: &[FetchOutcome]) -> Self {
        Self {
            size,
            trial,
            rows: outcomes
                .iter()
                .map(|outcome| ResultRow::new(size, trial, outcome))
                .collect(),
        }
    }
}

/// Runs the put phase and the repeated trials for one payload size.
pub struct TrialRunner {
    plan: DaemonPlan,
    dispatcher: FetchDispatcher,
    bench: BenchConfig,
}

impl TrialRunner {
    pub fn new(bench: &BenchConfig) -> Self {
        Self {
            plan: DaemonPlan::from_config(bench),
            dispatcher: FetchDispatcher::new(bench.get_spec(), bench.fetch_timeout()),
            bench: bench.clone(),
        }
    }

    pub fn plan(&self) -> &DaemonPlan {
        &self.plan
    }

    /// Lazily yields one batch per trial for `size`.
    ///
    /// Nothing runs until the stream is polled. A put failure or a daemon
    /// start failure is yielded as the final item; in both cases no further
    /// trials run for this size. The daemon pair is stopped before the stream
    /// ends.
    pub fn run_size(
        &self,
        size: u64,
    ) -> impl Stream<Item = Result<TrialBatch, TrialError>> + '_ {
        stream::unfold(SizeRun::new(self, size), |mut run| async move {
            let item = run.advance().await?;
            Some((item, run))
        })
    }

    fn put_spec(&self, payload: &Path) -> ProcessSpec {
        self.bench.put_spec(payload)
    }

    fn payload_dir(&self) -> Option<&Path> {
        self.bench.put.payload_dir.as_deref()
    }

    fn grace(&self) -> Duration {
        self.plan.grace
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Load,
    Trial(u32),
    Done,
}

/// Progress through one size. The daemon pair lives here, not in any global.
struct SizeRun<'a> {
    runner: &'a TrialRunner,
    size: u64,
    phase: Phase,
    pair: Option<DaemonPair>,
}

impl<'a> SizeRun<'a> {
    fn new(runner: &'a TrialRunner, size: u64) -> Self {
        Self {
            runner,
            size,
            phase: Phase::Load,
            pair: None,
        }
    }

    async fn advance(&mut self) -> Option<Result<TrialBatch, TrialError>> {
        loop {
            match self.phase {
                Phase::Load => match self.load().await {
                    Ok(()) => self.phase = Phase::Trial(0),
                    Err(e) => {
                        self.finish().await;
                        return Some(Err(e));
                    }
                },
                Phase::Trial(trial) if trial < self.runner.bench.repeat => {
                    match self.trial(trial).await {
                        Ok(batch) => {
                            self.phase = Phase::Trial(trial + 1);
                            return Some(Ok(batch));
                        }
                        Err(e) => {
                            self.finish().await;
                            return Some(Err(e));
                        }
                    }
                }
                Phase::Trial(_) => {
                    self.finish().await;
                    return None;
                }
                Phase::Done => return None,
            }
        }
    }

    async fn load(&mut self) -> Result<(), TrialError> {
        info!(size = self.size, "testing payload size");
        let payload = payload::generate(self.runner.payload_dir(), self.size)
            .map_err(|source| TrialError::Payload {
                size: self.size,
                source,
            })?;

        self.restart_pair().await?;

        let spec = self.runner.put_spec(payload.path());
        info!(size = self.size, command = %spec.command, "putting payload");
        let status = exit_code(&ProcessHandle::run_to_completion(&spec).await?);
        info!(size = self.size, status, "put finished");
        if status != 0 {
            return Err(TrialError::PutFailed {
                size: self.size,
                status,
            });
        }
        Ok(())
    }

    async fn trial(&mut self, trial: u32) -> Result<TrialBatch, TrialError> {
        info!(size = self.size, trial, "starting trial");
        self.restart_pair().await?;
        let outcomes = self
            .runner
            .dispatcher
            .run(self.runner.bench.concurrency)
            .await;
        Ok(TrialBatch::new(self.size, trial, &outcomes))
    }

    async fn restart_pair(&mut self) -> Result<(), TrialError> {
        let pair = self.pair.take().unwrap_or_default();
        self.pair = Some(pair.restart(&self.runner.plan).await?);
        Ok(())
    }

    async fn finish(&mut self) {
        self.phase = Phase::Done;
        if let Some(mut pair) = self.pair.take() {
            if let Err(e) = pair.stop(self.runner.grace()).await {
                warn!(size = self.size, "failed to stop daemon pair: {e}");
            }
        }
    }
}
