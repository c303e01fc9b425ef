use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::StreamExt;
use libsupervisor::kill_strays;
use tracing::{debug, error, info, warn};

use crate::config::BenchConfig;
use crate::report;
use crate::sink::ResultSink;
use crate::trial::TrialRunner;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub sizes_completed: usize,
    pub sizes_abandoned: usize,
    pub rows_written: usize,
}

/// Drives the trial runner over every payload size, one size at a time.
pub struct SweepController {
    runner: TrialRunner,
    repo_dir: PathBuf,
    stray_names: Vec<String>,
    sink: ResultSink,
    echo: bool,
}

impl SweepController {
    pub fn new(cfg: &BenchConfig, sink: ResultSink) -> Self {
        Self {
            runner: TrialRunner::new(cfg),
            repo_dir: cfg.repo_dir.clone(),
            stray_names: cfg.stray_names.clone(),
            sink,
            echo: true,
        }
    }

    /// Turns printing each batch to stdout on or off.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Runs every size in order. A size whose put or daemon start fails is
    /// logged and skipped; only a failure to write results stops the sweep.
    pub async fn run(&mut self, sizes: &[u64]) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();

        for &size in sizes {
            let swept = kill_strays(&self.stray_names);
            if swept > 0 {
                warn!(swept, "killed stray daemon processes before reset");
            }
            reset_repository(&self.repo_dir);

            let mut abandoned = false;
            let batches = self.runner.run_size(size);
            futures::pin_mut!(batches);
            while let Some(item) = batches.next().await {
                match item {
                    Ok(batch) => {
                        self.sink.append(&batch.rows).with_context(|| {
                            format!("failed to write results to {}", self.sink.path().display())
                        })?;
                        summary.rows_written += batch.rows.len();
                        if self.echo {
                            match report::render_batch(&batch) {
                                Ok(table) => print!("{table}"),
                                Err(e) => warn!("failed to render batch: {e}"),
                            }
                        }
                    }
                    Err(e) => {
                        error!(size, "abandoning size: {e}");
                        abandoned = true;
                    }
                }
            }

            if abandoned {
                summary.sizes_abandoned += 1;
            } else {
                info!(size, "size complete");
                summary.sizes_completed += 1;
            }
        }

        Ok(summary)
    }
}

/// Deletes the store daemon's on-disk state. A missing directory counts as
/// already reset; other failures are logged and otherwise ignored.
pub fn reset_repository(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => info!(dir = %dir.display(), "repository state reset"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "no repository state to reset")
        }
        Err(e) => warn!(dir = %dir.display(), "failed to reset repository state: {e}"),
    }
}
