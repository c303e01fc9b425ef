use anyhow::{Context, Result};
use clap::Parser;
use libsupervisor::kill_strays;
use repobench::cli::{Cli, Commands};
use repobench::{BenchConfig, ResultSink, SweepController};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = cli.resolve()?;

    match cli.command() {
        Commands::PrintConfig => {
            print!("{}", serde_yaml::to_string(&cfg)?);
            Ok(())
        }
        Commands::Run => run(cfg).await,
    }
}

async fn run(cfg: BenchConfig) -> Result<()> {
    let sizes = cfg.sizes.values();
    let sink = ResultSink::create(&cfg.output, cfg.append)
        .with_context(|| format!("failed to open result file {}", cfg.output.display()))?;
    info!(
        output = %cfg.output.display(),
        sizes = sizes.len(),
        concurrency = cfg.concurrency,
        repeat = cfg.repeat,
        "starting sweep"
    );

    let mut sweep = SweepController::new(&cfg, sink);
    let outcome = tokio::select! {
        summary = sweep.run(&sizes) => summary.map(Some),
        _ = shutdown_signal() => {
            warn!("interrupted, stopping daemons");
            Ok(None)
        }
    };
    drop(sweep);

    // children of the dropped sweep are killed on drop; this catches anything
    // they left behind
    let swept = kill_strays(&cfg.stray_names);
    if swept > 0 {
        warn!(swept, "killed stray daemon processes on exit");
    }

    if let Some(summary) = outcome? {
        info!(
            completed = summary.sizes_completed,
            abandoned = summary.sizes_abandoned,
            rows = summary.rows_written,
            "sweep finished"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
