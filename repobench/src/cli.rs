use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{BenchConfig, DEFAULT_MAX_EXP, DEFAULT_MIN_EXP, SizeSweep, load_config};

#[derive(Parser, Debug)]
#[command(name = "repobench")]
#[command(version, about = "Retrieval latency benchmark for a repository daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// YAML config file; flags given here override it
    #[arg(short, long, env = "REPOBENCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Result file (tab separated)
    #[arg(short, long, env = "REPOBENCH_OUTPUT", global = true)]
    pub output: Option<PathBuf>,

    /// Keep existing rows in the result file
    #[arg(long, global = true)]
    pub append: bool,

    /// Parallel fetches per trial
    #[arg(short = 'n', long, env = "REPOBENCH_CONCURRENCY", global = true)]
    pub concurrency: Option<usize>,

    /// Trials per payload size
    #[arg(short, long, env = "REPOBENCH_REPEAT", global = true)]
    pub repeat: Option<u32>,

    /// Explicit payload sizes in bytes
    #[arg(
        long,
        value_delimiter = ',',
        conflicts_with_all = ["min_exp", "max_exp"],
        global = true
    )]
    pub sizes: Option<Vec<u64>>,

    /// Smallest payload is 2^MIN_EXP bytes
    #[arg(long, global = true)]
    pub min_exp: Option<u32>,

    /// Largest payload is 2^MAX_EXP bytes
    #[arg(long, global = true)]
    pub max_exp: Option<u32>,

    /// Store daemon state directory, deleted before every size
    #[arg(long, env = "REPOBENCH_REPO_DIR", global = true)]
    pub repo_dir: Option<PathBuf>,

    /// Kill a fetch that runs longer than this
    #[arg(long, global = true)]
    pub fetch_timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Run the benchmark sweep (default)")]
    Run,
    #[command(about = "Print the effective configuration as YAML")]
    PrintConfig,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }

    /// Built-in defaults, then the config file, then flags.
    pub fn resolve(&self) -> Result<BenchConfig> {
        let mut cfg = match &self.config {
            Some(path) => load_config(path)?,
            None => BenchConfig::default(),
        };

        if let Some(output) = &self.output {
            cfg.output = output.clone();
        }
        if self.append {
            cfg.append = true;
        }
        if let Some(concurrency) = self.concurrency {
            cfg.concurrency = concurrency;
        }
        if let Some(repeat) = self.repeat {
            cfg.repeat = repeat;
        }
        if let Some(sizes) = &self.sizes {
            cfg.sizes = SizeSweep::List(sizes.clone());
        } else if self.min_exp.is_some() || self.max_exp.is_some() {
            let (min, max) = match cfg.sizes {
                SizeSweep::Exponents { min_exp, max_exp } => (min_exp, max_exp),
                SizeSweep::List(_) => (DEFAULT_MIN_EXP, DEFAULT_MAX_EXP),
            };
            cfg.sizes = SizeSweep::Exponents {
                min_exp: self.min_exp.unwrap_or(min),
                max_exp: self.max_exp.unwrap_or(max),
            };
        }
        if let Some(repo_dir) = &self.repo_dir {
            cfg.repo_dir = repo_dir.clone();
        }
        if let Some(ms) = self.fetch_timeout_ms {
            cfg.get.timeout_ms = Some(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
