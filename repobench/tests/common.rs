use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use libsupervisor::{CommandSpec, OutputPolicy, Readiness};
use repobench::{BenchConfig, ResultSink, SizeSweep, SweepController, SweepSummary};

pub fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").args(["-c", script])
}

/// A config whose daemons and tools are shell scripts rooted in `dir`.
///
/// The put script sees `-s <chunk> <prefix> <name> <file>` as `$0..$4`.
pub fn bench_config(dir: &Path) -> BenchConfig {
    let mut cfg = BenchConfig::default();
    cfg.concurrency = 3;
    cfg.repeat = 2;
    cfg.sizes = SizeSweep::List(vec![1024]);
    cfg.output = dir.join("results.tsv");
    cfg.repo_dir = dir.join("repo/0");
    cfg.forwarder.command = sh("exec sleep 30");
    cfg.forwarder.readiness = Readiness::settle(Duration::from_millis(50));
    cfg.store.command = sh("exec sleep 30");
    cfg.store.stderr = OutputPolicy::Discard;
    cfg.store.readiness = Readiness::settle(Duration::from_millis(50));
    cfg.put.command = sh("exit 0");
    cfg.put.payload_dir = Some(dir.to_path_buf());
    cfg.get.command = sh("exit 0");
    cfg.stop_grace_ms = 500;
    cfg.restart_settle_ms = 0;
    cfg.stray_names = vec![];
    cfg
}

pub async fn run_sweep(cfg: &BenchConfig) -> SweepSummary {
    let sink = ResultSink::create(&cfg.output, cfg.append).unwrap();
    let mut sweep = SweepController::new(cfg, sink).echo(false);
    sweep.run(&cfg.sizes.values()).await.unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub size: u64,
    pub trial: u32,
    pub request_id: usize,
    pub status: i32,
}

#[allow(dead_code)]
pub fn read_rows(path: &PathBuf) -> Vec<Row> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let fields: Vec<_> = line.split('\t').collect();
            assert_eq!(fields.len(), 5, "malformed row {line:?}");
            let seconds: f64 = fields[4].parse().unwrap();
            assert!(seconds >= 0.0);
            assert_eq!(fields[4].split('.').nth(1).map(str::len), Some(6));
            Row {
                size: fields[0].parse().unwrap(),
                trial: fields[1].parse().unwrap(),
                request_id: fields[2].parse().unwrap(),
                status: fields[3].parse().unwrap(),
            }
        })
        .collect()
}
