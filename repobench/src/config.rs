use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use libsupervisor::{CommandSpec, OutputPolicy, ProcessSpec, Readiness};
use serde::{Deserialize, Serialize};

pub static DEFAULT_CONTENT_NAME: &str = "/example/data/1";
pub static DEFAULT_REPO_PREFIX: &str = "/example/repo";
pub static DEFAULT_REPO_DIR: &str = "/var/lib/ndn/repo/0";
pub static DEFAULT_OUTPUT: &str = "results.tsv";
pub const DEFAULT_MIN_EXP: u32 = 10;
pub const DEFAULT_MAX_EXP: u32 = 30;

/// Largest exponent whose power of two still fits a file length.
const MAX_EXPONENT: u32 = 62;

/// The payload sizes to sweep, either as a power-of-two range or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeSweep {
    Exponents { min_exp: u32, max_exp: u32 },
    List(Vec<u64>),
}

impl Default for SizeSweep {
    fn default() -> Self {
        SizeSweep::Exponents {
            min_exp: DEFAULT_MIN_EXP,
            max_exp: DEFAULT_MAX_EXP,
        }
    }
}

impl SizeSweep {
    /// Sizes in sweep order.
    pub fn values(&self) -> Vec<u64> {
        match self {
            SizeSweep::Exponents { min_exp, max_exp } => {
                (*min_exp..=*max_exp).map(|exp| 1u64 << exp).collect()
            }
            SizeSweep::List(sizes) => sizes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub command: CommandSpec,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub stdout: OutputPolicy,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub stderr: OutputPolicy,
    #[serde(default)]
    pub readiness: Readiness,
}

impl DaemonConfig {
    pub fn process_spec(&self, name: &str) -> ProcessSpec {
        ProcessSpec::new(name, self.command.clone())
            .stdout(self.stdout.clone())
            .stderr(self.stderr.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutConfig {
    pub command: CommandSpec,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_repo_prefix")]
    pub repo_prefix: String,
    /// Where payload files are generated; the system temp dir when unset.
    #[serde(default)]
    pub payload_dir: Option<PathBuf>,
}

fn default_chunk_size() -> u32 {
    8192
}

fn default_repo_prefix() -> String {
    DEFAULT_REPO_PREFIX.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetConfig {
    pub command: CommandSpec,
    /// Per-fetch limit; fetches run unbounded when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub concurrency: usize,
    pub repeat: u32,
    pub sizes: SizeSweep,
    pub output: PathBuf,
    /// Keep existing rows in `output` instead of truncating it.
    pub append: bool,
    pub repo_dir: PathBuf,
    pub content_name: String,
    pub forwarder: DaemonConfig,
    pub store: DaemonConfig,
    pub put: PutConfig,
    pub get: GetConfig,
    pub stop_grace_ms: u64,
    /// Pause between stopping the old pair and starting the new one.
    pub restart_settle_ms: u64,
    /// Process names swept with SIGKILL before each reset and restart.
    pub stray_names: Vec<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            repeat: 10,
            sizes: SizeSweep::default(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            append: false,
            repo_dir: PathBuf::from(DEFAULT_REPO_DIR),
            content_name: DEFAULT_CONTENT_NAME.to_string(),
            forwarder: DaemonConfig {
                command: CommandSpec::new("nfd"),
                stdout: OutputPolicy::Discard,
                stderr: OutputPolicy::Discard,
                readiness: Readiness::default(),
            },
            store: DaemonConfig {
                command: CommandSpec::new("build/ndn-repo-ng").args(["-c", "repo-0.conf"]),
                stdout: OutputPolicy::Discard,
                stderr: OutputPolicy::Inherit,
                readiness: Readiness::default(),
            },
            put: PutConfig {
                command: CommandSpec::new("build/tools/ndnputfile"),
                chunk_size: default_chunk_size(),
                repo_prefix: default_repo_prefix(),
                payload_dir: None,
            },
            get: GetConfig {
                command: CommandSpec::new("build/tools/ndngetfile"),
                timeout_ms: None,
            },
            stop_grace_ms: 1_000,
            restart_settle_ms: 1_000,
            stray_names: vec!["nfd".to_string(), "ndn-repo-ng".to_string()],
        }
    }
}

impl BenchConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.get.timeout_ms.map(Duration::from_millis)
    }

    /// Put invocation for one payload file:
    /// `<put> -s <chunk_size> <repo_prefix> <content_name> <file>`.
    pub fn put_spec(&self, payload: &Path) -> ProcessSpec {
        let command = self.put.command.clone().args([
            "-s".to_string(),
            self.put.chunk_size.to_string(),
            self.put.repo_prefix.clone(),
            self.content_name.clone(),
            payload.to_string_lossy().into_owned(),
        ]);
        ProcessSpec::new("put", command)
            .stdout(OutputPolicy::Inherit)
            .stderr(OutputPolicy::Inherit)
    }

    /// Get invocation: `<get> <content_name>`, output discarded.
    pub fn get_spec(&self) -> ProcessSpec {
        ProcessSpec::new("get", self.get.command.clone().arg(self.content_name.clone()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.repeat == 0 {
            bail!("repeat must be at least 1");
        }
        match &self.sizes {
            SizeSweep::Exponents { min_exp, max_exp } => {
                if min_exp > max_exp {
                    bail!("min_exp {min_exp} is greater than max_exp {max_exp}");
                }
                if *max_exp > MAX_EXPONENT {
                    bail!("max_exp {max_exp} exceeds {MAX_EXPONENT}");
                }
            }
            SizeSweep::List(sizes) if sizes.is_empty() => bail!("size list is empty"),
            SizeSweep::List(_) => {}
        }
        if self.content_name.is_empty() {
            bail!("content_name must not be empty");
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BenchConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: BenchConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizes_are_powers_of_two() {
        let sizes = SizeSweep::default().values();
        assert_eq!(sizes.len(), 21);
        assert_eq!(sizes[0], 1024);
        assert_eq!(*sizes.last().unwrap(), 1 << 30);
        assert!(sizes.windows(2).all(|w| w[1] == w[0] * 2));
    }

    #[test]
    fn test_put_spec_argument_order() {
        let cfg = BenchConfig::default();
        let spec = cfg.put_spec(Path::new("/tmp/payload"));
        assert_eq!(spec.command.program, "build/tools/ndnputfile");
        assert_eq!(
            spec.command.args,
            vec!["-s", "8192", "/example/repo", "/example/data/1", "/tmp/payload"]
        );
        let get = cfg.get_spec();
        assert_eq!(get.command.args, vec!["/example/data/1"]);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
concurrency: 4
sizes: [1024, 4096]
forwarder:
  command:
    program: /usr/bin/nfd
  readiness:
    kind: probe
    command:
      program: nfdc
      args: [status]
    timeout_ms: 10000
store:
  command:
    program: ndn-repo-ng
    args: ["-c", "/etc/ndn/repo.conf"]
  stderr:
    file: /tmp/repo.err
get:
  command:
    program: ndngetfile
  timeout_ms: 30000
"#;
        let cfg: BenchConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.repeat, 10);
        assert_eq!(cfg.sizes.values(), vec![1024, 4096]);
        assert_eq!(cfg.forwarder.command.program, "/usr/bin/nfd");
        assert!(matches!(
            cfg.forwarder.readiness,
            Readiness::Probe {
                initial_backoff_ms: 100,
                timeout_ms: 10000,
                ..
            }
        ));
        assert_eq!(cfg.store.readiness, Readiness::Settle { delay_ms: 5000 });
        assert_eq!(cfg.store.stderr, OutputPolicy::File("/tmp/repo.err".into()));
        assert_eq!(cfg.fetch_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.put, BenchConfig::default().put);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_exponent_sizes_from_yaml() {
        let cfg: BenchConfig = serde_yaml::from_str("sizes: {min_exp: 12, max_exp: 14}").unwrap();
        assert_eq!(cfg.sizes.values(), vec![4096, 8192, 16384]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = BenchConfig::default();
        cfg.concurrency = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = BenchConfig::default();
        cfg.repeat = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = BenchConfig::default();
        cfg.sizes = SizeSweep::Exponents {
            min_exp: 20,
            max_exp: 10,
        };
        assert!(cfg.validate().is_err());

        let mut cfg = BenchConfig::default();
        cfg.sizes = SizeSweep::List(vec![]);
        assert!(cfg.validate().is_err());

        BenchConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.yaml");
        fs::write(&path, "repeat: 3\noutput: /tmp/out.tsv\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.repeat, 3);
        assert_eq!(cfg.output, PathBuf::from("/tmp/out.tsv"));

        assert!(load_config(dir.path().join("missing.yaml")).is_err());
    }
}
