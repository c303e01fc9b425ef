pub mod cli;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod payload;
pub mod report;
pub mod sink;
pub mod sweep;
pub mod trial;

// re-export selected public API
pub use config::{BenchConfig, SizeSweep, load_config};
pub use error::TrialError;
pub use sink::{ResultRow, ResultSink};
pub use sweep::{SweepController, SweepSummary};
