use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::dispatch::FetchOutcome;

/// One persisted measurement: a single fetch of one trial at one size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultRow {
    pub size: u64,
    pub trial: u32,
    pub request_id: usize,
    pub status: i32,
    pub duration: Duration,
}

impl ResultRow {
    pub fn new(size: u64, trial: u32, outcome: &FetchOutcome) -> Self {
        Self {
            size,
            trial,
            request_id: outcome.id,
            status: outcome.status,
            duration: outcome.duration,
        }
    }
}

/// `size\ttrial\trequest_id\tstatus\tseconds`, seconds with microsecond
/// precision.
impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{:.6}",
            self.size,
            self.trial,
            self.request_id,
            self.status,
            self.duration.as_secs_f64()
        )
    }
}

/// Append-only TSV writer for the whole run.
///
/// Every [`ResultSink::append`] ends with a flush and an fdatasync, so a crash
/// loses at most the batch being written.
pub struct ResultSink {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: usize,
}

impl ResultSink {
    /// Opens `path` once for the run. Existing content is kept when `append`
    /// is set and discarded otherwise.
    pub fn create<P: AsRef<Path>>(path: P, append: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if !append {
            file.set_len(0)?;
        }
        debug!(path = %path.display(), append, "result sink opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn append(&mut self, rows: &[ResultRow]) -> io::Result<()> {
        for row in rows {
            writeln!(self.writer, "{row}")?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.rows += rows.len();
        Ok(())
    }

    /// Rows written through this sink, not counting pre-existing content.
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn row(trial: u32, request_id: usize, status: i32, micros: u64) -> ResultRow {
        ResultRow {
            size: 1024,
            trial,
            request_id,
            status,
            duration: Duration::from_micros(micros),
        }
    }

    #[test]
    fn test_row_format() {
        assert_eq!(row(1, 2, 0, 1_500_000).to_string(), "1024\t1\t2\t0\t1.500000");
        assert_eq!(row(0, 9, -255, 42).to_string(), "1024\t0\t9\t-255\t0.000042");
    }

    #[test]
    fn test_each_batch_is_durable_and_prior_batches_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.tsv");
        let mut sink = ResultSink::create(&path, false).unwrap();

        sink.append(&[row(0, 0, 0, 10), row(0, 1, 1, 20)]).unwrap();
        // readable without dropping the sink: nothing sits in the buffer
        let after_first = fs::read_to_string(&path).unwrap();
        assert_eq!(after_first, "1024\t0\t0\t0\t0.000010\n1024\t0\t1\t1\t0.000020\n");

        sink.append(&[row(1, 0, 0, 30)]).unwrap();
        let after_second = fs::read_to_string(&path).unwrap();
        assert!(after_second.starts_with(&after_first));
        assert!(after_second.ends_with('\n'));
        assert_eq!(after_second.lines().count(), 3);
        assert_eq!(sink.rows_written(), 3);
    }

    #[test]
    fn test_truncate_and_append_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.tsv");
        fs::write(&path, "stale\n").unwrap();

        let mut sink = ResultSink::create(&path, true).unwrap();
        sink.append(&[row(0, 0, 0, 1)]).unwrap();
        drop(sink);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);

        let mut sink = ResultSink::create(&path, false).unwrap();
        sink.append(&[row(0, 0, 0, 1)]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1024\t0\t0\t0\t0.000001\n");
        assert_eq!(sink.path(), path.as_path());
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.tsv");
        let mut sink = ResultSink::create(&path, false).unwrap();
        sink.append(&[]).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }
}
