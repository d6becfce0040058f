//! Append-only CSV log, one file per session.
//!
//! Layout: `<data_root>/experiment_data/mining_data_<YYYYMMDD_HHmmss>.csv`
//! with the header `Timestamp,Iteration,HashRate`. Every row is written by
//! reopening the file in append mode, writing, flushing and closing it again,
//! so a crash never leaves a buffered row behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

/// Directory created under the data root.
pub const DATA_DIR_NAME: &str = "experiment_data";

/// First line of every log file.
pub const CSV_HEADER: &str = "Timestamp,Iteration,HashRate";

/// Timestamp format of the first column.
pub const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp format embedded in the file name.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Upper bound on `-<n>` suffixes tried when two sessions start in the same second.
const MAX_NAME_SUFFIX: u32 = 1000;

/// One row of the log.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    pub timestamp: NaiveDateTime,
    pub iteration: u64,
    /// Iterations per second derived from the measured duration.
    pub rate: f64,
}

impl MetricRecord {
    /// Render the record as a CSV line, including the trailing newline.
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{:.2}\n",
            self.timestamp.format(ROW_TIMESTAMP_FORMAT),
            self.iteration,
            self.rate
        )
    }
}

/// Handle to the current session's log file.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    /// Create the data directory if needed, then a fresh log file named after
    /// `started_at`, and write the header row.
    ///
    /// An existing file is never truncated: if the name is taken, `-1`, `-2`,
    /// ... is appended to the stem until a free name is found.
    pub fn create(data_root: &Path, started_at: NaiveDateTime) -> Result<Self> {
        let dir = data_root.join(DATA_DIR_NAME);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;

        let stem = format!("mining_data_{}", started_at.format(FILE_TIMESTAMP_FORMAT));
        let (path, mut file) = create_unique(&dir, &stem)?;

        file.write_all(CSV_HEADER.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .with_context(|| format!("writing header to {}", path.display()))?;

        log::info!("metrics log file: {}", path.display());
        Ok(Self { path })
    }

    /// Append one record: open in append mode, write, flush, close.
    pub fn append(&self, record: &MetricRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {} for append", self.path.display()))?;
        file.write_all(record.to_csv_line().as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("appending iteration {}", record.iteration))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    for n in 0..MAX_NAME_SUFFIX {
        let name = if n == 0 {
            format!("{stem}.csv")
        } else {
            format!("{stem}-{n}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("creating {}", path.display()));
            }
        }
    }
    anyhow::bail!(
        "no free log file name for {stem} in {} after {MAX_NAME_SUFFIX} attempts",
        dir.display()
    )
}
