use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: &str = "Date,Amount";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Progress log I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Append-only CSV of `timestamp,amount` rows, e.g. paths found over time.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row stamped with the current local time. The header is
    /// written first if the file does not exist yet.
    pub fn append(&self, amount: u64) -> Result<(), ProgressError> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.append_row(&stamp, amount)
    }

    fn append_row(&self, stamp: &str, amount: u64) -> Result<(), ProgressError> {
        let io_err = |source| ProgressError::Io {
            path: self.path.clone(),
            source,
        };

        let needs_header = !self.path.exists();
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        if needs_header {
            writeln!(writer, "{HEADER}").map_err(io_err)?;
        }
        writeln!(writer, "{stamp},{amount}").map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}
