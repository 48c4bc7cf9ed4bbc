//! Round trip times of the upload/response cycle, one CSV row each.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Debug)]
pub struct LagLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl LagLog {
    /// Truncates `path` and writes the `time,lag` header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to create lag log {:?}", path))?;
        writeln!(file, "time,lag")?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a row with the local wall clock time and the lag in seconds.
    pub fn record(&self, lag: Duration) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        writeln!(
            file,
            "{},{:.6}",
            chrono::Local::now().format("%H:%M:%S%.6f"),
            lag.as_secs_f64()
        )?;
        Ok(())
    }
}
