//! CSV file sink
//!
//! One file per channel under `<directory>/<subject>/`, e.g.
//! `data/Experiment_1/acc_data.csv`. Rows are buffered and pushed to disk on
//! `flush`, which the dispatcher calls before any reconnect and on stop.

use super::{SampleSink, SinkRegistry};
use crate::error::{Error, Result};
use crate::protocol::{Field, SubscriptionSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffered CSV writer for one channel
pub struct CsvSink {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: u64,
}

impl CsvSink {
    /// Create (truncate) the file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| Error::Sink(format!("Failed to create {}: {}", path.display(), e)))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far (header excluded)
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    fn io_err(&self, e: std::io::Error) -> Error {
        Error::Sink(format!("{}: {}", self.path.display(), e))
    }
}

impl SampleSink for CsvSink {
    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        writeln!(self.writer, "{}", columns.join(",")).map_err(|e| self.io_err(e))
    }

    fn append(&mut self, row: &[Field]) -> Result<()> {
        let mut first = true;
        for field in row {
            if !first {
                self.writer.write_all(b",").map_err(|e| self.io_err(e))?;
            }
            write!(self.writer, "{}", field).map_err(|e| self.io_err(e))?;
            first = false;
        }
        self.writer.write_all(b"\n").map_err(|e| self.io_err(e))?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.io_err(e))
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::error!("Final flush of {} failed: {}", self.path.display(), e);
        }
    }
}

/// Create the session folder and one CSV sink per subscribed channel
pub fn open_csv_sinks<P: AsRef<Path>>(
    directory: P,
    subject_id: &str,
    subscriptions: &SubscriptionSet,
) -> Result<SinkRegistry> {
    let session_dir = directory.as_ref().join(subject_id);
    fs::create_dir_all(&session_dir).map_err(|e| {
        Error::Sink(format!("Failed to create {}: {}", session_dir.display(), e))
    })?;
    log::info!("Writing session data to {}", session_dir.display());

    let mut registry = SinkRegistry::new();
    for channel in subscriptions.channels() {
        let path = session_dir.join(format!("{}_data.csv", channel.file_stem()));
        registry.insert(channel, Box::new(CsvSink::create(&path)?));
        log::debug!("{} -> {}", channel, path.display());
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelKind;
    use tempfile::TempDir;

    #[test]
    fn test_csv_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("acc_data.csv");

        let mut sink = CsvSink::create(&path).unwrap();
        assert_eq!(sink.path(), path.as_path());
        sink.write_header(ChannelKind::Accel.columns()).unwrap();
        sink.append(&[Field::Float(1.0), Field::Int(10), Field::Int(20), Field::Int(30)])
            .unwrap();
        sink.append(&[Field::Float(1.03125), Field::Int(-1), Field::Int(0), Field::Int(64)])
            .unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.row_count(), 2);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "timestamp,x,y,z\n1.0,10,20,30\n1.03125,-1,0,64\n");
    }

    #[test]
    fn test_open_csv_sinks_creates_files() {
        let temp_dir = TempDir::new().unwrap();
        let subs = SubscriptionSet::new()
            .with(ChannelKind::Ibi)
            .with(ChannelKind::HeartRate)
            .with(ChannelKind::Temperature);

        let mut registry = open_csv_sinks(temp_dir.path(), "Experiment_3", &subs).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(ChannelKind::HeartRate));
        registry.write_headers(&subs).unwrap();
        registry.flush_all().unwrap();

        let dir = temp_dir.path().join("Experiment_3");
        assert_eq!(
            fs::read_to_string(dir.join("hr_data.csv")).unwrap(),
            "timestamp,HR\n"
        );
        assert_eq!(
            fs::read_to_string(dir.join("tmp_data.csv")).unwrap(),
            "timestamp,Tmp\n"
        );
        assert!(dir.join("ibi_data.csv").exists());
        assert!(!dir.join("acc_data.csv").exists());
    }
}
