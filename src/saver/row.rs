//! CSV row sink for peak voltages

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer::PulseAnalyzer;
use crate::saver::{DataSink, SaveError};

/// Appends one `timestamp,voltage` row per detected peak.
///
/// The header row is written at construction; every flush copies the peaks
/// appended since the previous one.
pub struct RowSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    analyzer: Arc<PulseAnalyzer>,
    cursor: usize,
}

impl RowSink {
    /// Create the file and write the header
    pub fn create(path: PathBuf, analyzer: Arc<PulseAnalyzer>) -> Result<Self, SaveError> {
        let file = File::create(&path).map_err(|source| SaveError::Create {
            path: path.clone(),
            source,
        })?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["timestamps", "processed_ys"])?;
        writer.flush()?;

        Ok(Self {
            path,
            writer,
            analyzer,
            cursor: 0,
        })
    }
}

impl DataSink for RowSink {
    fn flush_new(&mut self) -> Result<(), SaveError> {
        let new = self.analyzer.processed().slice_from(self.cursor);
        if new.is_empty() {
            return Ok(());
        }
        for entry in &new {
            self.writer.write_record([
                (entry.timestamp as u64).to_string(),
                entry.value.to_string(),
            ])?;
        }
        self.cursor += new.len();
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SaveError> {
        self.writer.flush()?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
