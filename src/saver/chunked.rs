//! HDF5 chunked sink for the analyzer series

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hdf5::Dataset;

use crate::analyzer::PulseAnalyzer;
use crate::saver::{DataSink, SaveError, SeriesSelection};

/// Rows appended per HDF5 chunk
const CHUNK_LEN: usize = 1024;

/// One unlimited 1-d dataset plus the copy cursor into its source series
struct Column {
    dataset: Dataset,
    cursor: usize,
}

impl Column {
    fn create<T: hdf5::H5Type>(file: &hdf5::File, name: &str) -> Result<Self, SaveError> {
        let dataset = file
            .new_dataset::<T>()
            .chunk(CHUNK_LEN)
            .shape(0..)
            .create(name)?;
        Ok(Self { dataset, cursor: 0 })
    }

    fn append_f32(&mut self, values: &[f64]) -> Result<(), SaveError> {
        if values.is_empty() {
            return Ok(());
        }
        let vals: Vec<f32> = values.iter().map(|&v| v as f32).collect();
        self.dataset.resize((self.cursor + vals.len(),))?;
        self.dataset.write_slice(&vals, self.cursor..)?;
        self.cursor += vals.len();
        Ok(())
    }

    fn append_f64(&mut self, values: &[f64]) -> Result<(), SaveError> {
        if values.is_empty() {
            return Ok(());
        }
        self.dataset.resize((self.cursor + values.len(),))?;
        self.dataset.write_slice(values, self.cursor..)?;
        self.cursor += values.len();
        Ok(())
    }
}

/// Value/timestamp dataset pair backed by one `Entry` series
struct EntryColumns {
    values: Column,
    timestamps: Column,
}

impl EntryColumns {
    fn create(
        file: &hdf5::File,
        value_name: &str,
        timestamp_name: &str,
    ) -> Result<Self, SaveError> {
        Ok(Self {
            values: Column::create::<f32>(file, value_name)?,
            timestamps: Column::create::<f64>(file, timestamp_name)?,
        })
    }
}

/// Persists the selected series into one HDF5 container.
///
/// Values are stored as `f32`, timestamps as `f64`. Run parameters go into
/// root attributes so a file is interpretable on its own.
pub struct ChunkedSink {
    path: PathBuf,
    file: hdf5::File,
    analyzer: Arc<PulseAnalyzer>,
    ys: Option<Column>,
    processed: Option<EntryColumns>,
    averaged: Option<EntryColumns>,
    markers: Option<EntryColumns>,
}

impl ChunkedSink {
    /// Create the container, write the run attributes and the selected
    /// (initially empty) datasets
    pub fn create(
        path: PathBuf,
        analyzer: Arc<PulseAnalyzer>,
        selection: SeriesSelection,
    ) -> Result<Self, SaveError> {
        let file = hdf5::File::create(&path)?;

        file.new_attr::<f64>()
            .create("freq")?
            .write_scalar(&analyzer.freq())?;
        file.new_attr::<f64>()
            .create("edge_detection_threshold")?
            .write_scalar(&analyzer.edge_detection_threshold())?;
        file.new_attr::<u32>()
            .create("average_count")?
            .write_scalar(&(analyzer.average_count() as u32))?;

        let ys = selection
            .ys
            .then(|| Column::create::<f32>(&file, "ys"))
            .transpose()?;
        let processed = selection
            .processed
            .then(|| EntryColumns::create(&file, "processed_ys", "processed_timestamps"))
            .transpose()?;
        let averaged = selection
            .averaged
            .then(|| {
                EntryColumns::create(
                    &file,
                    "averaged_processed_ys",
                    "averaged_processed_timestamps",
                )
            })
            .transpose()?;
        let markers = selection
            .markers
            .then(|| EntryColumns::create(&file, "markers", "marker_timestamps"))
            .transpose()?;

        Ok(Self {
            path,
            file,
            analyzer,
            ys,
            processed,
            averaged,
            markers,
        })
    }

    fn flush_entries(
        columns: &mut EntryColumns,
        series: &crate::series::Series<crate::series::Entry>,
    ) -> Result<(), SaveError> {
        let new = series.slice_from(columns.values.cursor);
        if new.is_empty() {
            return Ok(());
        }
        let values: Vec<f64> = new.iter().map(|e| e.value).collect();
        let timestamps: Vec<f64> = new.iter().map(|e| e.timestamp).collect();
        columns.values.append_f32(&values)?;
        columns.timestamps.append_f64(&timestamps)?;
        Ok(())
    }
}

impl DataSink for ChunkedSink {
    fn flush_new(&mut self) -> Result<(), SaveError> {
        if let Some(ref mut column) = self.ys {
            let new = self.analyzer.ys().slice_from(column.cursor);
            column.append_f32(&new)?;
        }
        if let Some(ref mut columns) = self.processed {
            Self::flush_entries(columns, self.analyzer.processed())?;
        }
        if let Some(ref mut columns) = self.averaged {
            Self::flush_entries(columns, self.analyzer.averaged())?;
        }
        if let Some(ref mut columns) = self.markers {
            Self::flush_entries(columns, self.analyzer.markers())?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SaveError> {
        self.file.flush()?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
