//! Incremental persistence of analyzer series
//!
//! A [`DataSink`] copies newly appended elements of the analyzer's series to
//! durable storage, tracking one cursor per series so nothing is duplicated
//! or skipped. The [`SaverWorker`] runs a sink on its own thread at a fixed
//! interval and performs one final flush on stop.

pub mod chunked;
pub mod row;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default interval between incremental flushes
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Errors raised while opening or writing a persistence destination.
///
/// Open errors are fatal to the run start; write errors terminate the saver
/// loop (the acquisition itself keeps running).
#[derive(Error, Debug)]
pub enum SaveError {
    #[error("could not create log file {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("hdf5 write failed: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted file format of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    /// Delimited text rows, peak voltages only
    #[default]
    Csv,
    /// One HDF5 container with any subset of the series
    Hdf5,
}

impl SaveFormat {
    /// File extension used for this format
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Csv => "csv",
            SaveFormat::Hdf5 => "hdf5",
        }
    }
}

impl std::fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Which series the chunked sink persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSelection {
    /// Raw samples
    pub ys: bool,
    /// Peak voltages and their timestamps
    pub processed: bool,
    /// Averaged peak voltages and their timestamps
    pub averaged: bool,
    /// Diagnostic markers and their timestamps
    pub markers: bool,
}

impl SeriesSelection {
    /// Persist everything
    pub fn all() -> Self {
        Self {
            ys: true,
            processed: true,
            averaged: true,
            markers: true,
        }
    }
}

impl Default for SeriesSelection {
    /// Raw samples and peak voltages, the usual working set
    fn default() -> Self {
        Self {
            ys: true,
            processed: true,
            averaged: false,
            markers: false,
        }
    }
}

/// One persistence destination.
///
/// Sinks open their destination eagerly at construction; a sink that cannot
/// open its file never becomes part of a run.
pub trait DataSink: Send {
    /// Copy everything appended since the previous flush
    fn flush_new(&mut self) -> Result<(), SaveError>;

    /// Release the destination; the worker flushes once more right before
    fn close(&mut self) -> Result<(), SaveError>;

    /// Destination path, for logging
    fn path(&self) -> &Path;
}

/// Log file path `<dir>/<base><yymmdd-HHMMSS>.<ext>`
pub(crate) fn timestamped_path(dir: &Path, base: &str, extension: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%y%m%d-%H%M%S");
    dir.join(format!("{base}{stamp}.{extension}"))
}

/// Handle to a running saver thread; stops and closes the sink on drop
#[derive(Debug)]
pub struct SaverWorker {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SaverWorker {
    /// Spawn the periodic flush loop over an opened sink
    pub fn spawn(mut sink: Box<dyn DataSink>, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);

        let thread = std::thread::Builder::new()
            .name("data-saver".into())
            .spawn(move || {
                tracing::info!(path = %sink.path().display(), "saver running");
                let mut deadline = Instant::now();
                loop {
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    deadline += interval;
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));

                    if let Err(e) = sink.flush_new() {
                        tracing::error!(error = %e, "saver flush failed, stopping saver");
                        break;
                    }
                }

                // Catch anything appended after the last scheduled tick
                if let Err(e) = sink.flush_new() {
                    tracing::error!(error = %e, "final flush failed");
                }
                if let Err(e) = sink.close() {
                    tracing::error!(error = %e, "closing sink failed");
                }
                tracing::info!("saver stopped");
            })
            .expect("failed to spawn saver thread");

        Self {
            stop_flag,
            thread: Some(thread),
        }
    }

    /// Stop the saver; performs the final flush before returning
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SaverWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
