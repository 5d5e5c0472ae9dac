//! Run lifecycle: at most one acquisition at a time
//!
//! The supervisor wires a sample source, the analyzer, an optional saver and
//! an optional rate monitor into one run, and tears them down in the right
//! order. Starting a run while another is active stops the old one first.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::analyzer::PulseAnalyzer;
use crate::config::{AnalysisConfig, ConfigError};
use crate::monitor::{MonitorHandle, RateMonitor};
use crate::saver::chunked::ChunkedSink;
use crate::saver::row::RowSink;
use crate::saver::{
    timestamped_path, DataSink, SaveError, SaveFormat, SaverWorker, SeriesSelection,
    DEFAULT_SAVE_INTERVAL,
};
use crate::source::device::{DaqHost, DeviceSource};
use crate::source::replay::ReplaySource;
use crate::source::synthetic::SyntheticSource;
use crate::source::{SampleSource, SourceError, SourceWorker};

/// Where a run's samples come from
#[derive(Clone)]
pub enum SourceConfig {
    /// The attached acquisition hardware
    Device(Arc<dyn DaqHost>),
    /// A recorded trace replayed at the nominal rate
    Replay(PathBuf),
    /// A deterministic generated pulse train
    Synthetic {
        /// Stop after this many samples; `None` runs until stopped
        sample_limit: Option<usize>,
    },
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceConfig::Device(_) => f.write_str("Device"),
            SourceConfig::Replay(path) => f.debug_tuple("Replay").field(path).finish(),
            SourceConfig::Synthetic { sample_limit } => f
                .debug_struct("Synthetic")
                .field("sample_limit", sample_limit)
                .finish(),
        }
    }
}

/// Per-run choices beyond the source
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Base name of the log file; `None` disables persistence
    pub save_name: Option<String>,
    pub format: SaveFormat,
    pub selection: SeriesSelection,
    pub config: AnalysisConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            save_name: None,
            format: SaveFormat::default(),
            selection: SeriesSelection::default(),
            config: AnalysisConfig::default(),
        }
    }
}

/// Why a run could not start
#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid analysis configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("sample source failed: {0}")]
    Source(#[from] SourceError),

    #[error("could not open log destination: {0}")]
    Save(#[from] SaveError),

    #[error("could not create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

struct ActiveRun {
    analyzer: Arc<PulseAnalyzer>,
    source: SourceWorker,
    saver: Option<SaverWorker>,
    monitor: Option<MonitorHandle>,
    irregular_monitor: Option<MonitorHandle>,
}

/// Owns the single active run, if any.
///
/// # Example
///
/// ```no_run
/// use pindaq::supervisor::{RunOptions, RunSupervisor, SourceConfig};
///
/// let supervisor = RunSupervisor::new(
///     SourceConfig::Replay("trace.txt".into()),
///     "logs".into(),
///     50_000.0,
/// );
/// supervisor.start_run(RunOptions::default())?;
/// // ... observe supervisor.analyzer() ...
/// supervisor.stop_run();
/// # Ok::<(), pindaq::supervisor::RunError>(())
/// ```
pub struct RunSupervisor {
    source_config: SourceConfig,
    log_dir: PathBuf,
    sample_freq: f64,
    monitor: bool,
    active: Mutex<Option<ActiveRun>>,
}

impl RunSupervisor {
    pub fn new(source_config: SourceConfig, log_dir: PathBuf, sample_freq: f64) -> Self {
        Self {
            source_config,
            log_dir,
            sample_freq,
            monitor: false,
            active: Mutex::new(None),
        }
    }

    /// Log per-second sample rates during runs
    pub fn with_monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }

    /// Start a run, stopping any previous one first.
    ///
    /// Everything fallible happens before the previous state is replaced:
    /// on error the supervisor ends up with no active run, with the old one
    /// already stopped.
    pub fn start_run(&self, options: RunOptions) -> Result<(), RunError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut previous) = active.take() {
            tracing::info!("stopping previous run before starting a new one");
            teardown(&mut previous);
        }

        options.config.validate()?;

        let monitor = self.monitor.then(|| RateMonitor::new("samples").spawn());
        let irregular_monitor = self
            .monitor
            .then(|| RateMonitor::new("irregular data").spawn());

        let mut analyzer = PulseAnalyzer::new(self.sample_freq, options.config.clone());
        if let Some(ref m) = irregular_monitor {
            analyzer = analyzer.with_irregular_counter(m.counter());
        }
        let analyzer = Arc::new(analyzer);

        let sink: Option<Box<dyn DataSink>> = match &options.save_name {
            Some(base) => {
                std::fs::create_dir_all(&self.log_dir).map_err(|source| RunError::LogDir {
                    path: self.log_dir.clone(),
                    source,
                })?;
                let path =
                    timestamped_path(&self.log_dir, base, options.format.extension());
                tracing::info!(path = %path.display(), "logging run to file");
                match options.format {
                    SaveFormat::Csv => {
                        Some(Box::new(RowSink::create(path, Arc::clone(&analyzer))?))
                    }
                    SaveFormat::Hdf5 => Some(Box::new(ChunkedSink::create(
                        path,
                        Arc::clone(&analyzer),
                        options.selection,
                    )?)),
                }
            }
            None => None,
        };

        let source = self.build_source()?;

        let counter = monitor.as_ref().map(|m| m.counter());
        let source = SourceWorker::spawn(source, Arc::clone(&analyzer), counter)?;
        let saver = sink.map(|sink| SaverWorker::spawn(sink, DEFAULT_SAVE_INTERVAL));

        *active = Some(ActiveRun {
            analyzer,
            source,
            saver,
            monitor,
            irregular_monitor,
        });
        tracing::info!(freq = self.sample_freq, "run started");
        Ok(())
    }

    /// Stop the active run; a no-op when none is running
    pub fn stop_run(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut run) = active.take() {
            teardown(&mut run);
            tracing::info!("run stopped");
        }
    }

    /// Whether a run is currently set up (its source may have finished)
    pub fn is_run_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Whether the active run's source is still delivering samples
    pub fn is_acquiring(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|run| !run.source.is_finished())
    }

    /// Whether the active run's source ran out of input (replay reached its
    /// end of file) while the run is still set up
    pub fn source_finished(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|run| run.source.is_finished())
    }

    /// The active run's analyzer, for live readout
    pub fn analyzer(&self) -> Option<Arc<PulseAnalyzer>> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|run| Arc::clone(&run.analyzer))
    }

    fn build_source(&self) -> Result<Box<dyn SampleSource>, RunError> {
        let source: Box<dyn SampleSource> = match &self.source_config {
            SourceConfig::Device(host) => {
                Box::new(DeviceSource::attach(host.as_ref(), self.sample_freq)?)
            }
            SourceConfig::Replay(path) => {
                Box::new(ReplaySource::open(path, self.sample_freq)?)
            }
            SourceConfig::Synthetic { sample_limit } => {
                let mut source = SyntheticSource::new(self.sample_freq);
                if let Some(limit) = sample_limit {
                    source = source.with_sample_limit(*limit);
                }
                Box::new(source)
            }
        };
        Ok(source)
    }
}

impl Drop for RunSupervisor {
    fn drop(&mut self) {
        self.stop_run();
    }
}

/// Source first so no more samples arrive, then the saver (final flush),
/// then the monitor (rate summary)
fn teardown(run: &mut ActiveRun) {
    run.source.stop();
    if let Some(ref mut saver) = run.saver {
        saver.stop();
    }
    if let Some(ref mut monitor) = run.monitor {
        monitor.stop();
    }
    if let Some(ref mut monitor) = run.irregular_monitor {
        monitor.stop();
    }
}
