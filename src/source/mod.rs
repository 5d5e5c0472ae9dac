//! Sample ingestion sources and the acquisition driver thread
//!
//! A [`SampleSource`] produces raw voltage samples at a nominal fixed
//! frequency, either from the DAQ hardware ([`device`]), from a recorded
//! trace ([`replay`]) or from a generator ([`synthetic`]). The driver
//! worker owns the source and is the only thread that appends to the
//! analyzer.

pub mod device;
pub mod replay;
pub mod synthetic;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;

use crate::analyzer::PulseAnalyzer;
use crate::monitor::Counter;

/// Errors raised by sample sources.
///
/// Construction and `start` errors are fatal to the run; after that, a
/// source error terminates the driver loop (the hardware layer does not
/// reconnect).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("could not open replay file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("replay read failed: {0}")]
    Read(std::io::Error),

    #[error("expected exactly one acquisition device, found {0}")]
    DeviceCount(usize),

    #[error("incompatible acquisition device: expected {expected}, found {found}")]
    DeviceModel { expected: String, found: String },

    #[error("acquisition device fault: {0}")]
    Device(String),
}

/// Result of one `pull` from a source
#[derive(Debug)]
pub enum Pull {
    /// New samples, in arrival order. The device drains its buffer and may
    /// return many; replay returns exactly one per call.
    Batch(Vec<f64>),
    /// The source ran out of input; the run stops cleanly.
    End,
}

/// Capability contract of a sample producer.
///
/// `pull` may block (device read, or pacing sleep) and is called repeatedly
/// until the driver observes a stop. `stop` must be safe to call even if
/// `start` never ran or failed partway, and after natural completion.
pub trait SampleSource: Send {
    /// Arm the source; called once before the first `pull`
    fn start(&mut self) -> Result<(), SourceError>;

    /// Block until samples are available and return them
    fn pull(&mut self) -> Result<Pull, SourceError>;

    /// Disarm and release the source
    fn stop(&mut self);
}

/// Handle to the acquisition driver thread
#[derive(Debug)]
pub struct SourceWorker {
    stop_flag: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SourceWorker {
    /// Start the source and spawn the driver loop.
    ///
    /// The source is started on the calling thread so that arming errors
    /// surface to the run-start attempt instead of dying inside the worker.
    pub fn spawn(
        mut source: Box<dyn SampleSource>,
        analyzer: Arc<PulseAnalyzer>,
        counter: Option<Counter>,
    ) -> Result<Self, SourceError> {
        if let Err(e) = source.start() {
            source.stop();
            return Err(e);
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);
        let thread_finished = Arc::clone(&finished);

        let thread = std::thread::Builder::new()
            .name("source-driver".into())
            .spawn(move || {
                tracing::info!("acquisition driver running");
                loop {
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    match source.pull() {
                        Ok(Pull::Batch(samples)) => {
                            let n = samples.len();
                            for y in samples {
                                analyzer.append(y);
                            }
                            if let Some(ref counter) = counter {
                                counter.add(n as u64);
                            }
                        }
                        Ok(Pull::End) => {
                            tracing::info!("source reached end of stream");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "source failed, terminating acquisition");
                            break;
                        }
                    }
                }
                source.stop();
                thread_finished.store(true, Ordering::Release);
                tracing::info!("acquisition driver stopped");
            })
            .expect("failed to spawn source driver thread");

        Ok(Self {
            stop_flag,
            finished,
            thread: Some(thread),
        })
    }

    /// Whether the driver loop has exited (stop, end of input, or fault)
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Signal the driver to stop after its current pull and wait for it.
    /// Safe to call after the driver already exited on its own.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SourceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
