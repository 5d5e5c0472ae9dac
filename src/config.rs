//! Processing parameters for one acquisition run
//!
//! The configuration is fixed when a run starts and read-only afterwards.
//! Validation happens in [`RunSupervisor::start_run`](crate::supervisor::RunSupervisor::start_run)
//! before any worker thread is spawned.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Calibration applied to each baseline-subtracted peak estimate.
///
/// Corrects systematic errors of the sample-and-hold stage, or rescales the
/// peak voltage into a derived quantity. The default is the identity.
pub type CorrectionFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Configuration errors rejected at run start
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("edge detection threshold must be a positive finite voltage, got {0}")]
    InvalidThreshold(f64),

    #[error("average count must be at least 1")]
    InvalidAverageCount,
}

/// Immutable-for-the-run analysis parameters
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Minimum voltage delta against the lagged baseline that counts as an
    /// edge between a pulse section and a baseline section
    pub edge_detection_threshold: f64,
    /// Number of consecutive peak voltages averaged into one entry of the
    /// averaged series
    pub average_count: usize,
    /// Calibration applied to each peak voltage before it is recorded
    pub correction: CorrectionFn,
}

impl AnalysisConfig {
    /// Configuration with a custom threshold and average count, identity correction
    pub fn new(edge_detection_threshold: f64, average_count: usize) -> Self {
        Self {
            edge_detection_threshold,
            average_count,
            correction: identity(),
        }
    }

    /// Replace the correction function
    pub fn with_correction(mut self, correction: CorrectionFn) -> Self {
        self.correction = correction;
        self
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.edge_detection_threshold.is_finite() && self.edge_detection_threshold > 0.0) {
            return Err(ConfigError::InvalidThreshold(self.edge_detection_threshold));
        }
        if self.average_count == 0 {
            return Err(ConfigError::InvalidAverageCount);
        }
        Ok(())
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            edge_detection_threshold: 0.005,
            average_count: 50,
            correction: identity(),
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("edge_detection_threshold", &self.edge_detection_threshold)
            .field("average_count", &self.average_count)
            .field("correction", &"<fn>")
            .finish()
    }
}

fn identity() -> CorrectionFn {
    Arc::new(|x| x)
}
