//! pindaq - continuous pulse acquisition core for an xPIN diode detector
//!
//! A sample-and-hold amplifier turns each detector pulse into a voltage
//! plateau; this crate ingests the digitized plateau stream, detects the
//! pulse edges online, extracts one calibrated peak voltage per pulse and
//! persists the resulting series incrementally while the run continues.
//!
//! The [`supervisor::RunSupervisor`] type ties everything together; the
//! individual stages live in their own modules:
//!
//! - [`series`] - append-only sample storage with lock-free reads
//! - [`config`] - per-run analysis parameters
//! - [`analyzer`] - online edge detection and peak extraction
//! - [`source`] - where samples come from (device, replay file, synthetic)
//! - [`monitor`] - per-second throughput instrumentation
//! - [`saver`] - incremental CSV and HDF5 persistence

pub mod analyzer;
pub mod config;
pub mod monitor;
pub mod saver;
pub mod series;
pub mod source;
pub mod supervisor;

pub use analyzer::PulseAnalyzer;
pub use config::AnalysisConfig;
pub use series::{Entry, Series};
pub use supervisor::{RunOptions, RunSupervisor, SourceConfig};

/// Nominal acquisition rate of the detector frontend (samples per second)
pub const DEFAULT_SAMPLE_RATE: f64 = 50_000.0;

/// Crate version, for banners and file provenance
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
