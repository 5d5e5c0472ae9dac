//! Generated pulse train for running the pipeline without hardware
//!
//! Produces a deterministic alternation of baseline and plateau sections,
//! shaped like the sample-and-hold output the analyzer expects, paced at
//! the nominal frequency like a replay. Used by the binary's demo mode and
//! by integration tests.

use std::time::{Duration, Instant};

use super::{Pull, SampleSource, SourceError};

/// Deterministic pulse-train source
pub struct SyntheticSource {
    period: Duration,
    deadline: Option<Instant>,
    /// Plateau voltage above the baseline
    pulse_height: f64,
    baseline_len: usize,
    plateau_len: usize,
    /// Samples emitted so far
    position: usize,
    /// Total samples to emit before end-of-stream; `None` runs forever
    limit: Option<usize>,
}

impl SyntheticSource {
    /// A 20 mV pulse train at the given frequency: 40 baseline samples and
    /// 40 plateau samples per cycle
    pub fn new(freq: f64) -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / freq),
            deadline: None,
            pulse_height: 0.02,
            baseline_len: 40,
            plateau_len: 40,
            position: 0,
            limit: None,
        }
    }

    /// Stop after emitting `limit` samples
    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Override the pulse height (volts above baseline)
    pub fn with_pulse_height(mut self, height: f64) -> Self {
        self.pulse_height = height;
        self
    }

    fn sample_at(&self, position: usize) -> f64 {
        let cycle = self.baseline_len + self.plateau_len;
        if position % cycle < self.baseline_len {
            0.0
        } else {
            self.pulse_height
        }
    }
}

impl SampleSource for SyntheticSource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.deadline = Some(Instant::now());
        Ok(())
    }

    fn pull(&mut self) -> Result<Pull, SourceError> {
        if let Some(limit) = self.limit {
            if self.position >= limit {
                return Ok(Pull::End);
            }
        }

        let deadline = self.deadline.get_or_insert_with(Instant::now);
        *deadline += self.period;
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));

        let y = self.sample_at(self.position);
        self.position += 1;
        Ok(Pull::Batch(vec![y]))
    }

    fn stop(&mut self) {}
}
