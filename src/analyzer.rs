//! Online pulse detection and peak extraction
//!
//! Consumes one raw voltage sample at a time and maintains four append-only
//! series: the raw samples (`ys`), the calibrated peak voltages
//! (`processed`), windowed averages of the peaks (`averaged`) and raw spike
//! estimates (`markers`, diagnostic).
//!
//! The detector classifies each sample against a baseline three samples
//! back, which damps single-sample noise at the cost of a short transition
//! zone around every edge. A contiguous run of in-threshold samples forms a
//! section; when a falling edge closes a section that sits above the
//! previous one, the section pair is evaluated into one peak voltage.
//!
//! Exactly one thread (the source driver) calls [`PulseAnalyzer::append`];
//! the series are read concurrently by the savers and by display polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::AnalysisConfig;
use crate::monitor::Counter;
use crate::series::{Entry, Series};

/// Number of zero samples the raw series is seeded with, so the three-back
/// baseline lookup is defined from the first appended sample on.
pub const SEED_SAMPLES: usize = 3;

/// How far behind the current sample the noise baseline is taken
const BASELINE_LAG: usize = 3;

/// Section evaluation needs at least this many samples on both sides
const MIN_SECTION_LEN: usize = 2;

/// Whether the first peak has been recorded yet.
///
/// The first peak additionally records the wall-clock start of processing;
/// every later peak takes the plain append path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppendState {
    AwaitingFirst,
    Running,
}

/// Detector state touched only by the single appending thread
#[derive(Debug)]
struct DetectorState {
    /// Samples of the current candidate section
    last_up_section: Vec<f64>,
    /// The previous completed section
    last_down_section: Vec<f64>,
    /// True while consecutive samples keep exceeding the threshold against
    /// the lagged baseline; such samples belong to one edge, not many
    in_transition: bool,
    /// Direction of the current transition. An over-threshold excursion of
    /// the opposite sign is a new edge, not part of this one.
    transition_rising: bool,
    append_state: AppendState,
    /// Running-average accumulator over peak voltages
    average_sum: f64,
    average_index: usize,
    /// Wall-clock time the first peak was recorded
    first_processed_timestamp: Option<DateTime<Utc>>,
}

/// Streaming pulse analyzer owning the four output series
pub struct PulseAnalyzer {
    freq: f64,
    config: AnalysisConfig,
    ys: Series<f64>,
    processed: Series<Entry>,
    averaged: Series<Entry>,
    markers: Series<Entry>,
    state: Mutex<DetectorState>,
    irregular_events: AtomicU64,
    irregular_counter: Option<Counter>,
}

impl PulseAnalyzer {
    /// Create an analyzer for a run at the given nominal sampling frequency.
    ///
    /// The configuration is assumed validated (see
    /// [`AnalysisConfig::validate`]); the supervisor rejects bad parameters
    /// before constructing an analyzer.
    pub fn new(freq: f64, config: AnalysisConfig) -> Self {
        Self {
            freq,
            config,
            ys: Series::with_seed(&[0.0; SEED_SAMPLES]),
            processed: Series::new(),
            averaged: Series::new(),
            markers: Series::new(),
            state: Mutex::new(DetectorState {
                last_up_section: Vec::new(),
                last_down_section: Vec::new(),
                in_transition: false,
                transition_rising: false,
                append_state: AppendState::AwaitingFirst,
                average_sum: 0.0,
                average_index: 0,
                first_processed_timestamp: None,
            }),
            irregular_events: AtomicU64::new(0),
            irregular_counter: None,
        }
    }

    /// Report irregular-data events to a rate monitor counter as well as the
    /// internal total
    pub fn with_irregular_counter(mut self, counter: Counter) -> Self {
        self.irregular_counter = Some(counter);
        self
    }

    /// Feed one raw sample through the detector.
    ///
    /// The sample is processed first and appended to the raw series last, so
    /// processing sees it as pending and the baseline lookup addresses the
    /// already-stored series.
    pub fn append(&self, y: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.process(&mut state, y);
        self.ys.push(y);
    }

    fn process(&self, state: &mut DetectorState, y: f64) {
        let n = self.ys.len();
        let baseline = self.ys.get(n - BASELINE_LAG).unwrap_or(0.0);
        let diff = y - baseline;

        if diff.abs() <= self.config.edge_detection_threshold {
            // Inside a section
            state.last_up_section.push(y);
            state.in_transition = false;
        } else if state.in_transition && (diff > 0.0) == state.transition_rising {
            // Interior of a multi-sample transition: the lagged baseline
            // keeps flagging an edge until it catches up. Same-direction
            // samples belong to the section the first edge sample started;
            // an opposite-sign excursion below is a fresh edge, which is how
            // a plateau no longer than the baseline lag still gets closed.
            state.last_up_section.push(y);
        } else {
            if diff < 0.0
                && state.last_up_section.len() >= MIN_SECTION_LEN
                && state.last_down_section.len() >= MIN_SECTION_LEN
            {
                self.evaluate_pulse(state, n);
            }

            // Regardless of validity, the completed section becomes the new
            // reference and the edge sample starts the next candidate.
            if !state.last_up_section.is_empty() {
                state.last_down_section = std::mem::take(&mut state.last_up_section);
            }
            state.last_up_section.push(y);
            state.in_transition = true;
            state.transition_rising = diff > 0.0;
        }
    }

    /// A falling edge closed the current section: estimate the peak from the
    /// up/down section pair, or count the pulse as irregular.
    fn evaluate_pulse(&self, state: &mut DetectorState, n: usize) {
        let up_len = state.last_up_section.len();
        let up = reject_outliers(&state.last_up_section);
        let down = reject_outliers(&state.last_down_section);

        let up_avg = mean(&up);
        let down_avg = mean(&down);

        if up_avg >= down_avg {
            // Back-extrapolate the rising trend to the section midpoint to
            // counter the sample-and-hold droop.
            let avg_up_diff = mean_consecutive_diff(&up);
            let spike = up_avg - avg_up_diff * (up_len as f64 / 2.0);
            self.markers.push(Entry {
                value: spike,
                timestamp: n as f64,
            });

            let processed_y = (self.config.correction)(spike - down_avg);
            self.append_processed(state, processed_y, n);
        } else {
            self.irregular_events.fetch_add(1, Ordering::Relaxed);
            if let Some(ref counter) = self.irregular_counter {
                counter.add(1);
            }
            tracing::warn!(up_avg, down_avg, "irregular pulse geometry, no peak recorded");
        }
    }

    /// Record one calibrated peak voltage and fold it into the running average
    fn append_processed(&self, state: &mut DetectorState, value: f64, n: usize) {
        if state.append_state == AppendState::AwaitingFirst {
            state.first_processed_timestamp = Some(Utc::now());
            state.append_state = AppendState::Running;
        }

        let timestamp = n as f64;
        self.processed.push(Entry { value, timestamp });

        state.average_sum += value;
        state.average_index += 1;

        if state.average_index == self.config.average_count {
            let count = self.config.average_count as f64;
            self.averaged.push(Entry {
                value: state.average_sum / count,
                // Centre the average on its window of peaks
                timestamp: timestamp - count / 2.0,
            });
            state.average_sum = 0.0;
            state.average_index = 0;
        }
    }

    /// Nominal sampling frequency of the run (Hz)
    pub fn freq(&self) -> f64 {
        self.freq
    }

    /// Edge detection threshold of the run (volts)
    pub fn edge_detection_threshold(&self) -> f64 {
        self.config.edge_detection_threshold
    }

    /// Peaks averaged per entry of the averaged series
    pub fn average_count(&self) -> usize {
        self.config.average_count
    }

    /// Raw samples, including the zero seed
    pub fn ys(&self) -> &Series<f64> {
        &self.ys
    }

    /// Calibrated peak voltages with raw-index timestamps
    pub fn processed(&self) -> &Series<Entry> {
        &self.processed
    }

    /// Averages over `average_count` consecutive peaks
    pub fn averaged(&self) -> &Series<Entry> {
        &self.averaged
    }

    /// Raw spike estimates, one per accepted edge (diagnostic)
    pub fn markers(&self) -> &Series<Entry> {
        &self.markers
    }

    /// Pulses rejected because the closing section sat below its reference
    pub fn irregular_events(&self) -> u64 {
        self.irregular_events.load(Ordering::Relaxed)
    }

    /// Wall-clock time of the first recorded peak, if any peak was recorded
    pub fn first_processed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .first_processed_timestamp
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let variance =
        samples.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

/// Drop samples outside mean ± 2·stddev of the section
fn reject_outliers(samples: &[f64]) -> Vec<f64> {
    let m = mean(samples);
    let limit = 2.0 * std_dev(samples, m);
    samples
        .iter()
        .copied()
        .filter(|y| (y - m).abs() <= limit)
        .collect()
}

/// Mean of consecutive differences, the per-sample trend of a section
fn mean_consecutive_diff(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let total: f64 = samples.windows(2).map(|w| w[1] - w[0]).sum();
    total / (samples.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn analyzer_with(threshold: f64, average_count: usize) -> PulseAnalyzer {
        PulseAnalyzer::new(50_000.0, AnalysisConfig::new(threshold, average_count))
    }

    /// One clean pulse of height 0.02 over a zero baseline
    fn feed_clean_pulse(analyzer: &PulseAnalyzer) {
        for y in [0.0, 0.0, 0.0, 0.02, 0.021, 0.019, 0.0, 0.0, 0.0] {
            analyzer.append(y);
        }
    }

    #[test]
    fn test_clean_pulse_produces_one_peak() {
        let analyzer = analyzer_with(0.005, 50);
        feed_clean_pulse(&analyzer);

        assert_eq!(analyzer.ys().len(), 9 + SEED_SAMPLES);
        assert_eq!(analyzer.markers().len(), 1);
        assert_eq!(analyzer.processed().len(), 1);
        assert_eq!(analyzer.irregular_events(), 0);

        let marker = analyzer.markers().get(0).expect("marker entry");
        assert_relative_eq!(marker.value, 0.02, epsilon = 2e-3);

        let peak = analyzer.processed().get(0).expect("peak entry");
        assert_relative_eq!(peak.value, 0.02, epsilon = 2e-3);
        // Peak is stamped with the raw index of the closing edge
        assert_relative_eq!(peak.timestamp, (SEED_SAMPLES + 6) as f64);
    }

    #[test]
    fn test_plateau_no_longer_than_lag_still_closes() {
        // With a plateau of exactly BASELINE_LAG samples, every plateau and
        // falling-edge sample is over-threshold against the lagged baseline,
        // so only the sign flip at the falling edge can end the transition.
        let analyzer = analyzer_with(0.005, 50);
        for _ in 0..5 {
            feed_clean_pulse(&analyzer);
        }

        assert_eq!(analyzer.markers().len(), 5);
        assert_eq!(analyzer.processed().len(), 5);
        assert_eq!(analyzer.irregular_events(), 0);
        for peak in analyzer.processed().slice_from(0) {
            assert_relative_eq!(peak.value, 0.02, epsilon = 2e-3);
        }
    }

    #[test]
    fn test_correction_is_applied() {
        let config = AnalysisConfig::new(0.005, 50).with_correction(Arc::new(|x| 100.0 * x));
        let analyzer = PulseAnalyzer::new(50_000.0, config);
        feed_clean_pulse(&analyzer);

        let peak = analyzer.processed().get(0).expect("peak entry");
        assert_relative_eq!(peak.value, 2.0, epsilon = 0.2);
        // Markers carry the uncorrected spike estimate
        let marker = analyzer.markers().get(0).expect("marker entry");
        assert_relative_eq!(marker.value, 0.02, epsilon = 2e-3);
    }

    #[test]
    fn test_first_processed_timestamp_set_once() {
        let analyzer = analyzer_with(0.005, 50);
        assert!(analyzer.first_processed_timestamp().is_none());

        feed_clean_pulse(&analyzer);
        let first = analyzer.first_processed_timestamp().expect("set by first peak");

        feed_clean_pulse(&analyzer);
        assert_eq!(analyzer.processed().len(), 2);
        assert_eq!(analyzer.first_processed_timestamp(), Some(first));
    }

    #[test]
    fn test_averaging_window_and_centred_timestamp() {
        let count = 4;
        let analyzer = analyzer_with(0.005, count);

        for _ in 0..10 {
            feed_clean_pulse(&analyzer);
        }
        assert_eq!(analyzer.processed().len(), 10);
        assert_eq!(analyzer.averaged().len(), 2);

        let peaks = analyzer.processed().slice_from(0);
        for (k, avg) in analyzer.averaged().slice_from(0).iter().enumerate() {
            let window = &peaks[k * count..(k + 1) * count];
            let expected = window.iter().map(|e| e.value).sum::<f64>() / count as f64;
            assert_relative_eq!(avg.value, expected, epsilon = 1e-12);
            assert_relative_eq!(
                avg.timestamp,
                window[count - 1].timestamp - count as f64 / 2.0,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_descending_sections_count_as_irregular() {
        let analyzer = analyzer_with(0.005, 50);

        // Baseline, high plateau, then a lower plateau: closing the lower
        // plateau compares it against the higher one.
        for _ in 0..6 {
            analyzer.append(0.0);
        }
        for y in [0.05; 6] {
            analyzer.append(y);
        }
        for y in [0.02; 6] {
            analyzer.append(y);
        }
        for _ in 0..6 {
            analyzer.append(0.0);
        }

        // The 0.05 plateau over the zero baseline still yields one valid peak
        assert_eq!(analyzer.processed().len(), 1);
        assert_eq!(analyzer.irregular_events(), 1);
    }

    #[test]
    fn test_irregular_events_reach_rate_monitor() {
        use crate::monitor::RateMonitor;
        use std::time::Duration;

        let mut handle = RateMonitor::new("irregular data")
            .with_start_delay(Duration::from_millis(0))
            .spawn();
        let analyzer = PulseAnalyzer::new(50_000.0, AnalysisConfig::new(0.005, 50))
            .with_irregular_counter(handle.counter());

        for _ in 0..6 {
            analyzer.append(0.0);
        }
        for y in [0.05; 6] {
            analyzer.append(y);
        }
        for y in [0.02; 6] {
            analyzer.append(y);
        }
        for _ in 0..6 {
            analyzer.append(0.0);
        }
        assert_eq!(analyzer.irregular_events(), 1);

        // Let the monitor complete one counting second, then check the
        // event made it into its samples
        std::thread::sleep(Duration::from_millis(1200));
        handle.stop();
        assert_eq!(handle.samples().iter().sum::<u64>(), 1);
    }

    #[test]
    fn test_noise_below_threshold_produces_nothing() {
        let analyzer = analyzer_with(0.005, 50);
        for i in 0..1000 {
            // +-1 mV sawtooth, well below the 5 mV threshold
            analyzer.append(((i % 5) as f64 - 2.0) * 0.0005);
        }
        assert_eq!(analyzer.processed().len(), 0);
        assert_eq!(analyzer.markers().len(), 0);
        assert_eq!(analyzer.irregular_events(), 0);
    }

    #[test]
    fn test_outlier_in_section_is_rejected() {
        let analyzer = analyzer_with(0.005, 50);

        // Long plateau with one wild sample in the middle; the spike
        // estimate must stay near the plateau level.
        for _ in 0..20 {
            analyzer.append(0.0);
        }
        for i in 0..20 {
            let y = if i == 10 { 0.0295 } else { 0.03 };
            analyzer.append(y);
        }
        for _ in 0..5 {
            analyzer.append(0.0);
        }

        assert_eq!(analyzer.processed().len(), 1);
        let peak = analyzer.processed().get(0).expect("peak entry");
        assert_relative_eq!(peak.value, 0.03, epsilon = 2e-3);
    }

    #[test]
    fn test_series_never_shrink() {
        let analyzer = analyzer_with(0.005, 2);
        let mut last = (0, 0, 0, 0);
        for _ in 0..20 {
            feed_clean_pulse(&analyzer);
            let now = (
                analyzer.ys().len(),
                analyzer.processed().len(),
                analyzer.averaged().len(),
                analyzer.markers().len(),
            );
            assert!(now.0 >= last.0 && now.1 >= last.1 && now.2 >= last.2 && now.3 >= last.3);
            last = now;
        }
    }
}
