//! Replay of a recorded trace at the nominal acquisition rate
//!
//! Reads one sample per line from a plain text record. Comment lines
//! prefixed with `#` are skipped once at open time. Successive pulls are
//! spaced by `1/freq` using an accumulating deadline, so pacing error does
//! not build up over a long replay.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};

use super::{Pull, SampleSource, SourceError};

/// File-backed sample source
pub struct ReplaySource {
    reader: BufReader<File>,
    /// First data line, consumed while skipping the comment header
    pending: Option<String>,
    period: Duration,
    deadline: Option<Instant>,
}

impl ReplaySource {
    /// Open a trace file for replay at `freq` samples per second.
    ///
    /// Leading `#` comment lines are consumed here; the first data line is
    /// buffered for the first `pull`.
    pub fn open(path: impl AsRef<Path>, freq: f64) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut pending = None;
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line).map_err(SourceError::Read)?;
            if read == 0 {
                break;
            }
            if line.starts_with('#') {
                continue;
            }
            pending = Some(line);
            break;
        }

        tracing::info!(path = %path.display(), freq, "replay source opened");

        Ok(Self {
            reader,
            pending,
            period: Duration::from_secs_f64(1.0 / freq),
            deadline: None,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).map_err(SourceError::Read)?;
        if read == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }
}

impl SampleSource for ReplaySource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.deadline = Some(Instant::now());
        Ok(())
    }

    fn pull(&mut self) -> Result<Pull, SourceError> {
        loop {
            // Accumulating deadline: late wakeups shorten the next sleep
            // instead of shifting every following sample. A skipped line
            // still consumes its slot, so pacing holds across corrupt
            // segments of the trace.
            let deadline = self.deadline.get_or_insert_with(Instant::now);
            *deadline += self.period;
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()));

            match self.next_line()? {
                None => return Ok(Pull::End),
                Some(line) => match line.trim().parse::<f64>() {
                    Ok(y) => return Ok(Pull::Batch(vec![y])),
                    Err(_) => {
                        tracing::warn!(line = line.trim(), "skipping malformed replay line");
                    }
                },
            }
        }
    }

    fn stop(&mut self) {
        // The file handle is released on drop; nothing to disarm.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn trace_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write trace");
        file
    }

    fn drain(source: &mut ReplaySource) -> Vec<f64> {
        let mut samples = Vec::new();
        loop {
            match source.pull().expect("pull") {
                Pull::Batch(batch) => samples.extend(batch),
                Pull::End => break,
            }
        }
        samples
    }

    #[test]
    fn test_comment_header_is_skipped() {
        let file = trace_file("# recorded 2021-03-14\n# freq 50000\n0.1\n0.2\n");
        let mut source = ReplaySource::open(file.path(), 100_000.0).expect("open");
        source.start().expect("start");
        assert_eq!(drain(&mut source), vec![0.1, 0.2]);
    }

    #[test]
    fn test_malformed_lines_are_skipped_not_fatal() {
        let file = trace_file("0.1\nnot-a-number\n\n0.3\n");
        let mut source = ReplaySource::open(file.path(), 100_000.0).expect("open");
        source.start().expect("start");
        assert_eq!(drain(&mut source), vec![0.1, 0.3]);
    }

    #[test]
    fn test_end_of_input_is_clean() {
        let file = trace_file("0.5\n");
        let mut source = ReplaySource::open(file.path(), 100_000.0).expect("open");
        source.start().expect("start");
        assert!(matches!(source.pull().expect("pull"), Pull::Batch(_)));
        assert!(matches!(source.pull().expect("pull"), Pull::End));
        // Repeated pulls after the end stay at the end
        assert!(matches!(source.pull().expect("pull"), Pull::End));
        source.stop();
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let result = ReplaySource::open("/nonexistent/trace.txt", 50_000.0);
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[test]
    fn test_pacing_tracks_the_nominal_rate() {
        let mut content = String::new();
        for _ in 0..500 {
            content.push_str("0.0\n");
        }
        let file = trace_file(&content);
        let mut source = ReplaySource::open(file.path(), 2000.0).expect("open");
        source.start().expect("start");

        let t0 = Instant::now();
        let samples = drain(&mut source);
        let elapsed = t0.elapsed();

        assert_eq!(samples.len(), 500);
        // 500 samples at 2 kHz take 250 ms; the accumulating deadline keeps
        // total drift well under one period per thousand samples.
        assert!(elapsed >= Duration::from_millis(249), "ran too fast: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(400), "drifted: {elapsed:?}");
    }

    #[test]
    fn test_malformed_lines_keep_their_pacing_slot() {
        let mut content = String::new();
        for _ in 0..100 {
            content.push_str("0.0\ncorrupt\n");
        }
        let file = trace_file(&content);
        let mut source = ReplaySource::open(file.path(), 2000.0).expect("open");
        source.start().expect("start");

        let t0 = Instant::now();
        let samples = drain(&mut source);
        let elapsed = t0.elapsed();

        assert_eq!(samples.len(), 100);
        // 200 lines at 2 kHz occupy 100 ms even though half are skipped
        assert!(elapsed >= Duration::from_millis(99), "ran too fast: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(250), "drifted: {elapsed:?}");
    }

    #[test]
    fn test_stop_before_start_is_safe() {
        let file = trace_file("0.1\n");
        let mut source = ReplaySource::open(file.path(), 50_000.0).expect("open");
        source.stop();
    }
}
