// Transcoder stderr parsing
// Converts the line-oriented stderr stream into progress fractions

use crate::constants::driver::STDERR_TAIL_CAPACITY;
use crate::utils::parse_clock_to_seconds;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Pipeline stage a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStage {
    /// Input inspection before dispatch
    Probing,
    /// Child process running
    Transcoding,
    /// Output verification after child exit
    Finalizing,
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStage::Probing => write!(f, "probing"),
            ProgressStage::Transcoding => write!(f, "transcoding"),
            ProgressStage::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// One progress observation for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job this event belongs to
    pub job_id: String,

    /// Completion fraction, clamped to [0, 1]
    pub fraction: f64,

    /// Stage the fraction applies to
    pub stage: ProgressStage,

    /// Observation time
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event, clamping the fraction into [0, 1]
    pub fn new(job_id: impl Into<String>, fraction: f64, stage: ProgressStage) -> Self {
        Self {
            job_id: job_id.into(),
            fraction: fraction.clamp(0.0, 1.0),
            stage,
            at: Utc::now(),
        }
    }
}

/// Parser for the transcoder's stderr grammar
///
/// Two line shapes matter:
/// - `Duration: HH:MM:SS.CC` — captured once, ignored thereafter
/// - `time=HH:MM:SS.CC` — emitted frequently while encoding
///
/// The fraction is `current / duration`, clamped to 1.0 and never allowed
/// to regress. A ring buffer keeps the last raw lines so failure reports can
/// include tail context. When the duration was supplied up front (from a
/// probe) the parser starts with it and ignores the Duration line.
pub struct ProgressParser {
    duration_re: Regex,
    time_re: Regex,
    duration_seconds: Option<f64>,
    last_fraction: f64,
    tail: VecDeque<String>,
    tail_capacity: usize,
}

impl ProgressParser {
    /// Create a parser; `duration_seconds` may come from a probe
    pub fn new(duration_seconds: Option<f64>) -> Self {
        Self {
            // Hard-coded grammar of the external transcoder's stderr
            duration_re: Regex::new(r"Duration: (\d{2}:\d{2}:\d{2}\.\d{2})")
                .expect("valid duration pattern"),
            time_re: Regex::new(r"time=(\d{2}:\d{2}:\d{2}\.\d{2})")
                .expect("valid time pattern"),
            duration_seconds: duration_seconds.filter(|d| *d > 0.0),
            last_fraction: 0.0,
            tail: VecDeque::with_capacity(STDERR_TAIL_CAPACITY),
            tail_capacity: STDERR_TAIL_CAPACITY,
        }
    }

    /// Feed one stderr line; returns a fraction when the line decoded to a
    /// progress observation
    ///
    /// At most one fraction per line. Lines are retained in the ring buffer
    /// regardless of whether they decode.
    pub fn feed_line(&mut self, line: &str) -> Option<f64> {
        if self.tail.len() == self.tail_capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());

        if self.duration_seconds.is_none() {
            if let Some(clock) = self.duration_re.captures(line).and_then(|c| c.get(1)) {
                let secs = parse_clock_to_seconds(clock.as_str());
                if secs > 0.0 {
                    self.duration_seconds = Some(secs);
                }
                return None;
            }
        }

        let duration = self.duration_seconds?;
        let clock = self.time_re.captures(line).and_then(|c| c.get(1))?;
        let current = parse_clock_to_seconds(clock.as_str());

        // Clamp past-duration reports to 1.0 and never regress
        let fraction = (current / duration).clamp(0.0, 1.0);
        if fraction > self.last_fraction {
            self.last_fraction = fraction;
        }
        Some(self.last_fraction)
    }

    /// Duration the parser is computing fractions against, if known
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    /// Highest fraction observed so far
    pub fn last_fraction(&self) -> f64 {
        self.last_fraction
    }

    /// The last `n` raw lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        let start = self.tail.len().saturating_sub(n);
        self.tail.iter().skip(start).cloned().collect()
    }
}
