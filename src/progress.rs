//! Progress reconstruction from the engine's free-form text output.
//!
//! The conversion engine writes human-oriented status lines to whatever sink
//! it is given. [`ProgressInterceptor`] buffers everything verbatim for
//! final display and opportunistically extracts `(unit_index, unit_total)`
//! pairs to derive throughput and ETA. The text format is not a stable
//! contract; chunks that match nothing are simply kept in the buffer.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;

use crate::events::{EventSender, OrchestrationEvent};

/// Minimum spacing between successive `RealtimeProgress` emissions.
pub const EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Derived progress. Never authoritative: absent for the whole run if the
/// engine's output never matches a known shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    pub unit_index: u64,
    pub unit_total: u64,
    pub throughput_per_minute: f64,
    pub elapsed_seconds: f64,
    pub eta_seconds: f64,
}

/// Write-append sink the engine's text output flows through.
pub trait TextSink {
    fn write(&mut self, chunk: &str);
}

fn direct_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*/\s*(\d+)").expect("valid regex"))
}

fn unit_word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:chunk|chapter|segment|part)s?\b\D*?(\d+)\D+?(\d+)")
            .expect("valid regex")
    })
}

/// Scans one chunk for a unit pair. The bare `N/M` shape wins over the
/// looser unit-word shape; malformed numerals are skipped silently.
fn extract_unit_pair(chunk: &str) -> Option<(u64, u64)> {
    for pattern in [direct_pattern(), unit_word_pattern()] {
        if let Some(caps) = pattern.captures(chunk) {
            let index = caps.get(1)?.as_str().parse::<u64>().ok();
            let total = caps.get(2)?.as_str().parse::<u64>().ok();
            if let (Some(index), Some(total)) = (index, total) {
                return Some((index, total));
            }
        }
    }
    None
}

/// Sink substituted for the engine's normal text output.
///
/// Everything written is appended to an internal buffer unconditionally;
/// [`snapshot`](Self::snapshot) returns it for display once the run ends.
/// Matching chunks additionally emit throttled [`ProgressSample`] events.
pub struct ProgressInterceptor {
    buffer: String,
    started: Instant,
    last_emit: Option<Instant>,
    events: EventSender,
}

impl ProgressInterceptor {
    pub fn new(events: EventSender) -> Self {
        Self {
            buffer: String::new(),
            started: Instant::now(),
            last_emit: None,
            events,
        }
    }

    /// All text written so far, verbatim.
    pub fn snapshot(&self) -> String {
        self.buffer.clone()
    }

    fn sample_for(&self, unit_index: u64, unit_total: u64) -> ProgressSample {
        let elapsed = self.started.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 && unit_index > 0 {
            unit_index as f64 / elapsed * 60.0
        } else {
            0.0
        };
        let eta = if throughput > 0.0 {
            unit_total.saturating_sub(unit_index) as f64 / throughput * 60.0
        } else {
            0.0
        };
        ProgressSample {
            unit_index,
            unit_total,
            throughput_per_minute: throughput,
            elapsed_seconds: elapsed,
            eta_seconds: eta.max(0.0),
        }
    }

    fn throttle_open(&self) -> bool {
        match self.last_emit {
            Some(at) => at.elapsed() >= EMIT_INTERVAL,
            None => true,
        }
    }
}

impl TextSink for ProgressInterceptor {
    fn write(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);

        let Some((unit_index, unit_total)) = extract_unit_pair(chunk) else {
            return;
        };
        // Chunks landing inside the throttle window update the buffer only.
        if !self.throttle_open() {
            return;
        }
        self.last_emit = Some(Instant::now());
        let sample = self.sample_for(unit_index, unit_total);
        log::trace!(
            "progress {}/{} ({:.1}/min)",
            sample.unit_index,
            sample.unit_total,
            sample.throughput_per_minute
        );
        self.events
            .publish(OrchestrationEvent::RealtimeProgress(sample));
    }
}
