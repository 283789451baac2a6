use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Divisor used to express bits/s as Mbps.
///
/// Binary megabits (2^20), not decimal: 1,048,576 bytes/s reads as 8.0 Mbps.
pub const MEGABIT: f64 = 1_048_576.0;

#[derive(Debug, Default)]
struct MeasurementState {
    total_bytes: u64,
    durations: Vec<Duration>,
}

/// Download measurements shared by every receive task.
///
/// The byte total and the per-stream durations sit behind one lock, which is
/// only held for the update itself.
#[derive(Debug, Default)]
pub struct Measurements {
    state: Mutex<MeasurementState>,
}

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.state.lock().total_bytes += bytes;
    }

    /// Record the elapsed read time of one finished stream
    pub fn record_duration(&self, elapsed: Duration) {
        self.state.lock().durations.push(elapsed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.state.lock().durations.clone()
    }

    /// Compute the final outcome. Call once every receive task has finished.
    pub fn outcome(&self) -> Outcome {
        let state = self.state.lock();
        Outcome::compute(state.total_bytes, &state.durations)
    }
}

/// Final download report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub total_bytes: u64,
    /// Streams that recorded a duration
    pub streams: usize,
    pub average_duration_ms: f64,
    pub throughput_mbps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// No stream produced data; throughput is not computed
    NoData,
    Completed(Report),
}

impl Outcome {
    pub fn compute(total_bytes: u64, durations: &[Duration]) -> Self {
        if durations.is_empty() || total_bytes == 0 {
            return Self::NoData;
        }

        let average = average_duration(durations);
        Self::Completed(Report {
            total_bytes,
            streams: durations.len(),
            average_duration_ms: average.as_secs_f64() * 1000.0,
            throughput_mbps: throughput_mbps(total_bytes, average),
        })
    }

    pub fn report(&self) -> Option<&Report> {
        match self {
            Self::Completed(report) => Some(report),
            Self::NoData => None,
        }
    }
}

/// Mean of the recorded durations. Empty input yields zero.
pub fn average_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = durations.iter().sum();
    let count = u32::try_from(durations.len()).unwrap_or(u32::MAX);
    total / count
}

/// Aggregate bytes over the average stream duration, in binary Mbps
pub fn throughput_mbps(total_bytes: u64, average: Duration) -> f64 {
    let secs = average.as_secs_f64();
    if secs > 0.0 {
        (total_bytes as f64 * 8.0) / secs / MEGABIT
    } else {
        0.0
    }
}

pub fn bytes_to_human(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
