//! Reduction of a sample series into summary statistics.
//!
//! Two forms produce the same means:
//! - [`aggregate`] over a retained history, which also yields peaks;
//! - [`Accumulator`], fed one sample at a time, which keeps no history and
//!   therefore never reports peaks.
//!
//! Unavailable temperatures are excluded from the temperature mean and are
//! never counted as zero.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::sample::MetricSample;

/// Summary statistics for one sampler run.
///
/// Every statistic is `None` for an empty run. Peaks are `None` whenever the
/// run did not retain its history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub samples: usize,
    /// Samples that carried a real temperature.
    pub temp_samples: usize,
    pub cpu_avg: Option<f64>,
    pub cpu_max: Option<f64>,
    pub ram_avg_mb: Option<f64>,
    pub ram_max_mb: Option<f64>,
    pub temp_avg_c: Option<f64>,
}

impl AggregatedStats {
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    pub fn has_peaks(&self) -> bool {
        self.cpu_max.is_some() || self.ram_max_mb.is_some()
    }
}

/// Running sums for the incremental (history-free) mode.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    samples: usize,
    cpu_sum: f64,
    ram_sum: f64,
    temp_sum: f64,
    temp_samples: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: &MetricSample) {
        self.samples += 1;
        self.cpu_sum += sample.cpu_usage_pct;
        self.ram_sum += sample.ram_used_mb;
        if let Some(t) = sample.cpu_temp_c {
            self.temp_sum += t;
            self.temp_samples += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Means only; peaks are absent.
    pub fn finish(&self) -> AggregatedStats {
        AggregatedStats {
            samples: self.samples,
            temp_samples: self.temp_samples,
            cpu_avg: mean(self.cpu_sum, self.samples),
            cpu_max: None,
            ram_avg_mb: mean(self.ram_sum, self.samples),
            ram_max_mb: None,
            temp_avg_c: mean(self.temp_sum, self.temp_samples),
        }
    }
}

impl<'a> Extend<&'a MetricSample> for Accumulator {
    fn extend<I: IntoIterator<Item = &'a MetricSample>>(&mut self, iter: I) {
        for sample in iter {
            self.push(sample);
        }
    }
}

fn mean(sum: f64, n: usize) -> Option<f64> {
    (n > 0).then(|| sum / n as f64)
}

fn peak(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
}

/// Aggregate a retained sample history, peaks included.
pub fn aggregate(samples: &[MetricSample]) -> AggregatedStats {
    let mut acc = Accumulator::new();
    acc.extend(samples);
    AggregatedStats {
        cpu_max: peak(samples.iter().map(|s| s.cpu_usage_pct)),
        ram_max_mb: peak(samples.iter().map(|s| s.ram_used_mb)),
        ..acc.finish()
    }
}

/// Human-readable summary block, one statistic per line.
pub fn render_summary(stats: &AggregatedStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Samples: {}", stats.samples);

    match stats.cpu_avg {
        Some(avg) => {
            let _ = write!(out, "CPU: {avg:.1}%");
            if let Some(max) = stats.cpu_max {
                let _ = write!(out, " (peak: {max:.1}%)");
            }
            out.push('\n');
        }
        None => out.push_str("CPU: N/A\n"),
    }

    match stats.ram_avg_mb {
        Some(avg) => {
            let _ = write!(out, "RAM: {avg:.2} MB");
            if let Some(max) = stats.ram_max_mb {
                let _ = write!(out, " (peak: {max:.2} MB)");
            }
            out.push('\n');
        }
        None => out.push_str("RAM: N/A\n"),
    }

    match stats.temp_avg_c {
        Some(t) => {
            let _ = writeln!(out, "CPU temp: {t:.1}°C");
        }
        None => out.push_str("CPU temp: N/A\n"),
    }
    out
}
