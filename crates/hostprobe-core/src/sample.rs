//! One instantaneous host reading and its CSV row encoding.
//!
//! Rows look like:
//!
//! ```text
//! timestamp,cpu_usage_pct,ram_usage_mb,cpu_temp_c
//! 2026-03-01 14:02:11.503217,12.50,3812.41,47.25
//! 2026-03-01 14:02:12.003544,9.80,3812.77,-1
//! ```
//!
//! The bare token `-1` marks an unavailable temperature. Real readings are
//! always written with two decimals, so a genuine -1 °C reading is `-1.00`
//! and never collides with the marker.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Header line of the durable sink.
pub const SINK_HEADER: &str = "timestamp,cpu_usage_pct,ram_usage_mb,cpu_temp_c";

/// Token written in place of an unavailable temperature.
pub const TEMP_UNAVAILABLE: &str = "-1";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A single host metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Local>,
    pub cpu_usage_pct: f64,
    pub ram_used_mb: f64,
    /// `None` when the temperature sensor could not be read.
    pub cpu_temp_c: Option<f64>,
}

impl MetricSample {
    pub fn new(
        timestamp: DateTime<Local>,
        cpu_usage_pct: f64,
        ram_used_mb: f64,
        cpu_temp_c: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            cpu_usage_pct,
            ram_used_mb,
            cpu_temp_c,
        }
    }

    /// Render the full sink row, newline included.
    pub fn to_row(&self) -> String {
        let temp = match self.cpu_temp_c {
            Some(t) => format!("{t:.2}"),
            None => TEMP_UNAVAILABLE.to_string(),
        };
        format!(
            "{},{:.2},{:.2},{}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.cpu_usage_pct,
            self.ram_used_mb,
            temp
        )
    }

    /// Parse one sink row (without its trailing newline).
    pub fn parse_row(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.trim_end_matches('\r').split(',').collect();
        if fields.len() != 4 {
            return Err(format!("expected 4 fields, found {}", fields.len()));
        }

        let naive = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .map_err(|e| format!("bad timestamp '{}': {e}", fields[0]))?;
        let timestamp = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| format!("timestamp '{}' does not exist locally", fields[0]))?;

        let cpu_usage_pct = parse_float(fields[1], "cpu_usage_pct")?;
        let ram_used_mb = parse_float(fields[2], "ram_usage_mb")?;
        let cpu_temp_c = match fields[3].trim() {
            TEMP_UNAVAILABLE => None,
            raw => Some(parse_float(raw, "cpu_temp_c")?),
        };

        Ok(Self {
            timestamp,
            cpu_usage_pct,
            ram_used_mb,
            cpu_temp_c,
        })
    }
}

fn parse_float(raw: &str, column: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("bad {column} value '{raw}'"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("non-finite {column} value '{raw}'"))
    }
}
