//! Sampler configuration.
//!
//! Layering: [`SamplerConfig::default`], then an optional JSON file, then
//! whatever the caller overrides field by field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SamplerError};
use crate::source::TemperatureSensor;
use crate::writer::SinkPolicy;

/// Default sampling interval in seconds.
pub const DEFAULT_INTERVAL_SECS: f64 = 0.5;

/// Default sink path, relative to the working directory.
pub const DEFAULT_SINK_PATH: &str = "share/system_metrics.csv";

/// Argument the default [`WorkerCommand`] passes to the current executable.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// How the worker is isolated from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Thread in the caller's address space, sharing a guarded buffer.
    Thread,
    /// Separate OS process; results come back through the sink or a report.
    #[default]
    Process,
}

impl std::fmt::Display for Isolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thread => write!(f, "thread"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Configuration for one sampler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_secs: f64,
    /// Must exceed the interval. `None` means twice the interval.
    pub grace_period_secs: Option<f64>,
    pub sink: SinkPolicy,
    pub isolation: Isolation,
    pub temperature: TemperatureSensor,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            grace_period_secs: None,
            sink: SinkPolicy::incremental(DEFAULT_SINK_PATH),
            isolation: Isolation::default(),
            temperature: TemperatureSensor::default(),
        }
    }
}

impl SamplerConfig {
    /// Incremental sink at `sink_path`, everything else default.
    pub fn with_sink(sink_path: impl Into<PathBuf>, interval_secs: f64) -> Self {
        Self {
            interval_secs,
            sink: SinkPolicy::incremental(sink_path),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.interval_secs.is_finite() || self.interval_secs <= 0.0 {
            return Err(SamplerError::InvalidConfig(format!(
                "interval must be a positive number of seconds, got {}",
                self.interval_secs
            )));
        }
        let grace = self.grace_secs();
        if !grace.is_finite() || grace <= self.interval_secs {
            return Err(SamplerError::InvalidConfig(format!(
                "grace period ({grace}s) must be longer than the interval ({}s)",
                self.interval_secs
            )));
        }
        for (name, secs) in [("interval", self.interval_secs), ("grace period", grace)] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(SamplerError::InvalidConfig(format!(
                    "{name} of {secs}s is out of range"
                )));
            }
        }
        Ok(())
    }

    fn grace_secs(&self) -> f64 {
        self.grace_period_secs.unwrap_or(self.interval_secs * 2.0)
    }

    /// Callers must [`validate`](Self::validate) first.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.grace_secs())
    }
}

/// Executable (and leading arguments) that runs a process worker. The
/// supervisor appends `--run-id <uuid> --config-json <json>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![WORKER_SUBCOMMAND.to_string()],
        }
    }

    /// The running executable, assumed to expose the `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}
