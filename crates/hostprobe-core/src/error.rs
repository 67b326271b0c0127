//! Error types for hostprobe-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::aggregate::AggregatedStats;

/// Why a worker ended abnormally, plus whatever could be salvaged.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFailure {
    pub reason: String,
    /// Statistics over the samples persisted before the failure.
    pub stats: AggregatedStats,
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} samples collected)", self.reason, self.stats.samples)
    }
}

/// Errors produced by the sampler.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused a CPU or RAM reading. Fatal to the worker.
    #[error("metric source failed: {0}")]
    Source(String),

    /// The sink could not be written. Fatal to the worker.
    #[error("cannot persist sample to {}: {message}", .path.display())]
    Persistence { path: PathBuf, message: String },

    #[error("malformed sink {} line {line}: {message}", .path.display())]
    SinkFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to spawn worker process {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker exited without completing its cooperative shutdown path.
    #[error("sampler worker failed: {0}")]
    WorkerFailed(WorkerFailure),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SamplerError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = SamplerError> = std::result::Result<T, E>;
