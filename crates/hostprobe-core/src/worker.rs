//! The sample → persist → poll → wait loop.
//!
//! State machine:
//!
//! ```text
//! Idle ──initialize──▶ Running ──stop token──▶ Stopping ──finish──▶ Exited
//!                         │
//!                         └──persistence / source failure──────────▶ Exited
//! ```
//!
//! The stop token is polled once per tick, and the wait between ticks also
//! wakes on it, so detection never takes longer than one interval.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::AggregatedStats;
use crate::config::SamplerConfig;
use crate::control::StopReceiver;
use crate::error::Result;
use crate::source::{MetricSource, SystemSource};
use crate::writer::{MetricsWriter, SampleBuffer};

/// Child exit code after a cooperative stop.
pub const EXIT_STOPPED: i32 = 0;
/// Child exit code when the sink could not be written.
pub const EXIT_PERSISTENCE_FAILED: i32 = 2;
/// Child exit code when CPU/RAM could not be read.
pub const EXIT_SOURCE_FAILED: i32 = 3;
/// Child exit code when the worker was cancelled before stopping.
pub const EXIT_CANCELLED: i32 = 4;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Exited = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Exited,
        }
    }
}

/// Worker state readable from another thread.
#[derive(Debug, Clone)]
pub struct WorkerStatus(Arc<AtomicU8>);

impl Default for WorkerStatus {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Idle as u8)))
    }
}

impl WorkerStatus {
    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// How the worker left its loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerExit {
    /// Stop token honored; cooperative shutdown completed.
    Stopped,
    /// The supervisor gave up on this worker; nothing was persisted after.
    Cancelled,
    PersistenceFailed { message: String },
    SourceFailed { message: String },
}

impl WorkerExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Stopped => EXIT_STOPPED,
            Self::PersistenceFailed { .. } => EXIT_PERSISTENCE_FAILED,
            Self::SourceFailed { .. } => EXIT_SOURCE_FAILED,
            Self::Cancelled => EXIT_CANCELLED,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Stopped => "stopped".into(),
            Self::Cancelled => "cancelled".into(),
            Self::PersistenceFailed { message } => format!("persistence failure: {message}"),
            Self::SourceFailed { message } => format!("metric source failure: {message}"),
        }
    }
}

/// The worker's final account of its run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub run_id: Uuid,
    pub exit: WorkerExit,
    pub samples: usize,
    pub stats: AggregatedStats,
}

/// Runs the sampling loop until stopped, cancelled or failed.
pub struct SamplerWorker {
    run_id: Uuid,
    source: Box<dyn MetricSource>,
    writer: MetricsWriter,
    control: StopReceiver,
    interval: Duration,
    status: WorkerStatus,
    cancelled: Arc<AtomicBool>,
}

impl SamplerWorker {
    pub fn new(
        run_id: Uuid,
        source: Box<dyn MetricSource>,
        writer: MetricsWriter,
        control: StopReceiver,
        interval: Duration,
    ) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut writer = writer;
        writer.set_cancel_flag(Arc::clone(&cancelled));
        Self {
            run_id,
            source,
            writer,
            control,
            interval,
            status: WorkerStatus::default(),
            cancelled,
        }
    }

    /// Share state with a supervisor.
    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = status;
        self
    }

    /// Flag the supervisor sets when it abandons this worker.
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.writer.set_cancel_flag(Arc::clone(&cancelled));
        self.cancelled = cancelled;
        self
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn run(mut self) -> WorkerReport {
        self.status.set(WorkerState::Idle);
        if let Err(e) = self.writer.initialize() {
            log::error!("run {}: sink initialization failed: {e}", self.run_id);
            return self.exit(WorkerExit::PersistenceFailed {
                message: e.to_string(),
            });
        }

        self.status.set(WorkerState::Running);
        log::info!(
            "run {}: sampling every {:.3}s",
            self.run_id,
            self.interval.as_secs_f64()
        );

        let exit = self.sample_loop();
        self.exit(exit)
    }

    fn sample_loop(&mut self) -> WorkerExit {
        let mut last_timestamp: Option<DateTime<Local>> = None;

        // A delta-based source needs a settled baseline before its first
        // reading. A stop during the wait still gets one sample.
        let settle = self.source.prime();
        let mut stop_requested = false;
        if !settle.is_zero() {
            let first = settle.max(self.interval);
            log::debug!(
                "run {}: first sample in {:.3}s",
                self.run_id,
                first.as_secs_f64()
            );
            stop_requested = self.control.wait_until(Instant::now() + first);
        }
        let mut next_tick = Instant::now();

        loop {
            let mut sample = match self.source.sample() {
                Ok(s) => s,
                Err(e) => {
                    log::error!("run {}: {e}", self.run_id);
                    return WorkerExit::SourceFailed {
                        message: e.to_string(),
                    };
                }
            };
            if let Some(prev) = last_timestamp
                && sample.timestamp < prev
            {
                sample.timestamp = prev;
            }
            last_timestamp = Some(sample.timestamp);

            if self.is_cancelled() {
                return WorkerExit::Cancelled;
            }
            if let Err(e) = self.writer.persist(&sample) {
                log::error!("run {}: {e}", self.run_id);
                return WorkerExit::PersistenceFailed {
                    message: e.to_string(),
                };
            }
            log::debug!(
                "run {}: sample {} cpu={:.1}% ram={:.1}MB temp={:?}",
                self.run_id,
                self.writer.samples(),
                sample.cpu_usage_pct,
                sample.ram_used_mb,
                sample.cpu_temp_c
            );

            if self.is_cancelled() {
                return WorkerExit::Cancelled;
            }
            if stop_requested || self.control.poll() {
                return WorkerExit::Stopped;
            }

            // Fixed cadence; a tick that overran is not made up for.
            next_tick += self.interval;
            let now = Instant::now();
            if next_tick < now {
                next_tick = now;
            }
            if self.control.wait_until(next_tick) {
                return WorkerExit::Stopped;
            }
        }
    }

    fn exit(mut self, mut exit: WorkerExit) -> WorkerReport {
        if exit.is_clean() && self.is_cancelled() {
            exit = WorkerExit::Cancelled;
        }
        let stats = if exit.is_clean() {
            self.status.set(WorkerState::Stopping);
            self.writer.finish()
        } else {
            self.writer.stats()
        };
        let samples = self.writer.samples();
        self.status.set(WorkerState::Exited);
        log::info!(
            "run {}: exited ({}) after {samples} samples",
            self.run_id,
            exit.describe()
        );
        WorkerReport {
            run_id: self.run_id,
            exit,
            samples,
            stats,
        }
    }
}

/// Body of a process-isolated worker: samples the host, takes its stop
/// token from stdin and prints its [`WorkerReport`] as one JSON line on
/// stdout. Returns the process exit code.
pub fn run_child_worker(config: &SamplerConfig, run_id: Uuid) -> Result<i32> {
    config.validate()?;
    let source = SystemSource::new(config.temperature.clone());
    let writer = MetricsWriter::new(&config.sink, SampleBuffer::new());
    let control = StopReceiver::from_reader(std::io::stdin());

    let report = SamplerWorker::new(run_id, Box::new(source), writer, control, config.interval())
        .run();

    let line = serde_json::to_string(&report)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}").and_then(|()| out.flush())?;
    Ok(report.exit.exit_code())
}

/// Decode the report line a child printed on stdout, if it printed one.
pub fn parse_child_report(stdout: &str) -> Option<WorkerReport> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    match serde_json::from_str(line) {
        Ok(report) => Some(report),
        Err(e) => {
            log::debug!("unparsable worker report {line:?}: {e}");
            None
        }
    }
}
