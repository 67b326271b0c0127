//! Worker lifecycle: start, cooperative stop with a bounded grace period,
//! forced termination, and collection of the final statistics.
//!
//! A thread cannot be killed, so forcing a thread worker means raising its
//! cancellation flag and detaching it: it exits on its own at its next
//! checkpoint without persisting anything further. A process worker is
//! killed outright.
//!
//! The flag is re-checked right before each row is written, so the only
//! remaining window is a thread stuck inside the write call itself: that
//! one row may land after `stop` has returned.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::aggregate::AggregatedStats;
use crate::config::{Isolation, SamplerConfig, WorkerCommand};
use crate::control::{StopSender, control_channel};
use crate::error::{Result, SamplerError, WorkerFailure};
use crate::source::{MetricSource, SystemSource};
use crate::worker::{SamplerWorker, WorkerExit, WorkerReport, WorkerState, WorkerStatus, parse_child_report};
use crate::writer::{MetricsWriter, SampleBuffer, SinkPolicy, accumulate_sink};

const EXIT_POLL: Duration = Duration::from_millis(10);

/// Whether the worker finished its cooperative shutdown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Clean,
    /// Terminated after the grace period; statistics are partial.
    Forced,
}

/// Result of a stopped sampler run.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerReport {
    pub run_id: Uuid,
    pub isolation: Isolation,
    pub completion: Completion,
    pub samples: usize,
    pub stats: AggregatedStats,
    /// From start until the worker was observed gone.
    pub elapsed: Duration,
}

impl SamplerReport {
    pub fn is_partial(&self) -> bool {
        self.completion == Completion::Forced
    }

    /// Samples per second over the run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.samples as f64 / secs
        } else {
            0.0
        }
    }
}

struct Finished {
    completion: Completion,
    samples: usize,
    stats: AggregatedStats,
}

type Outcome = std::result::Result<Finished, WorkerFailure>;

enum Worker {
    Thread {
        join: Option<JoinHandle<WorkerReport>>,
        buffer: SampleBuffer,
        cancelled: Arc<AtomicBool>,
        status: WorkerStatus,
    },
    Process {
        child: Child,
    },
}

/// Starts samplers from a fixed configuration.
#[derive(Debug, Clone)]
pub struct SamplerSupervisor {
    config: SamplerConfig,
    worker_command: Option<WorkerCommand>,
}

impl SamplerSupervisor {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            worker_command: None,
        }
    }

    /// Executable for process isolation; defaults to the current executable.
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Spawn a worker sampling the host. Returns without waiting for the
    /// first sample.
    pub fn start(&self) -> Result<SamplerHandle> {
        self.config.validate()?;
        match self.config.isolation {
            Isolation::Thread => {
                let source = SystemSource::new(self.config.temperature.clone());
                self.spawn_thread(Box::new(source))
            }
            Isolation::Process => self.spawn_process(),
        }
    }

    /// Spawn a thread worker over a caller-provided source.
    pub fn start_with_source(&self, source: Box<dyn MetricSource>) -> Result<SamplerHandle> {
        self.config.validate()?;
        if self.config.isolation != Isolation::Thread {
            return Err(SamplerError::InvalidConfig(
                "custom metric sources require thread isolation".into(),
            ));
        }
        self.spawn_thread(source)
    }

    fn spawn_thread(&self, source: Box<dyn MetricSource>) -> Result<SamplerHandle> {
        let run_id = Uuid::new_v4();
        let (control, rx) = control_channel();
        let buffer = SampleBuffer::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let status = WorkerStatus::default();

        let writer = MetricsWriter::new(&self.config.sink, buffer.clone());
        let worker = SamplerWorker::new(run_id, source, writer, rx, self.config.interval())
            .with_status(status.clone())
            .with_cancel_flag(Arc::clone(&cancelled));

        let join = thread::Builder::new()
            .name("hostprobe-sampler".into())
            .spawn(move || worker.run())?;

        log::info!("run {run_id}: started thread worker");
        Ok(SamplerHandle {
            run_id,
            config: self.config.clone(),
            control,
            worker: Worker::Thread {
                join: Some(join),
                buffer,
                cancelled,
                status,
            },
            started: Instant::now(),
            outcome: None,
        })
    }

    fn spawn_process(&self) -> Result<SamplerHandle> {
        let command = match &self.worker_command {
            Some(c) => c.clone(),
            None => WorkerCommand::current_exe()?,
        };
        let run_id = Uuid::new_v4();
        let config_json = serde_json::to_string(&self.config)?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg("--run-id")
            .arg(run_id.to_string())
            .arg("--config-json")
            .arg(config_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SamplerError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SamplerError::Io(std::io::Error::other(
                "worker process has no stdin pipe",
            )));
        };

        log::info!(
            "run {run_id}: started worker process {} (pid {})",
            command.program.display(),
            child.id()
        );
        Ok(SamplerHandle {
            run_id,
            config: self.config.clone(),
            control: StopSender::for_child(stdin),
            worker: Worker::Process { child },
            started: Instant::now(),
            outcome: None,
        })
    }
}

/// Caller-owned reference to one running sampler.
pub struct SamplerHandle {
    run_id: Uuid,
    config: SamplerConfig,
    control: StopSender,
    worker: Worker,
    started: Instant,
    outcome: Option<std::result::Result<SamplerReport, WorkerFailure>>,
}

impl SamplerHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn isolation(&self) -> Isolation {
        self.config.isolation
    }

    pub fn sink_path(&self) -> Option<&Path> {
        self.config.sink.sink_path()
    }

    /// Worker state, observable for thread workers only.
    pub fn worker_state(&self) -> Option<WorkerState> {
        match &self.worker {
            Worker::Thread { status, .. } => Some(status.get()),
            Worker::Process { .. } => None,
        }
    }

    /// Whether the worker is still executing.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.worker {
            Worker::Thread { join, .. } => join.as_ref().is_some_and(|j| !j.is_finished()),
            Worker::Process { child } => matches!(child.try_wait(), Ok(None)),
        }
    }

    /// Stop the worker and return its statistics.
    ///
    /// Waits at most the grace period for a cooperative exit, then forces
    /// termination and returns partial statistics. An abnormal worker exit
    /// is an error. The outcome is computed once; later calls return it
    /// again.
    pub fn stop(&mut self) -> Result<SamplerReport> {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => self.finish(),
        };
        self.outcome = Some(outcome.clone());
        outcome.map_err(SamplerError::WorkerFailed)
    }

    fn finish(&mut self) -> std::result::Result<SamplerReport, WorkerFailure> {
        let grace = self.config.grace_period();
        if !self.control.send() {
            log::debug!("run {}: stop token not delivered; worker already gone", self.run_id);
        }

        let outcome = match &mut self.worker {
            Worker::Thread {
                join,
                buffer,
                cancelled,
                ..
            } => finish_thread(self.run_id, &self.config.sink, grace, join, buffer, cancelled),
            Worker::Process { child } => {
                let outcome = finish_process(self.run_id, &self.config.sink, grace, child);
                self.control.close();
                outcome
            }
        };
        let elapsed = self.started.elapsed();

        match outcome {
            Ok(finished) => {
                if finished.completion == Completion::Forced {
                    log::warn!(
                        "run {}: worker did not stop within {:.3}s; forced termination, {} samples recovered",
                        self.run_id,
                        grace.as_secs_f64(),
                        finished.samples
                    );
                }
                Ok(SamplerReport {
                    run_id: self.run_id,
                    isolation: self.config.isolation,
                    completion: finished.completion,
                    samples: finished.samples,
                    stats: finished.stats,
                    elapsed,
                })
            }
            Err(failure) => {
                log::warn!("run {}: worker failed: {failure}", self.run_id);
                Err(failure)
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if self.outcome.is_none()
            && let Err(e) = self.stop()
        {
            log::warn!("run {}: stopped on drop: {e}", self.run_id);
        }
    }
}

fn finish_thread(
    run_id: Uuid,
    sink: &SinkPolicy,
    grace: Duration,
    join: &mut Option<JoinHandle<WorkerReport>>,
    buffer: &SampleBuffer,
    cancelled: &AtomicBool,
) -> Outcome {
    let Some(handle) = join.take() else {
        return Err(WorkerFailure {
            reason: "worker thread already reaped".into(),
            stats: recover_stats(sink, Some(buffer)),
        });
    };

    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            cancelled.store(true, Ordering::Release);
            // Detach: the thread exits at its next checkpoint.
            drop(handle);
            let stats = recover_stats(sink, Some(buffer));
            return Ok(Finished {
                completion: Completion::Forced,
                samples: stats.samples,
                stats,
            });
        }
        thread::sleep(EXIT_POLL.min(remaining));
    }

    match handle.join() {
        Ok(report) => from_report(run_id, report),
        Err(_) => Err(WorkerFailure {
            reason: "worker thread panicked".into(),
            stats: recover_stats(sink, Some(buffer)),
        }),
    }
}

fn finish_process(run_id: Uuid, sink: &SinkPolicy, grace: Duration, child: &mut Child) -> Outcome {
    let deadline = Instant::now() + grace;
    let exited: Option<ExitStatus> = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(e) => {
                log::warn!("run {run_id}: cannot poll worker process: {e}");
                break None;
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break None;
        }
        thread::sleep(EXIT_POLL.min(remaining));
    };

    let Some(status) = exited else {
        let _ = child.kill();
        let _ = child.wait();
        let stats = recover_stats(sink, None);
        return Ok(Finished {
            completion: Completion::Forced,
            samples: stats.samples,
            stats,
        });
    };

    let mut stdout = String::new();
    if let Some(mut pipe) = child.stdout.take()
        && let Err(e) = pipe.read_to_string(&mut stdout)
    {
        log::warn!("run {run_id}: cannot read worker report: {e}");
    }

    match parse_child_report(&stdout) {
        Some(report) => from_report(run_id, report),
        None => Err(WorkerFailure {
            reason: format!("worker process exited ({status}) without a report"),
            stats: recover_stats(sink, None),
        }),
    }
}

fn from_report(run_id: Uuid, report: WorkerReport) -> Outcome {
    if report.run_id != run_id {
        return Err(WorkerFailure {
            reason: format!("report belongs to run {}, expected {run_id}", report.run_id),
            stats: AggregatedStats::default(),
        });
    }
    match report.exit {
        WorkerExit::Stopped => Ok(Finished {
            completion: Completion::Clean,
            samples: report.samples,
            stats: report.stats,
        }),
        WorkerExit::Cancelled => Ok(Finished {
            completion: Completion::Forced,
            samples: report.samples,
            stats: report.stats,
        }),
        exit @ (WorkerExit::PersistenceFailed { .. } | WorkerExit::SourceFailed { .. }) => {
            Err(WorkerFailure {
                reason: exit.describe(),
                stats: report.stats,
            })
        }
    }
}

/// Best-effort statistics when the worker's own report is unavailable.
fn recover_stats(sink: &SinkPolicy, buffer: Option<&SampleBuffer>) -> AggregatedStats {
    match sink {
        SinkPolicy::Incremental { path } => accumulate_sink(path).unwrap_or_else(|e| {
            log::warn!("cannot read back sink {}: {e}", path.display());
            AggregatedStats::default()
        }),
        SinkPolicy::Buffered { .. } => buffer.map(SampleBuffer::aggregate).unwrap_or_default(),
    }
}

/// Start a sampler writing to `sink_path` every `interval_seconds`.
///
/// The worker is a thread in the calling process, so this works from any
/// binary. Process isolation needs an executable that implements the
/// `worker` subcommand; configure it through [`SamplerSupervisor`] and
/// [`SamplerSupervisor::with_worker_command`].
pub fn start(sink_path: impl Into<PathBuf>, interval_seconds: f64) -> Result<SamplerHandle> {
    let config = SamplerConfig {
        isolation: Isolation::Thread,
        ..SamplerConfig::with_sink(sink_path, interval_seconds)
    };
    SamplerSupervisor::new(config).start()
}

/// Stop a sampler started with [`start`] or a [`SamplerSupervisor`].
pub fn stop(handle: &mut SamplerHandle) -> Result<SamplerReport> {
    handle.stop()
}
