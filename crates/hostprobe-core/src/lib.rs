//! # hostprobe-core
//!
//! **Background host telemetry: CPU, RAM and CPU temperature at a fixed
//! cadence, while your code keeps running.**
//!
//! A worker samples the host every interval and persists each sample before
//! taking the next one. The caller starts it, does its work, then stops it and
//! gets averages back.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hostprobe_core::{Isolation, SamplerConfig, SamplerSupervisor};
//!
//! let config = SamplerConfig {
//!     isolation: Isolation::Thread,
//!     ..SamplerConfig::with_sink("share/system_metrics.csv", 0.5)
//! };
//! let mut handle = SamplerSupervisor::new(config).start()?;
//!
//! // ... the workload being measured ...
//!
//! let report = handle.stop()?;
//! println!("{} samples, cpu avg {:?}", report.samples, report.stats.cpu_avg);
//! # Ok::<(), hostprobe_core::SamplerError>(())
//! ```
//!
//! ## Architecture
//!
//! Source → Worker (sample, persist, poll, wait) → Sink → Aggregate
//!
//! Two persistence policies:
//! - **Incremental** (default): every sample is appended and flushed to a CSV
//!   file; averages are accumulated on the fly. A crash loses at most the
//!   in-flight row.
//! - **Buffered**: samples are kept in memory; stop returns averages and
//!   peaks, and optionally writes a summary file.
//!
//! Two isolation modes: a thread in the caller's process, or a separate
//! process (an executable's `worker` subcommand, by default the current one)
//! that is killed if it ignores the stop request past the grace period. The
//! crate-level [`start`] always uses a thread.

pub mod aggregate;
pub mod config;
pub mod control;
pub mod error;
pub mod sample;
pub mod source;
pub mod supervisor;
pub mod worker;
pub mod writer;

pub use aggregate::{Accumulator, AggregatedStats, aggregate, render_summary};
pub use config::{Isolation, SamplerConfig, WorkerCommand};
pub use error::{Result, SamplerError, WorkerFailure};
pub use sample::{MetricSample, SINK_HEADER};
pub use source::{MetricSource, SystemSource, TemperatureSensor};
pub use supervisor::{
    Completion, SamplerHandle, SamplerReport, SamplerSupervisor, start, stop,
};
pub use worker::{WorkerExit, WorkerReport, WorkerState, run_child_worker};
pub use writer::{SinkPolicy, accumulate_sink, read_sink};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
