//! Sample persistence: a durable CSV sink or an in-memory buffer.
//!
//! # Incremental-durable
//!
//! The sink file is truncated and given its header once, at initialization.
//! Every sample is rendered into one complete line and handed to the OS with
//! a single write followed by a flush, so a reader (or a killed process)
//! sees either the whole row or none of it. Only running sums are kept.
//!
//! # Buffered
//!
//! Samples go to a [`SampleBuffer`] shared with the supervisor. Nothing is
//! written per tick; an optional summary file is written once at finish.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::aggregate::{Accumulator, AggregatedStats, aggregate, render_summary};
use crate::error::{Result, SamplerError};
use crate::sample::{MetricSample, SINK_HEADER};

/// Where samples go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SinkPolicy {
    /// One flushed CSV row per sample; no history kept.
    Incremental { path: PathBuf },
    /// Full history in memory; optional summary written at stop.
    Buffered {
        #[serde(default)]
        summary: Option<PathBuf>,
    },
}

impl SinkPolicy {
    pub fn incremental(path: impl Into<PathBuf>) -> Self {
        Self::Incremental { path: path.into() }
    }

    pub fn sink_path(&self) -> Option<&Path> {
        match self {
            Self::Incremental { path } => Some(path),
            Self::Buffered { .. } => None,
        }
    }

    pub fn retains_history(&self) -> bool {
        matches!(self, Self::Buffered { .. })
    }
}

// ---------------------------------------------------------------------------
// Shared buffer
// ---------------------------------------------------------------------------

/// Mutex-guarded sample history shared between a thread worker (appender)
/// and its supervisor (reader).
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    inner: Arc<Mutex<Vec<MetricSample>>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MetricSample>> {
        // A panicking worker cannot leave a half-pushed Vec behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, sample: MetricSample) {
        self.lock().push(sample);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the history taken under the lock.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        self.lock().clone()
    }

    pub fn aggregate(&self) -> AggregatedStats {
        aggregate(&self.lock())
    }
}

// ---------------------------------------------------------------------------
// CSV sink
// ---------------------------------------------------------------------------

/// Append-only CSV file, one row per sample.
pub struct CsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows: u64,
    cancelled: Option<Arc<AtomicBool>>,
}

impl CsvSink {
    /// No I/O happens until [`initialize`](Self::initialize).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            rows: 0,
            cancelled: None,
        }
    }

    /// Once `flag` is raised, [`append`](Self::append) writes nothing.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancelled = Some(flag);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Acquire))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Create the file with its header. Calling again is a no-op.
    pub fn initialize(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let fail = |e: std::io::Error| SamplerError::persistence(&self.path, &e);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(fail)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(fail)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{SINK_HEADER}").map_err(fail)?;
        writer.flush().map_err(fail)?;

        self.writer = Some(writer);
        Ok(())
    }

    /// Write one complete row and flush it before returning. Returns
    /// `false` without writing if the cancel flag is raised.
    pub fn append(&mut self, sample: &MetricSample) -> Result<bool> {
        let row = sample.to_row();
        if self.is_cancelled() {
            return Ok(false);
        }
        let writer = self.writer.as_mut().ok_or_else(|| SamplerError::Persistence {
            path: self.path.clone(),
            message: "sink used before initialization".into(),
        })?;
        writer
            .write_all(row.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| SamplerError::persistence(&self.path, &e))?;
        self.rows += 1;
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn read_only_for_test(path: &Path) -> Self {
        let file = File::open(path).expect("open sink read-only");
        Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            rows: 0,
            cancelled: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reading a sink back
// ---------------------------------------------------------------------------

/// Rows recovered from a sink file.
#[derive(Debug, Clone, Default)]
pub struct SinkContents {
    pub rows: Vec<MetricSample>,
    /// A trailing line without its newline: an interrupted write, skipped.
    pub skipped_partial: bool,
}

/// Read a sink file back. The header must be intact; complete rows are
/// parsed in order and an unterminated final line is discarded.
pub fn read_sink(path: &Path) -> Result<SinkContents> {
    let text = fs::read_to_string(path)?;
    let format_err = |line: usize, message: String| SamplerError::SinkFormat {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut lines: Vec<&str> = text.split('\n').collect();
    // `split` leaves "" after a final newline; anything else is a cut-off row.
    let tail = lines.pop().unwrap_or_default();
    let skipped_partial = !tail.is_empty();

    let mut iter = lines.into_iter().enumerate();
    match iter.next() {
        Some((_, header)) if header.trim_end_matches('\r') == SINK_HEADER => {}
        Some((_, other)) => return Err(format_err(1, format!("unexpected header '{other}'"))),
        None => return Err(format_err(1, "missing header".into())),
    }

    let mut rows = Vec::new();
    for (idx, line) in iter {
        if line.trim().is_empty() {
            continue;
        }
        let sample = MetricSample::parse_row(line).map_err(|m| format_err(idx + 1, m))?;
        rows.push(sample);
    }

    Ok(SinkContents {
        rows,
        skipped_partial,
    })
}

/// Means over a sink file, computed the way the incremental writer does
/// (no peaks).
pub fn accumulate_sink(path: &Path) -> Result<AggregatedStats> {
    let contents = read_sink(path)?;
    let mut acc = Accumulator::new();
    acc.extend(&contents.rows);
    Ok(acc.finish())
}

// ---------------------------------------------------------------------------
// MetricsWriter
// ---------------------------------------------------------------------------

enum Mode {
    Incremental {
        sink: CsvSink,
        acc: Accumulator,
    },
    Buffered {
        buffer: SampleBuffer,
        summary: Option<PathBuf>,
        summary_written: bool,
    },
}

/// Persists samples according to a [`SinkPolicy`].
pub struct MetricsWriter {
    mode: Mode,
    initialized: bool,
    cancelled: Arc<AtomicBool>,
}

impl MetricsWriter {
    /// `buffer` is only used by the buffered policy.
    pub fn new(policy: &SinkPolicy, buffer: SampleBuffer) -> Self {
        let mode = match policy {
            SinkPolicy::Incremental { path } => Mode::Incremental {
                sink: CsvSink::new(path),
                acc: Accumulator::new(),
            },
            SinkPolicy::Buffered { summary } => Mode::Buffered {
                buffer,
                summary: summary.clone(),
                summary_written: false,
            },
        };
        Self {
            mode,
            initialized: false,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_sink(sink: CsvSink) -> Self {
        Self {
            mode: Mode::Incremental {
                sink,
                acc: Accumulator::new(),
            },
            initialized: true,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag an abandoning supervisor raises; nothing is persisted after it.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        if let Mode::Incremental { sink, .. } = &mut self.mode {
            sink.set_cancel_flag(Arc::clone(&flag));
        }
        self.cancelled = flag;
    }

    /// Write the sink header. Idempotent.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        if let Mode::Incremental { sink, .. } = &mut self.mode {
            sink.initialize()?;
        }
        self.initialized = true;
        Ok(())
    }

    pub fn persist(&mut self, sample: &MetricSample) -> Result<()> {
        match &mut self.mode {
            Mode::Incremental { sink, acc } => {
                if sink.append(sample)? {
                    acc.push(sample);
                }
            }
            Mode::Buffered { buffer, .. } => {
                if !self.cancelled.load(Ordering::Acquire) {
                    buffer.push(sample.clone());
                }
            }
        }
        Ok(())
    }

    pub fn samples(&self) -> usize {
        match &self.mode {
            Mode::Incremental { acc, .. } => acc.len(),
            Mode::Buffered { buffer, .. } => buffer.len(),
        }
    }

    /// Statistics over everything persisted so far.
    pub fn stats(&self) -> AggregatedStats {
        match &self.mode {
            Mode::Incremental { acc, .. } => acc.finish(),
            Mode::Buffered { buffer, .. } => buffer.aggregate(),
        }
    }

    /// Final statistics. In buffered mode with a summary path, the summary
    /// file is written once; a failure there is logged, not fatal.
    pub fn finish(&mut self) -> AggregatedStats {
        let stats = self.stats();
        if let Mode::Buffered {
            summary: Some(path),
            summary_written,
            ..
        } = &mut self.mode
            && !*summary_written
        {
            match write_summary(path, &stats) {
                Ok(()) => log::info!("summary written to {}", path.display()),
                Err(e) => log::warn!("cannot write summary {}: {e}", path.display()),
            }
            *summary_written = true;
        }
        stats
    }
}

/// Write the summary atomically: temp file in the same directory, then rename.
fn write_summary(path: &Path, stats: &AggregatedStats) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(render_summary(stats).as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn sample(cpu: f64, ram: f64, temp: Option<f64>) -> MetricSample {
        MetricSample::new(Local::now(), cpu, ram, temp)
    }

    #[test]
    fn initialize_writes_header_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/metrics.csv");
        let mut w = MetricsWriter::new(&SinkPolicy::incremental(&path), SampleBuffer::new());
        w.initialize().unwrap();
        w.persist(&sample(1.0, 2.0, None)).unwrap();
        w.initialize().unwrap();
        w.persist(&sample(3.0, 4.0, Some(40.0))).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], SINK_HEADER);
        assert_eq!(text.matches(SINK_HEADER).count(), 1);
    }

    #[test]
    fn each_row_is_on_disk_when_persist_returns() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metrics.csv");
        let mut w = MetricsWriter::new(&SinkPolicy::incremental(&path), SampleBuffer::new());
        w.initialize().unwrap();
        for i in 0..5 {
            w.persist(&sample(f64::from(i), 100.0, None)).unwrap();
            let contents = read_sink(&path).unwrap();
            assert_eq!(contents.rows.len(), i as usize + 1);
            assert!(!contents.skipped_partial);
        }
    }

    #[test]
    fn incremental_stats_have_no_peaks() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = MetricsWriter::new(
            &SinkPolicy::incremental(tmp.path().join("m.csv")),
            SampleBuffer::new(),
        );
        w.initialize().unwrap();
        w.persist(&sample(10.0, 100.0, Some(30.0))).unwrap();
        w.persist(&sample(30.0, 300.0, None)).unwrap();
        let stats = w.finish();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.cpu_avg, Some(20.0));
        assert_eq!(stats.temp_avg_c, Some(30.0));
        assert_eq!(stats.cpu_max, None);
        assert_eq!(stats.ram_max_mb, None);
    }

    #[test]
    fn buffered_mode_does_no_io_and_keeps_peaks() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = SampleBuffer::new();
        let mut w = MetricsWriter::new(&SinkPolicy::Buffered { summary: None }, buffer.clone());
        w.initialize().unwrap();
        w.persist(&sample(5.0, 50.0, None)).unwrap();
        w.persist(&sample(15.0, 70.0, None)).unwrap();

        assert_eq!(buffer.len(), 2);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
        let stats = w.finish();
        assert_eq!(stats.cpu_max, Some(15.0));
        assert_eq!(stats.ram_max_mb, Some(70.0));
        assert_eq!(stats.temp_avg_c, None);
    }

    #[test]
    fn buffered_summary_written_once() {
        let tmp = tempfile::tempdir().unwrap();
        let summary = tmp.path().join("out/stats.txt");
        let mut w = MetricsWriter::new(
            &SinkPolicy::Buffered {
                summary: Some(summary.clone()),
            },
            SampleBuffer::new(),
        );
        w.persist(&sample(40.0, 1024.0, Some(50.0))).unwrap();
        w.finish();
        let first = fs::read_to_string(&summary).unwrap();
        assert!(first.contains("Samples: 1"));
        assert!(first.contains("CPU temp: 50.0°C"));

        fs::remove_file(&summary).unwrap();
        w.finish();
        assert!(!summary.exists());
    }

    #[test]
    fn raised_cancel_flag_stops_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.csv");
        let flag = Arc::new(AtomicBool::new(false));
        let mut w = MetricsWriter::new(&SinkPolicy::incremental(&path), SampleBuffer::new());
        w.set_cancel_flag(Arc::clone(&flag));
        w.initialize().unwrap();
        w.persist(&sample(1.0, 10.0, None)).unwrap();
        flag.store(true, Ordering::Release);
        w.persist(&sample(2.0, 20.0, None)).unwrap();

        assert_eq!(read_sink(&path).unwrap().rows.len(), 1);
        assert_eq!(w.samples(), 1);
        assert_eq!(w.stats().cpu_avg, Some(1.0));
    }

    #[test]
    fn raised_cancel_flag_stops_buffering() {
        let buffer = SampleBuffer::new();
        let flag = Arc::new(AtomicBool::new(true));
        let mut w = MetricsWriter::new(&SinkPolicy::Buffered { summary: None }, buffer.clone());
        w.set_cancel_flag(flag);
        w.persist(&sample(1.0, 10.0, None)).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn append_failure_is_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.csv");
        fs::write(&path, format!("{SINK_HEADER}\n")).unwrap();
        let mut sink = CsvSink::read_only_for_test(&path);
        let err = sink.append(&sample(1.0, 1.0, None)).unwrap_err();
        assert!(matches!(err, SamplerError::Persistence { .. }));
        assert_eq!(sink.rows(), 0);
    }

    #[test]
    fn append_before_initialize_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(tmp.path().join("m.csv"));
        assert!(sink.append(&sample(1.0, 1.0, None)).is_err());
    }

    #[test]
    fn read_sink_skips_unterminated_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.csv");
        let full = sample(12.0, 512.0, Some(45.0)).to_row();
        fs::write(&path, format!("{SINK_HEADER}\n{full}2026-03-01 10:00:00.12")).unwrap();

        let contents = read_sink(&path).unwrap();
        assert_eq!(contents.rows.len(), 1);
        assert!(contents.skipped_partial);
        assert_eq!(contents.rows[0].cpu_temp_c, Some(45.0));
    }

    #[test]
    fn read_sink_rejects_bad_header() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.csv");
        fs::write(&path, "timestamp,cpu,ram\n").unwrap();
        assert!(matches!(
            read_sink(&path),
            Err(SamplerError::SinkFormat { line: 1, .. })
        ));
    }

    #[test]
    fn read_sink_reports_bad_row_line_number() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.csv");
        let ok = sample(1.0, 1.0, None).to_row();
        fs::write(&path, format!("{SINK_HEADER}\n{ok}garbage,row\n")).unwrap();
        match read_sink(&path) {
            Err(SamplerError::SinkFormat { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn accumulate_sink_matches_writer_stats() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.csv");
        let mut w = MetricsWriter::new(&SinkPolicy::incremental(&path), SampleBuffer::new());
        w.initialize().unwrap();
        w.persist(&sample(10.0, 1000.0, Some(41.0))).unwrap();
        w.persist(&sample(20.0, 3000.0, None)).unwrap();
        assert_eq!(accumulate_sink(&path).unwrap(), w.stats());
    }

    #[test]
    fn policy_serde_shape() {
        let json = serde_json::to_string(&SinkPolicy::incremental("share/m.csv")).unwrap();
        assert_eq!(json, r#"{"mode":"incremental","path":"share/m.csv"}"#);
        let back: SinkPolicy = serde_json::from_str(r#"{"mode":"buffered"}"#).unwrap();
        assert_eq!(back, SinkPolicy::Buffered { summary: None });
    }
}
