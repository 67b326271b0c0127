//! Integration tests for hostprobe-core.
//!
//! These drive the public supervisor API end to end in thread isolation:
//! start → sample/persist ticks → stop → statistics, checked against the
//! sink contents.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use hostprobe_core::{
    Completion, Isolation, MetricSample, MetricSource, SINK_HEADER, SamplerConfig,
    SamplerSupervisor, SinkPolicy, TemperatureSensor, read_sink,
};
use sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;

fn thread_config(sink: SinkPolicy, interval_secs: f64) -> SamplerConfig {
    SamplerConfig {
        interval_secs,
        isolation: Isolation::Thread,
        sink,
        ..SamplerConfig::default()
    }
}

/// cpu = call index, temperature on every other call.
struct Sequence {
    calls: Arc<AtomicUsize>,
}

impl MetricSource for Sequence {
    fn sample(&mut self) -> hostprobe_core::Result<MetricSample> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let temp = (n % 2 == 0).then_some(40.0 + n as f64);
        Ok(MetricSample::new(Local::now(), n as f64, 1000.0 + n as f64, temp))
    }
}

fn sequence() -> (Box<dyn MetricSource>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        Box::new(Sequence {
            calls: Arc::clone(&calls),
        }),
        calls,
    )
}

#[test]
fn half_second_interval_over_two_and_a_half_seconds() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("share/system_metrics.csv");
    let config = SamplerConfig {
        temperature: TemperatureSensor::Disabled,
        ..thread_config(SinkPolicy::incremental(&path), 0.5)
    };

    let mut handle = SamplerSupervisor::new(config).start().unwrap();
    thread::sleep(Duration::from_millis(2500));
    let report = handle.stop().unwrap();

    let contents = read_sink(&path).unwrap();
    let rows = contents.rows.len();
    assert!((4..=6).contains(&rows), "expected 4-6 rows, got {rows}");
    assert_eq!(report.samples, rows);
    assert_eq!(report.completion, Completion::Clean);
    assert!(!contents.skipped_partial);

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().next(), Some(SINK_HEADER));
    assert!(text.ends_with('\n'));
}

#[test]
fn incremental_means_match_sink_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("m.csv");
    let (source, _) = sequence();
    let mut handle = SamplerSupervisor::new(thread_config(SinkPolicy::incremental(&path), 0.02))
        .start_with_source(source)
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    let report = handle.stop().unwrap();

    let rows = read_sink(&path).unwrap().rows;
    assert_eq!(rows.len(), report.samples);
    let n = rows.len() as f64;
    let cpu_mean = rows.iter().map(|r| r.cpu_usage_pct).sum::<f64>() / n;
    let ram_mean = rows.iter().map(|r| r.ram_used_mb).sum::<f64>() / n;
    let temps: Vec<f64> = rows.iter().filter_map(|r| r.cpu_temp_c).collect();
    let temp_mean = temps.iter().sum::<f64>() / temps.len() as f64;

    let stats = report.stats;
    assert!((stats.cpu_avg.unwrap() - cpu_mean).abs() < 1e-9);
    assert!((stats.ram_avg_mb.unwrap() - ram_mean).abs() < 1e-9);
    assert!((stats.temp_avg_c.unwrap() - temp_mean).abs() < 1e-9);
    assert_eq!(stats.temp_samples, temps.len());
    // incremental mode keeps no history
    assert_eq!(stats.cpu_max, None);
}

#[test]
fn buffered_thread_mode_loses_and_duplicates_nothing() {
    let (source, calls) = sequence();
    let mut handle = SamplerSupervisor::new(thread_config(
        SinkPolicy::Buffered { summary: None },
        0.01,
    ))
    .start_with_source(source)
    .unwrap();
    thread::sleep(Duration::from_millis(150));
    let report = handle.stop().unwrap();

    let n = calls.load(Ordering::SeqCst);
    assert_eq!(report.samples, n);
    let expected_cpu = (0..n).map(|i| i as f64).sum::<f64>() / n as f64;
    assert_eq!(report.stats.cpu_avg, Some(expected_cpu));
    assert_eq!(report.stats.cpu_max, Some((n - 1) as f64));
    assert_eq!(report.stats.temp_samples, n.div_ceil(2));
}

#[test]
fn unreadable_sensor_marks_every_row_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("m.csv");
    let config = SamplerConfig {
        temperature: TemperatureSensor::ThermalZone {
            path: tmp.path().join("no-such-zone/temp"),
        },
        ..thread_config(SinkPolicy::incremental(&path), 0.05)
    };
    let mut handle = SamplerSupervisor::new(config).start().unwrap();
    thread::sleep(Duration::from_millis(500));
    let report = handle.stop().unwrap();

    assert_eq!(report.stats.temp_avg_c, None);
    assert_eq!(report.stats.temp_samples, 0);
    assert!(report.stats.cpu_avg.is_some());
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.lines().skip(1).count() >= 2);
    assert!(text.lines().skip(1).all(|l| l.ends_with(",-1")));
}

#[test]
fn thermal_zone_file_is_read_in_degrees() {
    let tmp = tempfile::tempdir().unwrap();
    let zone = tmp.path().join("temp");
    std::fs::write(&zone, "52500\n").unwrap();
    let config = SamplerConfig {
        temperature: TemperatureSensor::ThermalZone { path: zone },
        ..thread_config(SinkPolicy::Buffered { summary: None }, 0.05)
    };
    let mut handle = SamplerSupervisor::new(config).start().unwrap();
    thread::sleep(Duration::from_millis(120));
    let report = handle.stop().unwrap();
    assert_eq!(report.stats.temp_avg_c, Some(52.5));
}

#[test]
fn stop_is_bounded_and_repeatable() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("m.csv");
    let (source, _) = sequence();
    let mut handle = SamplerSupervisor::new(thread_config(SinkPolicy::incremental(&path), 0.5))
        .start_with_source(source)
        .unwrap();
    thread::sleep(Duration::from_millis(100));

    let t0 = Instant::now();
    let first = handle.stop().unwrap();
    assert!(t0.elapsed() < Duration::from_millis(600));

    let rows_after_stop = read_sink(&path).unwrap().rows.len();
    thread::sleep(Duration::from_millis(600));
    let second = handle.stop().unwrap();
    assert_eq!(first, second);
    assert_eq!(read_sink(&path).unwrap().rows.len(), rows_after_stop);
}

#[test]
fn buffered_summary_file_written_at_stop() {
    let tmp = tempfile::tempdir().unwrap();
    let summary = tmp.path().join("out/stats.txt");
    let (source, _) = sequence();
    let mut handle = SamplerSupervisor::new(thread_config(
        SinkPolicy::Buffered {
            summary: Some(summary.clone()),
        },
        0.02,
    ))
    .start_with_source(source)
    .unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!summary.exists());
    let report = handle.stop().unwrap();

    let text = std::fs::read_to_string(&summary).unwrap();
    assert!(text.starts_with(&format!("Samples: {}\n", report.samples)));
    assert!(text.contains("(peak: "));
}

#[test]
fn crate_level_start_and_stop_run_in_process() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("share/system_metrics.csv");
    let mut handle = hostprobe_core::start(&path, 0.1).unwrap();
    assert_eq!(handle.isolation(), Isolation::Thread);
    thread::sleep(Duration::from_millis(600));

    let report = hostprobe_core::stop(&mut handle).unwrap();
    assert_eq!(report.completion, Completion::Clean);
    assert!(report.samples >= 2, "got {} samples", report.samples);
    assert_eq!(read_sink(&path).unwrap().rows.len(), report.samples);
    assert_eq!(hostprobe_core::stop(&mut handle).unwrap(), report);
}

#[test]
fn first_host_reading_waits_for_cpu_baseline() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("m.csv");
    let config = SamplerConfig {
        temperature: TemperatureSensor::Disabled,
        ..thread_config(SinkPolicy::incremental(&path), 0.05)
    };
    let started = Local::now();
    let mut handle = SamplerSupervisor::new(config).start().unwrap();
    thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL + Duration::from_millis(300));
    handle.stop().unwrap();

    let rows = read_sink(&path).unwrap().rows;
    let first = rows.first().expect("at least one row");
    // rows carry microsecond timestamps
    let waited = (first.timestamp - started).to_std().unwrap() + Duration::from_millis(1);
    assert!(
        waited >= MINIMUM_CPU_UPDATE_INTERVAL,
        "first sample after {waited:?}"
    );
}
