//! `hostprobe record`: run the background sampler and report its averages.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hostprobe_core::{
    Isolation, SamplerConfig, SamplerError, SamplerReport, SamplerSupervisor, SinkPolicy,
    TemperatureSensor, render_summary,
};

use super::{fail, parse_duration};

pub struct RecordCommandConfig<'a> {
    pub config_path: Option<&'a str>,
    pub output: Option<&'a str>,
    pub buffered: bool,
    pub summary: Option<&'a str>,
    pub interval: Option<&'a str>,
    pub grace: Option<&'a str>,
    pub duration: Option<&'a str>,
    pub isolation: Option<&'a str>,
    pub thermal_zone: Option<&'a str>,
    pub no_temperature: bool,
    pub json: bool,
}

/// Layer flags over the config file (or the defaults).
fn build_config(cmd: &RecordCommandConfig) -> Result<SamplerConfig, String> {
    let mut config = match cmd.config_path {
        Some(path) => SamplerConfig::from_json_file(Path::new(path))
            .map_err(|e| format!("cannot load config {path}: {e}"))?,
        None => SamplerConfig::default(),
    };

    if let Some(out) = cmd.output {
        config.sink = SinkPolicy::incremental(out);
    }
    if cmd.buffered {
        config.sink = SinkPolicy::Buffered {
            summary: cmd.summary.map(PathBuf::from),
        };
    }
    if let Some(iv) = cmd.interval {
        config.interval_secs = parse_duration(iv)?.as_secs_f64();
    }
    if let Some(g) = cmd.grace {
        config.grace_period_secs = Some(parse_duration(g)?.as_secs_f64());
    }
    match cmd.isolation {
        Some("thread") => config.isolation = Isolation::Thread,
        Some("process") => config.isolation = Isolation::Process,
        Some(other) => return Err(format!("unknown isolation {other:?}")),
        None => {}
    }
    if cmd.no_temperature {
        config.temperature = TemperatureSensor::Disabled;
    } else if let Some(zone) = cmd.thermal_zone {
        config.temperature = TemperatureSensor::ThermalZone { path: zone.into() };
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Run the record command.
pub fn run(cmd: RecordCommandConfig) {
    let config = build_config(&cmd).unwrap_or_else(|e| fail(e));
    let max_duration = cmd
        .duration
        .map(|d| parse_duration(d).unwrap_or_else(|e| fail(e)));

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        fail(format!("cannot set Ctrl+C handler: {e}"));
    }

    let mut handle = SamplerSupervisor::new(config.clone())
        .start()
        .unwrap_or_else(|e| fail(e));

    if !cmd.json {
        println!("Recording host metrics");
        println!("  Run:       {}", handle.run_id());
        println!("  Interval:  {:.3}s", config.interval_secs);
        println!("  Grace:     {:.3}s", config.grace_period().as_secs_f64());
        println!("  Isolation: {}", config.isolation);
        match &config.sink {
            SinkPolicy::Incremental { path } => println!("  Sink:      {}", path.display()),
            SinkPolicy::Buffered { summary: Some(p) } => {
                println!("  Sink:      memory (summary to {})", p.display());
            }
            SinkPolicy::Buffered { summary: None } => println!("  Sink:      memory"),
        }
        match max_duration {
            Some(d) => println!("  Duration:  {:.1}s", d.as_secs_f64()),
            None => println!("  Duration:  until Ctrl+C"),
        }
        println!();
    }

    let start = Instant::now();
    let mut last_paint: Option<Instant> = None;
    while running.load(Ordering::SeqCst) {
        if let Some(max) = max_duration
            && start.elapsed() >= max
        {
            break;
        }
        if !handle.is_alive() {
            break;
        }
        let now = Instant::now();
        if !cmd.json && repaint_due(last_paint, now, config.interval()) {
            print!("\r  Elapsed: {:.1}s", start.elapsed().as_secs_f64());
            let _ = std::io::Write::flush(&mut std::io::stdout());
            last_paint = Some(now);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if !cmd.json {
        println!();
        println!();
    }

    match handle.stop() {
        Ok(report) if cmd.json => print_json(&report),
        Ok(report) => print_report(&report),
        Err(SamplerError::WorkerFailed(failure)) => {
            eprintln!("Sampler failed: {}", failure.reason);
            if !failure.stats.is_empty() {
                eprint!("{}", render_summary(&failure.stats));
            }
            std::process::exit(1);
        }
        Err(e) => fail(e),
    }
}

/// The status line is repainted once per sampling interval.
fn repaint_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.is_none_or(|t| now.saturating_duration_since(t) >= interval)
}

fn print_report(report: &SamplerReport) {
    print!("{}", render_summary(&report.stats));
    println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
    println!("Throughput: {:.2} samples/s", report.throughput());
    if report.is_partial() {
        println!("Note: worker did not stop within the grace period; statistics are partial.");
    }
}

fn print_json(report: &SamplerReport) {
    let value = serde_json::json!({
        "run_id": report.run_id.to_string(),
        "isolation": report.isolation.to_string(),
        "partial": report.is_partial(),
        "samples": report.samples,
        "elapsed_secs": report.elapsed.as_secs_f64(),
        "throughput": report.throughput(),
        "stats": report.stats,
    });
    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{text}"),
        Err(e) => fail(e),
    }
}
