//! `hostprobe sample`: one reading of the host, right now.

use hostprobe_core::{MetricSource, SystemSource, TemperatureSensor};

use super::fail;

pub fn run(thermal_zone: Option<&str>, json: bool) {
    let sensor = match thermal_zone {
        Some(path) => TemperatureSensor::ThermalZone { path: path.into() },
        None => TemperatureSensor::default(),
    };
    let mut source = SystemSource::new(sensor);
    std::thread::sleep(source.prime());
    let sample = source.sample().unwrap_or_else(|e| fail(e));

    if json {
        match serde_json::to_string_pretty(&sample) {
            Ok(text) => println!("{text}"),
            Err(e) => fail(e),
        }
        return;
    }

    println!("Time:     {}", sample.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"));
    println!("CPU:      {:.1}%", sample.cpu_usage_pct);
    println!("RAM used: {:.2} MB", sample.ram_used_mb);
    match sample.cpu_temp_c {
        Some(t) => println!("CPU temp: {t:.1}°C"),
        None => println!("CPU temp: N/A"),
    }
}
