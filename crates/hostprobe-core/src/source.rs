//! Metric sources: where samples come from.
//!
//! [`SystemSource`] reads the local host through `sysinfo`. Temperature is
//! best-effort: a sensor that cannot be read yields `None` and the sample
//! still succeeds. CPU and RAM readings are required; a host that cannot
//! report them fails the sample, which ends the worker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};
use sysinfo::{Components, MINIMUM_CPU_UPDATE_INTERVAL, System};

use crate::error::{Result, SamplerError};
use crate::sample::MetricSample;

/// Default sysfs thermal zone, as exposed on Linux single-board computers.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Environment variable overriding [`DEFAULT_THERMAL_ZONE`].
pub const THERMAL_ZONE_ENV: &str = "HOSTPROBE_THERMAL_ZONE";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Anything that can produce one [`MetricSample`] per call.
pub trait MetricSource: Send {
    /// Take one reading. Only CPU/RAM failures are errors.
    fn sample(&mut self) -> Result<MetricSample>;

    /// Establish any baseline the first reading depends on. Returns how long
    /// to wait before that reading is meaningful.
    fn prime(&mut self) -> Duration {
        Duration::ZERO
    }
}

/// Where to read the CPU temperature from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemperatureSensor {
    /// A sysfs file holding millidegrees Celsius.
    ThermalZone { path: PathBuf },
    /// Mean of `sysinfo` components whose label contains `label`.
    Component { label: String },
    /// Never read a temperature.
    Disabled,
}

impl Default for TemperatureSensor {
    fn default() -> Self {
        let path = std::env::var_os(THERMAL_ZONE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_THERMAL_ZONE));
        Self::ThermalZone { path }
    }
}

/// Read a millidegree thermal zone file.
pub fn read_thermal_zone(path: &Path) -> Option<f64> {
    let raw = std::fs::read_to_string(path).ok()?;
    let millis: f64 = raw.trim().parse().ok()?;
    millis.is_finite().then_some(millis / 1000.0)
}

fn plausible(temp: f32) -> bool {
    temp > -60.0 && temp <= 150.0
}

/// Mean over components whose label contains `fragment` (case-insensitive).
fn component_temperature(components: &Components, fragment: &str) -> Option<f64> {
    let frag = fragment.to_lowercase();
    let temps: Vec<f64> = components
        .iter()
        .filter(|c| c.label().to_lowercase().contains(&frag))
        .filter_map(|c| c.temperature())
        .filter(|t| plausible(*t))
        .map(f64::from)
        .collect();
    if temps.is_empty() {
        None
    } else {
        Some(temps.iter().sum::<f64>() / temps.len() as f64)
    }
}

/// Host metrics via `sysinfo`.
pub struct SystemSource {
    sys: System,
    components: Option<Components>,
    sensor: TemperatureSensor,
    sensor_warned: bool,
}

impl SystemSource {
    /// Does no I/O; call [`MetricSource::prime`] before the first sample.
    pub fn new(sensor: TemperatureSensor) -> Self {
        Self {
            sys: System::new(),
            components: None,
            sensor,
            sensor_warned: false,
        }
    }

    pub fn sensor(&self) -> &TemperatureSensor {
        &self.sensor
    }

    fn read_temperature(&mut self) -> Option<f64> {
        let reading = match &self.sensor {
            TemperatureSensor::Disabled => return None,
            TemperatureSensor::ThermalZone { path } => read_thermal_zone(path),
            TemperatureSensor::Component { label } => {
                let components = self.components.as_mut()?;
                components.refresh(true);
                component_temperature(components, label)
            }
        };
        if reading.is_none() && !self.sensor_warned {
            log::warn!(
                "temperature sensor {:?} unreadable; recording samples without temperature",
                self.sensor
            );
            self.sensor_warned = true;
        }
        reading
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new(TemperatureSensor::default())
    }
}

impl MetricSource for SystemSource {
    /// CPU usage is a delta between refreshes, so the first refresh only sets
    /// the baseline.
    fn prime(&mut self) -> Duration {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        if matches!(self.sensor, TemperatureSensor::Component { .. }) && self.components.is_none()
        {
            self.components = Some(Components::new_with_refreshed_list());
        }
        MINIMUM_CPU_UPDATE_INTERVAL
    }

    fn sample(&mut self) -> Result<MetricSample> {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        if self.sys.cpus().is_empty() {
            return Err(SamplerError::Source("no CPUs reported by the OS".into()));
        }
        if self.sys.total_memory() == 0 {
            return Err(SamplerError::Source("OS reported zero total memory".into()));
        }

        let cpu_usage_pct = f64::from(self.sys.global_cpu_usage());
        let ram_used_mb = self.sys.used_memory() as f64 / BYTES_PER_MB;
        let cpu_temp_c = self.read_temperature();

        Ok(MetricSample::new(
            Local::now(),
            cpu_usage_pct,
            ram_used_mb,
            cpu_temp_c,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermal_zone_reads_millidegrees() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("temp");
        std::fs::write(&path, "48312\n").unwrap();
        assert_eq!(read_thermal_zone(&path), Some(48.312));
    }

    #[test]
    fn thermal_zone_missing_or_garbage_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_thermal_zone(&tmp.path().join("absent")), None);
        let path = tmp.path().join("temp");
        std::fs::write(&path, "not a number").unwrap();
        assert_eq!(read_thermal_zone(&path), None);
    }

    #[test]
    fn disabled_sensor_samples_without_temperature() {
        let mut src = SystemSource::new(TemperatureSensor::Disabled);
        src.prime();
        let s = src.sample().unwrap();
        assert_eq!(s.cpu_temp_c, None);
        assert!(s.ram_used_mb > 0.0);
        assert!(s.cpu_usage_pct >= 0.0);
    }

    #[test]
    fn unreadable_sensor_still_samples() {
        let mut src = SystemSource::new(TemperatureSensor::ThermalZone {
            path: PathBuf::from("/nonexistent/hostprobe/thermal"),
        });
        src.prime();
        let s = src.sample().unwrap();
        assert_eq!(s.cpu_temp_c, None);
        // second failure does not change anything either
        assert!(src.sample().unwrap().cpu_temp_c.is_none());
    }

    #[test]
    fn thermal_zone_file_supplies_temperature() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("temp");
        std::fs::write(&path, "51000").unwrap();
        let mut src = SystemSource::new(TemperatureSensor::ThermalZone { path });
        src.prime();
        assert_eq!(src.sample().unwrap().cpu_temp_c, Some(51.0));
    }

    #[test]
    fn sensor_config_serde_shape() {
        let json = serde_json::to_string(&TemperatureSensor::Component {
            label: "cpu".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"component","label":"cpu"}"#);
        let back: TemperatureSensor = serde_json::from_str(r#"{"kind":"disabled"}"#).unwrap();
        assert_eq!(back, TemperatureSensor::Disabled);
    }

    #[test]
    fn plausibility_bounds() {
        assert!(plausible(45.0));
        assert!(plausible(-20.0));
        assert!(!plausible(-100.0));
        assert!(!plausible(200.0));
    }

    #[test]
    fn prime_asks_for_the_cpu_update_interval() {
        let mut src = SystemSource::new(TemperatureSensor::Disabled);
        assert!(src.prime() >= MINIMUM_CPU_UPDATE_INTERVAL);
    }

    #[test]
    fn system_source_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SystemSource>();
    }
}
