pub mod record;
pub mod sample;
pub mod summarize;
pub mod worker;

use std::time::Duration;

/// Parse a duration string like "5m", "30s", "1h", "100ms", "0.5".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 0.001)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1.0)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60.0)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3600.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {s:?}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid duration: {s:?}"));
    }
    Duration::try_from_secs_f64(value * multiplier)
        .map_err(|_| format!("duration out of range: {s:?}"))
}

/// Print an error and exit non-zero.
pub fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}
