//! `hostprobe summarize`: read a sink back and print its statistics.

use std::path::Path;

use hostprobe_core::{aggregate, read_sink, render_summary};

use super::fail;

pub fn run(path: &str, json: bool) {
    let contents = read_sink(Path::new(path)).unwrap_or_else(|e| fail(e));
    let stats = aggregate(&contents.rows);

    if json {
        match serde_json::to_string_pretty(&stats) {
            Ok(text) => println!("{text}"),
            Err(e) => fail(e),
        }
        return;
    }

    println!("{path}");
    print!("{}", render_summary(&stats));
    if stats.temp_samples < stats.samples {
        println!(
            "Temperature unavailable in {} of {} samples",
            stats.samples - stats.temp_samples,
            stats.samples
        );
    }
    if contents.skipped_partial {
        println!("Note: ignored an incomplete trailing row");
    }
}
