//! Hidden `hostprobe worker`: body of a process-isolated sampler.
//!
//! Stdout carries exactly one line, the JSON worker report. Logs go to
//! stderr.

use hostprobe_core::{SamplerConfig, run_child_worker};
use uuid::Uuid;

pub fn run(run_id: &str, config_json: &str) {
    // Ctrl+C reaches the whole process group; only the supervisor's stop
    // token ends this worker.
    if let Err(e) = ctrlc::set_handler(|| {}) {
        log::warn!("cannot ignore Ctrl+C in worker: {e}");
    }

    let run_id = match Uuid::parse_str(run_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: invalid run id {run_id:?}: {e}");
            std::process::exit(1);
        }
    };
    let config: SamplerConfig = match serde_json::from_str(config_json) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: invalid worker config: {e}");
            std::process::exit(1);
        }
    };

    match run_child_worker(&config, run_id) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
