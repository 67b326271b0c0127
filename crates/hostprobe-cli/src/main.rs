//! CLI for hostprobe: sample host CPU, RAM and temperature in the background.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hostprobe")]
#[command(about = "hostprobe: sample host CPU, RAM and temperature in the background")]
#[command(version = hostprobe_core::VERSION)]
struct Cli {
    /// Log lifecycle events to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample in the background for a duration (or until Ctrl+C), then print averages
    Record {
        /// JSON sampler config; flags below override its fields
        #[arg(long)]
        config: Option<String>,

        /// CSV sink path (incremental persistence)
        #[arg(long)]
        output: Option<String>,

        /// Keep samples in memory instead of writing a CSV sink
        #[arg(long, conflicts_with = "output")]
        buffered: bool,

        /// With --buffered: write a summary file here at stop
        #[arg(long, requires = "buffered")]
        summary: Option<String>,

        /// Sampling interval (e.g. 500ms, 1s, 0.25)
        #[arg(long)]
        interval: Option<String>,

        /// How long to wait for a cooperative stop before forcing it
        #[arg(long)]
        grace: Option<String>,

        /// Recording duration (e.g. 30s, 5m); default is until Ctrl+C
        #[arg(long)]
        duration: Option<String>,

        /// Worker isolation
        #[arg(long, value_parser = ["thread", "process"])]
        isolation: Option<String>,

        /// Thermal zone file holding millidegrees Celsius
        #[arg(long, conflicts_with = "no_temperature")]
        thermal_zone: Option<String>,

        /// Never read a temperature
        #[arg(long)]
        no_temperature: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read a CSV sink back and print its averages
    Summarize {
        /// Sink file written by `record` or by the library
        path: String,

        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Take one sample of the host and print it
    Sample {
        /// Thermal zone file holding millidegrees Celsius
        #[arg(long)]
        thermal_zone: Option<String>,

        /// Print the sample as JSON
        #[arg(long)]
        json: bool,
    },

    /// Process-isolated worker entry point (spawned by the supervisor)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        config_json: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Record {
            config,
            output,
            buffered,
            summary,
            interval,
            grace,
            duration,
            isolation,
            thermal_zone,
            no_temperature,
            json,
        } => commands::record::run(commands::record::RecordCommandConfig {
            config_path: config.as_deref(),
            output: output.as_deref(),
            buffered,
            summary: summary.as_deref(),
            interval: interval.as_deref(),
            grace: grace.as_deref(),
            duration: duration.as_deref(),
            isolation: isolation.as_deref(),
            thermal_zone: thermal_zone.as_deref(),
            no_temperature,
            json,
        }),
        Commands::Summarize { path, json } => commands::summarize::run(&path, json),
        Commands::Sample { thermal_zone, json } => {
            commands::sample::run(thermal_zone.as_deref(), json)
        }
        Commands::Worker {
            run_id,
            config_json,
        } => commands::worker::run(&run_id, &config_json),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}
