//! Operator console for a CityFlow traffic simulation.
//!
//! Follows the live simulation state (push with polling fallback), plays
//! back recorded runs frame by frame, and merges the metrics of several
//! runs into rows ready for charting.
//!
//! # Architecture
//!
//! ```text
//! WebSocket /ws/state --+
//!                       +--> StreamClient --> live log
//! GET /state ----------+
//! GET /replays/{id} ------> PlaybackEngine --> frame log
//! GET /metrics?run_id= ---> merge --> JSON lines
//! ```

mod commands;
mod config;
mod error;

use cityflow_sync::ApiClient;
use cityflow_timeline::MetricField;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DashboardConfig;
use crate::error::DashboardError;

/// Command line interface.
#[derive(Parser, Debug)]
#[command(name = "cityflow-dashboard")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the live simulation state
    Live {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Play back a recorded run
    Replay {
        /// Run to play back
        run_id: String,
        /// Maximum number of frames to fetch
        #[arg(long)]
        limit: Option<u32>,
        /// Full passes over the frames before stopping
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        loops: u32,
    },
    /// Merge one metric of several runs onto a shared time axis
    Compare {
        /// Runs to compare
        #[arg(required = true)]
        run_ids: Vec<String>,
        /// Metric to extract (`vehicle_count`, `avg_speed`, `avg_waiting`, `throughput`)
        #[arg(long, default_value = "vehicle_count")]
        metric: MetricField,
    },
    /// List recorded runs
    Runs,
}

/// Application entry point.
///
/// Initializes logging, loads configuration from environment variables and
/// runs the requested subcommand.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the command fails.
#[tokio::main]
async fn main() -> Result<(), DashboardError> {
    let cli = Cli::parse();
    init_tracing();

    let config = DashboardConfig::from_env()?;
    info!(
        api_url = %config.sync.api_url,
        ws_url = ?config.sync.ws_url.as_ref().map(ToString::to_string),
        fallback_poll_interval_ms = config.sync.fallback_poll_interval.as_millis(),
        reconnect_delay_ms = config.sync.reconnect_delay.as_millis(),
        playback_tick_ms = config.playback_tick.as_millis(),
        "configuration loaded"
    );

    match cli.command {
        Command::Live { duration_secs } => {
            commands::live(&config, duration_secs.map(std::time::Duration::from_secs)).await
        }
        Command::Replay {
            run_id,
            limit,
            loops,
        } => {
            let api = ApiClient::new(&config.sync)?;
            commands::replay(&config, &api, &run_id, limit, loops)
                .await
                .map(|_| ())
        }
        Command::Compare { run_ids, metric } => {
            let api = ApiClient::new(&config.sync)?;
            let mut out = std::io::stdout().lock();
            commands::compare(&api, &run_ids, metric, &mut out)
                .await
                .map(|_| ())
        }
        Command::Runs => {
            let api = ApiClient::new(&config.sync)?;
            let mut out = std::io::stdout().lock();
            commands::runs(&api, &mut out).await.map(|_| ())
        }
    }
}

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}
