use clap::Parser;
use ruuvi_probe::config::{self, Timings};
use ruuvi_probe::influx::InfluxClient;
use ruuvi_probe::runner;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// ruuvi-probe — lifecycle and ingestion probe for the Ruuvi sensor service.
///
/// Starts the service, keeps it under observation for a fixed window,
/// verifies that sensor data landed in InfluxDB, then shuts the service
/// down. Prints a pass/fail summary and exits with a graded code:
/// 0 all passed, 1 at least 75% passed, 2 below 75%, 3 setup failure,
/// 130 interrupted.
#[derive(Parser, Debug)]
#[command(name = "ruuvi-probe", version, about)]
struct Cli {
    /// Path to the KEY=VALUE env file with InfluxDB settings.
    #[arg(short, long, default_value = "ruuvi.env")]
    env_file: PathBuf,

    /// Startup grace period in seconds.
    #[arg(long, default_value_t = 10)]
    grace: u64,

    /// Liveness poll interval in seconds.
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Observation window in seconds.
    #[arg(long, default_value_t = 60)]
    observe: u64,

    /// Graceful shutdown timeout in seconds.
    #[arg(long, default_value_t = 30)]
    shutdown_timeout: u64,

    /// How far back the ingestion query looks, in seconds.
    #[arg(long, default_value_t = 300)]
    query_window: u64,

    /// Write the full result set to a JSON report file.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose logging (sets RUST_LOG=debug).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(env_file = %cli.env_file.display(), "starting ruuvi-probe");

    let timings = Timings {
        grace: Duration::from_secs(cli.grace),
        poll_interval: Duration::from_secs(cli.poll_interval),
        observe: Duration::from_secs(cli.observe),
        shutdown_timeout: Duration::from_secs(cli.shutdown_timeout),
        query_window: Duration::from_secs(cli.query_window),
    };

    let cfg = match config::load(&cli.env_file, timings) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: loading config from {}: {e:#}", cli.env_file.display());
            return ExitCode::from(3);
        }
    };

    let client = match InfluxClient::new(&cfg.influx) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(3);
        }
    };

    info!(
        service = cfg.service_command,
        influxdb = cfg.influx.base_url(),
        bucket = cfg.influx.bucket,
        observe_secs = cfg.timings.observe.as_secs(),
        "configuration loaded"
    );

    // The service child is spawned kill-on-drop, so abandoning the run
    // future on interrupt still reaps it.
    let report = tokio::select! {
        report = runner::run(&cfg, &client) => report,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            return ExitCode::from(130);
        }
    };

    if let Some(path) = &cli.report {
        if let Err(e) = report.write_json(path) {
            eprintln!("error: writing report to {}: {e:#}", path.display());
        }
    }

    report.print_summary();
    ExitCode::from(report.exit_code())
}
