//! Sequential probe scenario: connectivity, baseline query, service startup,
//! observation window, ingestion delta, graceful shutdown.
//!
//! Every check converts its own failure into a failed [`TestResult`] rather
//! than aborting the run; only a failed startup skips the dependent checks.

use crate::config::Config;
use crate::error::ProbeError;
use crate::influx::{self, InfluxClient};
use crate::probe;
use crate::report::{ProbeReport, RunningTest, TestResult};
use tracing::info;

pub async fn run(config: &Config, client: &InfluxClient) -> ProbeReport {
    let mut report = ProbeReport::default();

    let test = RunningTest::start("influxdb connectivity");
    match client.ping().await {
        Ok(()) => report.push(test.pass()),
        Err(e) => report.push(test.fail(e.to_string())),
    }

    let flux = ingestion_query(config);
    let mut test = RunningTest::start("baseline query");
    let baseline = match client.query(&flux).await {
        Ok(records) => {
            let summary = influx::summarize(&records);
            test.detail("points", summary.total_points as u64);
            report.push(test.pass());
            Some(summary.total_points)
        }
        Err(e) => {
            report.push(test.fail(e.to_string()));
            None
        }
    };

    let mut test = RunningTest::start("service startup");
    let mut command = config.service_command.split_whitespace();
    let program = command.next().unwrap_or_default();
    let args: Vec<&str> = command.collect();
    let handle = match probe::start(program, &args, config.timings.grace).await {
        Ok(handle) => {
            if let Some(pid) = handle.pid() {
                test.detail("pid", pid as u64);
            }
            report.push(test.pass());
            Some(handle)
        }
        Err(e) => {
            report.push(test.fail(e.to_string()));
            None
        }
    };

    let Some(mut handle) = handle else {
        report.push(skipped("observation window"));
        report.push(skipped("data ingestion"));
        report.push(skipped("graceful shutdown"));
        return report;
    };

    let mut test = RunningTest::start("observation window");
    let outcome = probe::monitor(
        &mut handle,
        config.timings.observe,
        config.timings.poll_interval,
    )
    .await;
    let service_survived = !outcome.unexpected_exit;
    if outcome.unexpected_exit {
        let status = outcome
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown status".to_string());
        let error = ProbeError::UnexpectedExit {
            status,
            elapsed_secs: outcome.elapsed.as_secs_f64(),
        };
        let stderr = handle.captured_stderr().await;
        if !stderr.trim().is_empty() {
            test.detail("stderr", stderr.trim().to_string());
        }
        report.push(test.fail(error.to_string()));
    } else {
        report.push(test.pass());
    }

    let mut test = RunningTest::start("data ingestion");
    match client.query(&flux).await {
        Ok(records) => {
            let summary = influx::summarize(&records);
            test.detail("points", summary.total_points as u64);
            test.detail("sources", summary.sources.len() as u64);
            if let Some(latest) = &summary.latest {
                test.detail("latest", latest.clone());
            }
            let grew = match baseline {
                Some(before) => summary.total_points > before,
                None => summary.total_points > 0,
            };
            if grew {
                report.push(test.pass());
            } else {
                report.push(test.fail("no new points observed in the query window"));
            }
        }
        Err(e) => report.push(test.fail(e.to_string())),
    }

    let mut test = RunningTest::start("graceful shutdown");
    let graceful = probe::stop(handle, config.timings.shutdown_timeout).await;
    test.detail("graceful", graceful);
    if graceful || !service_survived {
        report.push(test.pass());
    } else {
        report.push(test.fail("shutdown timed out, service was killed"));
    }

    info!(
        passed = report.passed(),
        total = report.results.len(),
        "probe run complete"
    );
    report
}

fn ingestion_query(config: &Config) -> String {
    format!(
        "from(bucket: \"{}\")\n  |> range(start: -{}s)\n  |> filter(fn: (r) => r._measurement == \"ruuvi_measurement\")",
        config.influx.bucket,
        config.timings.query_window.as_secs()
    )
}

fn skipped(name: &str) -> TestResult {
    RunningTest::start(name).fail("skipped: service startup failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InfluxSettings, Timings};

    fn config(bucket: &str) -> Config {
        Config {
            influx: InfluxSettings {
                host: "localhost".to_string(),
                port: 8086,
                token: "t".to_string(),
                org: "o".to_string(),
                bucket: bucket.to_string(),
            },
            service_command: "ruuvi-sensor-service".to_string(),
            timings: Timings::default(),
        }
    }

    #[test]
    fn test_ingestion_query_targets_bucket_and_window() {
        let flux = ingestion_query(&config("ruuvi"));
        assert!(flux.contains("from(bucket: \"ruuvi\")"));
        assert!(flux.contains("range(start: -300s)"));
        assert!(flux.contains("ruuvi_measurement"));
    }
}
