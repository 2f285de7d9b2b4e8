use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Fully resolved probe configuration, assembled once in `main` and passed
/// down explicitly. No component reads the environment on its own.
#[derive(Debug, Clone)]
pub struct Config {
    pub influx: InfluxSettings,
    pub service_command: String,
    pub timings: Timings,
}

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl InfluxSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Wall-clock knobs for the lifecycle probe. The probed service exposes no
/// readiness API, so these are fixed waits rather than event-driven signals.
#[derive(Debug, Clone)]
pub struct Timings {
    pub grace: Duration,
    pub poll_interval: Duration,
    pub observe: Duration,
    pub shutdown_timeout: Duration,
    pub query_window: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            observe: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            query_window: Duration::from_secs(300),
        }
    }
}

pub fn load(path: &Path, timings: Timings) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading env file {}", path.display()))?;
    from_env_text(&content, timings)
}

/// Parse `KEY=VALUE` lines into a map. `#`-prefixed comments and blank lines
/// are skipped, values may be single- or double-quoted, and a repeated key
/// keeps its last occurrence.
pub fn parse_env(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        vars.insert(key.trim().to_string(), value.to_string());
    }
    vars
}

pub fn from_env_text(text: &str, timings: Timings) -> Result<Config> {
    let vars = parse_env(text);

    let require = |key: &str| -> Result<String> {
        vars.get(key)
            .cloned()
            .with_context(|| format!("missing required key {key}"))
    };

    let host = vars
        .get("INFLUXDB_HOST")
        .cloned()
        .unwrap_or_else(|| "localhost".to_string());
    let port = match vars.get("INFLUXDB_PORT") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid INFLUXDB_PORT {raw:?}"))?,
        None => 8086,
    };

    Ok(Config {
        influx: InfluxSettings {
            host,
            port,
            token: require("INFLUXDB_TOKEN")?,
            org: require("INFLUXDB_ORG")?,
            bucket: require("INFLUXDB_BUCKET")?,
        },
        service_command: vars
            .get("SERVICE_COMMAND")
            .cloned()
            .unwrap_or_else(|| "ruuvi-sensor-service daemon".to_string()),
        timings,
    })
}
