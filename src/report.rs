use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Outcome of a single check, created once and printed/serialized at the end
/// of the run. Timestamps serialize as RFC 3339 text.
#[derive(Debug, Serialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An in-flight check, timing itself from construction until `pass`/`fail`.
pub struct RunningTest {
    name: String,
    started_at: DateTime<Utc>,
    timer: Instant,
    details: BTreeMap<String, Value>,
}

impl RunningTest {
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started_at: Utc::now(),
            timer: Instant::now(),
            details: BTreeMap::new(),
        }
    }

    pub fn detail(&mut self, key: &str, value: impl Into<Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    pub fn pass(self) -> TestResult {
        self.finish(true, None)
    }

    pub fn fail(self, error: impl Into<String>) -> TestResult {
        self.finish(false, Some(error.into()))
    }

    fn finish(self, success: bool, error: Option<String>) -> TestResult {
        TestResult {
            name: self.name,
            success,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_secs: self.timer.elapsed().as_secs_f64(),
            details: self.details,
            error,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ProbeReport {
    pub results: Vec<TestResult>,
}

impl ProbeReport {
    pub fn push(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.passed() as f64 * 100.0 / self.results.len() as f64
    }

    /// Graded exit code: 0 all passed, 1 at least 75% passed, 2 below 75%.
    pub fn exit_code(&self) -> u8 {
        if self.results.iter().all(|r| r.success) {
            0
        } else if self.success_rate() >= 75.0 {
            1
        } else {
            2
        }
    }

    pub fn print_summary(&self) {
        println!();
        println!("==== ruuvi-probe report ====");
        for result in &self.results {
            let mark = if result.success { "PASS" } else { "FAIL" };
            println!(
                "[{mark}] {} ({:.1}s)",
                result.name, result.duration_secs
            );
            for (key, value) in &result.details {
                println!("       {key}: {value}");
            }
            if let Some(error) = &result.error {
                println!("       {error}");
            }
        }
        println!("----------------------------");
        println!(
            "{}/{} checks passed ({:.1}%)",
            self.passed(),
            self.results.len(),
            self.success_rate()
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing report")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report {}", path.display()))
    }
}
