//! Remote data verifier: query the InfluxDB 2.x HTTP API and parse the
//! annotated-CSV reply into records for summary reporting.

use crate::config::InfluxSettings;
use crate::error::ProbeError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;

pub type Record = HashMap<String, String>;

pub struct InfluxClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    org: String,
}

impl InfluxClient {
    pub fn new(settings: &InfluxSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url: settings.base_url(),
            token: settings.token.clone(),
            org: settings.org.clone(),
        })
    }

    /// Hit `/health` and confirm the instance reports a passing status.
    pub async fn ping(&self) -> Result<(), ProbeError> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProbeError::Query {
                status: status.as_u16(),
                body,
            });
        }
        let health: serde_json::Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(_) => {
                return Err(ProbeError::Query {
                    status: status.as_u16(),
                    body,
                })
            }
        };
        match health.get("status").and_then(|s| s.as_str()) {
            Some("pass") => Ok(()),
            _ => Err(ProbeError::Query {
                status: status.as_u16(),
                body,
            }),
        }
    }

    /// Run a Flux query and parse the annotated-CSV response.
    pub async fn query(&self, flux: &str) -> Result<Vec<Record>, ProbeError> {
        let url = format!("{}/api/v2/query", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .header("Content-Type", "application/vnd.flux")
            .body(flux.to_string())
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProbeError::Query {
                status: status.as_u16(),
                body,
            });
        }
        Ok(parse_annotated_csv(&body))
    }
}

/// Columns the query API always emits; a line carrying at least two of them
/// is treated as a table header.
const STRUCTURAL_COLUMNS: &[&str] = &["result", "table", "_time", "_value"];

fn is_header(fields: &[&str]) -> bool {
    fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| STRUCTURAL_COLUMNS.contains(f))
        .count()
        >= 2
}

/// Parse the line-oriented annotated-CSV reply.
///
/// `#`-prefixed annotation lines and blanks are skipped. Each header line
/// (re-detected per table in multi-table replies) defines the columns that
/// following data rows are zipped against. Rows whose field count disagrees
/// with the header are dropped without error.
pub fn parse_annotated_csv(body: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut header: Option<Vec<String>> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        if is_header(&fields) {
            header = Some(fields.iter().map(|f| f.trim().to_string()).collect());
            continue;
        }

        let Some(columns) = header.as_ref() else {
            continue;
        };
        if fields.len() != columns.len() {
            debug!(
                expected = columns.len(),
                got = fields.len(),
                "dropping malformed row"
            );
            continue;
        }

        records.push(
            columns
                .iter()
                .cloned()
                .zip(fields.iter().map(|f| f.trim().to_string()))
                .collect(),
        );
    }

    records
}

#[derive(Debug, Default, Serialize)]
pub struct QuerySummary {
    pub total_points: usize,
    /// Point counts keyed by `measurement/field`.
    pub by_series: BTreeMap<String, usize>,
    /// Distinct source identifiers (`mac` tag, falling back to `host`).
    pub sources: BTreeSet<String>,
    /// Maximum `_time` observed, as reported by the API.
    pub latest: Option<String>,
}

pub fn summarize(records: &[Record]) -> QuerySummary {
    let mut summary = QuerySummary::default();
    for record in records {
        let measurement = record.get("_measurement").map(String::as_str).unwrap_or("?");
        let field = record.get("_field").map(String::as_str).unwrap_or("?");
        *summary
            .by_series
            .entry(format!("{measurement}/{field}"))
            .or_insert(0) += 1;

        if let Some(source) = record.get("mac").or_else(|| record.get("host")) {
            summary.sources.insert(source.clone());
        }
        if let Some(time) = record.get("_time") {
            // RFC 3339 timestamps order lexicographically.
            if summary.latest.as_deref().is_none_or(|l| time.as_str() > l) {
                summary.latest = Some(time.clone());
            }
        }
        summary.total_points += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string\n\
#group,false,false,true,true,false,false,true,true,true\n\
#default,_result,,,,,,,,\n\
,result,table,_start,_stop,_time,_value,_field,_measurement,mac\n\
,_result,0,2024-01-01T00:00:00Z,2024-01-01T01:00:00Z,2024-01-01T00:10:00Z,21.5,temperature,ruuvi_measurement,AA:BB\n\
,_result,0,2024-01-01T00:00:00Z,2024-01-01T01:00:00Z,2024-01-01T00:20:00Z,21.7,temperature,ruuvi_measurement,AA:BB\n";

    #[test]
    fn test_parse_skips_annotations() {
        let records = parse_annotated_csv(RESPONSE);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["_value"], "21.5");
        assert_eq!(records[1]["_time"], "2024-01-01T00:20:00Z");
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(parse_annotated_csv(RESPONSE), parse_annotated_csv(RESPONSE));
    }

    #[test]
    fn test_malformed_rows_dropped() {
        let body = "table,result,_start,_stop,_time,_value,_field,_measurement\n\
                    0,_result,a,b,t1,1.0,temperature,ruuvi_measurement\n\
                    0,_result,too,few,fields\n";
        let records = parse_annotated_csv(body);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_rows_before_header_dropped() {
        let body = "1,2,3\ntable,result,_time,_value\n0,_result,t1,1.0\n";
        assert_eq!(parse_annotated_csv(body).len(), 1);
    }

    #[test]
    fn test_multi_table_reply_redetects_header() {
        let body = "\
,result,table,_time,_value,_field,_measurement\n\
,_result,0,t1,1.0,temperature,ruuvi_measurement\n\
\n\
,result,table,_time,_value,_field,_measurement,mac\n\
,_result,1,t2,55,humidity,ruuvi_measurement,AA:BB\n";
        let records = parse_annotated_csv(body);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["mac"], "AA:BB");
    }

    #[test]
    fn test_summarize_groups_by_measurement_and_field() {
        let summary = summarize(&parse_annotated_csv(RESPONSE));
        assert_eq!(summary.total_points, 2);
        assert_eq!(summary.by_series["ruuvi_measurement/temperature"], 2);
        assert_eq!(summary.sources.len(), 1);
        assert!(summary.sources.contains("AA:BB"));
        assert_eq!(summary.latest.as_deref(), Some("2024-01-01T00:20:00Z"));
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_points, 0);
        assert!(summary.latest.is_none());
    }
}
