use ruuvi_probe::config::InfluxSettings;
use ruuvi_probe::error::ProbeError;
use ruuvi_probe::influx::{self, InfluxClient};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(server: &MockServer) -> InfluxSettings {
    InfluxSettings {
        host: server.address().ip().to_string(),
        port: server.address().port(),
        token: "secret-token".to_string(),
        org: "home".to_string(),
        bucket: "ruuvi".to_string(),
    }
}

const CSV_RESPONSE: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string\r\n\
#group,false,false,true,true,false,false,true,true,true\r\n\
#default,_result,,,,,,,,\r\n\
,result,table,_start,_stop,_time,_value,_field,_measurement,mac\r\n\
,_result,0,2024-01-01T00:00:00Z,2024-01-01T01:00:00Z,2024-01-01T00:10:00Z,21.5,temperature,ruuvi_measurement,AA:BB:CC:DD:EE:FF\r\n\
,_result,0,2024-01-01T00:00:00Z,2024-01-01T01:00:00Z,2024-01-01T00:20:00Z,21.7,temperature,ruuvi_measurement,AA:BB:CC:DD:EE:FF\r\n\
\r\n";

#[tokio::test]
async fn test_query_sends_auth_and_parses_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .and(query_param("org", "home"))
        .and(header("Authorization", "Token secret-token"))
        .and(header("Accept", "application/csv"))
        .and(body_string_contains("from(bucket: \"ruuvi\")"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CSV_RESPONSE))
        .mount(&server)
        .await;

    let client = InfluxClient::new(&settings_for(&server)).unwrap();
    let records = client
        .query("from(bucket: \"ruuvi\") |> range(start: -5m)")
        .await
        .unwrap();

    assert_eq!(records.len(), 2);

    let summary = influx::summarize(&records);
    assert_eq!(summary.total_points, 2);
    assert_eq!(summary.by_series["ruuvi_measurement/temperature"], 2);
    assert!(summary.sources.contains("AA:BB:CC:DD:EE:FF"));
    assert_eq!(summary.latest.as_deref(), Some("2024-01-01T00:20:00Z"));
}

#[tokio::test]
async fn test_query_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized access"))
        .mount(&server)
        .await;

    let client = InfluxClient::new(&settings_for(&server)).unwrap();
    let err = client.query("from(bucket: \"ruuvi\")").await.unwrap_err();

    match err {
        ProbeError::Query { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("unauthorized"));
        }
        other => panic!("expected Query error, got: {other}"),
    }
}

#[tokio::test]
async fn test_ping_passes_on_healthy_instance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"name":"influxdb","status":"pass"}"#),
        )
        .mount(&server)
        .await;

    let client = InfluxClient::new(&settings_for(&server)).unwrap();
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_ping_fails_on_failing_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"name":"influxdb","status":"fail"}"#),
        )
        .mount(&server)
        .await;

    let client = InfluxClient::new(&settings_for(&server)).unwrap();
    assert!(client.ping().await.is_err());
}

#[tokio::test]
async fn test_ping_fails_on_unreachable_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let client = InfluxClient::new(&settings_for(&server)).unwrap();
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ProbeError::Query { status: 503, .. }));
}
