//! Decoding of the Ookla `speedtest --format=json` report.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{SpeedTestError, SpeedtestResult};

/// Discriminator value of a finished measurement. Progress and log lines
/// carry other values.
const RESULT_TYPE: &str = "result";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Report {
    #[serde(rename = "type")]
    kind: Option<String>,
    ping: Ping,
    download: Transfer,
    upload: Transfer,
    isp: Option<String>,
    interface: Interface,
    server: Server,
    result: ResultLink,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Ping {
    latency: f64,
    jitter: f64,
    low: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Transfer {
    /// Bytes per second.
    bandwidth: f64,
    latency: Latency,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Latency {
    low: Option<f64>,
    high: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Interface {
    external_ip: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Server {
    id: Option<i64>,
    name: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResultLink {
    url: Option<String>,
}

/// Bytes per second to megabits per second, rounded to two decimals.
pub fn to_mbps(bytes_per_sec: f64) -> f64 {
    (bytes_per_sec * 8.0 / 1_000_000.0 * 100.0).round() / 100.0
}

/// Turn raw CLI stdout into a result row stamped with `timestamp`.
pub fn parse_result(raw: &str, timestamp: DateTime<Utc>) -> Result<SpeedtestResult, SpeedTestError> {
    let report: Report = serde_json::from_str(raw.trim())?;
    if report.kind.as_deref() != Some(RESULT_TYPE) {
        return Err(SpeedTestError::Format {
            kind: report.kind,
            raw: raw.to_string(),
        });
    }

    Ok(SpeedtestResult {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp,
        ping: report.ping.latency,
        jitter: report.ping.jitter,
        download: to_mbps(report.download.bandwidth),
        upload: to_mbps(report.upload.bandwidth),
        server_id: report.server.id,
        server_name: report.server.name,
        server_location: report.server.location,
        result_url: report.result.url,
        isp: report.isp,
        client_ip: report.interface.external_ip,
        ping_low: report.ping.low,
        download_latency_low: report.download.latency.low,
        download_latency_high: report.download.latency.high,
        upload_latency_low: report.upload.latency.low,
        upload_latency_high: report.upload.latency.high,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ookla_json;

    #[test]
    fn test_bandwidth_conversion() {
        assert_eq!(to_mbps(12_500_000.0), 100.0);
        assert_eq!(to_mbps(0.0), 0.0);
        // 1_234_567 B/s = 9.876536 Mbit/s
        assert_eq!(to_mbps(1_234_567.0), 9.88);
    }

    #[test]
    fn test_parse_complete_report() {
        let r = parse_result(&ookla_json(12_500_000, 2_500_000, 5), Utc::now()).unwrap();
        assert_eq!(r.download, 100.0);
        assert_eq!(r.upload, 20.0);
        assert_eq!(r.ping, 12.25);
        assert_eq!(r.jitter, 0.5);
        assert_eq!(r.server_id, Some(5));
        assert_eq!(r.server_location.as_deref(), Some("Warsaw"));
        assert_eq!(r.client_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(r.download_latency_high, Some(40.0));
        assert_eq!(r.upload_latency_low, Some(25.0));
        assert_eq!(r.result_url.as_deref(), Some("https://www.speedtest.net/result/c/abc"));
        assert!(uuid::Uuid::parse_str(&r.id).is_ok());
    }

    #[test]
    fn test_non_result_type_is_format_error() {
        let raw = r#"{"type":"log","level":"error","message":"Configuration - No servers defined"}"#;
        match parse_result(raw, Utc::now()).unwrap_err() {
            SpeedTestError::Format { kind, raw: kept } => {
                assert_eq!(kind.as_deref(), Some("log"));
                assert!(kept.contains("No servers defined"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_type_is_format_error() {
        assert!(matches!(
            parse_result("{}", Utc::now()),
            Err(SpeedTestError::Format { kind: None, .. })
        ));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(matches!(
            parse_result("Speedtest by Ookla\n", Utc::now()),
            Err(SpeedTestError::Decode(_))
        ));
    }

    #[test]
    fn test_ids_are_unique() {
        let raw = ookla_json(1, 1, 1);
        let a = parse_result(&raw, Utc::now()).unwrap();
        let b = parse_result(&raw, Utc::now()).unwrap();
        assert_ne!(a.id, b.id);
    }
}
