//! CSV rendering of the results history.

use crate::speedtest::SpeedtestResult;

pub const EXPORT_FILE_NAME: &str = "speedtest_history.csv";

const HEADER: [&str; 9] = [
    "Timestamp",
    "Ping (ms)",
    "Jitter (ms)",
    "Download (Mbps)",
    "Upload (Mbps)",
    "Server",
    "ISP",
    "IP",
    "Result URL",
];

/// Quote a field when it holds a delimiter, quote or line break.
fn field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn server_label(r: &SpeedtestResult) -> String {
    match (&r.server_name, &r.server_location) {
        (Some(name), Some(location)) => format!("{name} ({location})"),
        (Some(name), None) => name.clone(),
        (None, Some(location)) => location.clone(),
        (None, None) => String::new(),
    }
}

/// Header plus one CRLF-terminated row per result, in the given order.
pub fn results_csv(results: &[SpeedtestResult]) -> String {
    let mut out = HEADER.join(",");
    out.push_str("\r\n");
    for r in results {
        let row = [
            crate::storage::format_ts(r.timestamp),
            r.ping.to_string(),
            r.jitter.to_string(),
            r.download.to_string(),
            r.upload.to_string(),
            server_label(r),
            r.isp.clone().unwrap_or_default(),
            r.client_ip.clone().unwrap_or_default(),
            r.result_url.clone().unwrap_or_default(),
        ];
        let line = row.iter().map(|f| field(f)).collect::<Vec<_>>().join(",");
        out.push_str(&line);
        out.push_str("\r\n");
    }
    out
}
