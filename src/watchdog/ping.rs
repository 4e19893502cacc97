//! System `ping` invocation and output parsing.

/// Echo requests per cycle.
const COUNT: &str = "3";
/// Per-echo timeout in seconds.
const WAIT_SECS: &str = "2";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingReport {
    /// Average round-trip time in ms.
    pub latency: Option<f64>,
    pub packet_loss: f64,
    pub online: bool,
}

impl PingReport {
    pub fn offline() -> Self {
        Self {
            latency: None,
            packet_loss: 100.0,
            online: false,
        }
    }
}

pub fn ping_argv(ping_path: &str, target: &str) -> Vec<String> {
    [ping_path, "-c", COUNT, "-W", WAIT_SECS, target]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Without a summary RTT line the target counts as unreachable, whatever
/// loss figure was printed. A missing loss figure is recorded as total loss.
pub fn parse_ping_output(output: &str) -> PingReport {
    match extract_avg_rtt(output) {
        Some(avg) => PingReport {
            latency: Some(avg),
            packet_loss: extract_loss(output).unwrap_or(100.0),
            online: true,
        },
        None => PingReport::offline(),
    }
}

// "3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms"
fn extract_loss(output: &str) -> Option<f64> {
    let pos = output.find("% packet loss")?;
    let head = &output[..pos];
    let start = head
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|i| i + 1)
        .unwrap_or(0);
    head[start..].parse::<f64>().ok()
}

// Linux: "rtt min/avg/max/mdev = 14.188/15.002/16.331/0.880 ms"
// BSD:   "round-trip min/avg/max/stddev = 14.188/15.002/16.331/0.880 ms"
fn extract_avg_rtt(output: &str) -> Option<f64> {
    output
        .lines()
        .filter(|l| l.contains("rtt ") || l.contains("round-trip"))
        .find_map(|line| {
            let (_, values) = line.split_once(" = ")?;
            values.split('/').nth(1)?.trim().parse::<f64>().ok()
        })
}
