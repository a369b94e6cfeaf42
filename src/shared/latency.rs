use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::models::server::UNREACHABLE_LATENCY_MS;

/// Upper bound for one probe; larger configured values are clamped.
pub const MAX_PROBE_TIMEOUT_MS: u64 = 2000;

/// TCP reachability probe against a server's VPN listening port.
///
/// The reading is a reachability signal rather than a round-trip time: it
/// only covers the TCP handshake. Timeouts and every connect error, refused
/// connections included, report [`UNREACHABLE_LATENCY_MS`].
#[derive(Debug, Clone, Copy)]
pub struct LatencyProbe {
    port: u16,
    timeout: Duration,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        Self::from_config(&ProbeConfig::default())
    }
}

impl LatencyProbe {
    #[must_use]
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    #[must_use]
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(
            config.port,
            Duration::from_millis(config.timeout_ms.clamp(1, MAX_PROBE_TIMEOUT_MS)),
        )
    }

    /// Milliseconds to open a connection to `ip`, or the 999 sentinel.
    pub async fn measure(&self, ip: &str) -> u32 {
        let started = tokio::time::Instant::now();
        let address = format_address(ip, self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => round_millis(started.elapsed()).min(self.timeout_millis()),
            Ok(Err(e)) => {
                debug!( address = ?address, error = ?e.to_string(), "latency_probe_failed");
                UNREACHABLE_LATENCY_MS
            }
            Err(_) => {
                debug!( address = ?address, "latency_probe_timed_out");
                UNREACHABLE_LATENCY_MS
            }
        }
    }

    /// Probe every ip concurrently; results keep the input order.
    pub async fn measure_all(&self, ips: &[String]) -> Vec<u32> {
        if ips.is_empty() {
            return Vec::new();
        }

        let mut results = vec![UNREACHABLE_LATENCY_MS; ips.len()];
        let mut set = JoinSet::new();
        for (idx, ip) in ips.iter().enumerate() {
            let ip = ip.clone();
            let probe = *self;
            set.spawn(async move { (idx, probe.measure(&ip).await) });
        }

        while let Some(joined) = set.join_next().await {
            if let Ok((idx, latency)) = joined {
                results[idx] = latency;
            }
        }

        results
    }

    fn timeout_millis(&self) -> u32 {
        u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

fn format_address(ip: &str, port: u16) -> String {
    if ip.contains(':') && !ip.starts_with('[') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

fn round_millis(elapsed: Duration) -> u32 {
    let millis = (elapsed.as_micros() + 500) / 1000;
    u32::try_from(millis).unwrap_or(u32::MAX)
}
