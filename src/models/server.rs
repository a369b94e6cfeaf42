use serde::Deserialize;
use std::fmt;

/// Sentinel latency for servers whose probe timed out or failed.
pub const UNREACHABLE_LATENCY_MS: u32 = 999;

/// Server entry from GET /api/servers
#[derive(Debug, Clone, Deserialize)]
pub struct ServerRecord {
    pub id: i64,
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub location: String,
}

/// API response wrapper for GET /api/servers
#[derive(Debug, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<ServerRecord>,
}

/// Exit server as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub ip: String,
    /// "City, CC"
    pub location: String,
    /// `None` until the latency probe for this entry resolves.
    pub latency_ms: Option<u32>,
}

impl From<ServerRecord> for Server {
    fn from(record: ServerRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            ip: record.ip,
            location: record.location,
            latency_ms: None,
        }
    }
}

impl Server {
    /// Placeholder for a tunnel the backend reports but the catalog does not list.
    #[must_use]
    pub fn unlisted(backend_name: &str) -> Self {
        Self {
            id: -1,
            name: backend_name.to_string(),
            ip: String::new(),
            location: String::new(),
            latency_ms: None,
        }
    }

    #[must_use]
    pub fn is_unlisted(&self) -> bool {
        self.id < 0
    }

    /// Upper-cased second ", "-separated segment of the location, or "".
    #[must_use]
    pub fn country_code(&self) -> String {
        country_code(&self.location)
    }

    /// Identifier the backend uses to find the server's tunnel profile.
    #[must_use]
    pub fn backend_name(&self) -> String {
        normalize_server_name(&self.name)
    }

    #[must_use]
    pub fn is_reachable(&self) -> bool {
        matches!(self.latency_ms, Some(ms) if ms != UNREACHABLE_LATENCY_MS)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let latency = match self.latency_ms {
            Some(ms) => format!("{} ms", ms),
            None => "N/A".to_string(),
        };
        write!(
            f,
            "{:>4}  {:<20} {:<16} {:<22} {}",
            self.id, self.name, self.ip, self.location, latency
        )
    }
}

#[must_use]
pub fn country_code(location: &str) -> String {
    location
        .split(", ")
        .nth(1)
        .map(str::to_uppercase)
        .unwrap_or_default()
}

/// Replace every run of whitespace with a single `-`.
#[must_use]
pub fn normalize_server_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}
