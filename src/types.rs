use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application protocol a probe is made over.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata captured from one accepted probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ip: Ipv4Addr,
    pub protocol: Protocol,
    pub status_code: u16,
    pub title: String,
    pub server: String,
    pub content_type: String,
    pub content_length: u64,
    /// Local time of acceptance, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
}

/// Lifecycle of a [`crate::scanner::ScanCoordinator`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Point-in-time view of the shared counters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub checked: u64,
    pub found: u64,
    pub elapsed_secs: f64,
    /// Findings per second, refreshed every 10 checks.
    pub rate: f64,
    /// Addresses checked per second, refreshed every 10 checks.
    pub checks_per_sec: f64,
}

/// Final report of a finished scan.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanSummary {
    pub state: ScanState,
    pub stats: StatsSnapshot,
    pub results_path: PathBuf,
}
