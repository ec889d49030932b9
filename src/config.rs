use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ScanError};
use crate::types::Protocol;

pub const DEFAULT_WORKERS: usize = 10_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RESULTS_FILE: &str = "found_websites.txt";

/// Immutable scan settings handed to the engine once setup is done.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Probed in this order; never empty.
    pub protocols: Vec<Protocol>,
    /// Lowercased title keywords, match-any. Empty means no title constraint.
    pub title_keywords: Vec<String>,
    /// Lowercased server banner substring.
    pub server_contains: Option<String>,
    /// Inclusive lower bound on body size in bytes.
    pub min_size: Option<u64>,
    /// Inclusive upper bound on body size in bytes.
    pub max_size: Option<u64>,
    pub workers: usize,
    /// Deadline for one protocol attempt: connect, TLS handshake and body.
    pub timeout: Duration,
    /// Cycles per worker before it retires. `None` scans until cancelled.
    pub cycle_limit: Option<u64>,
    /// Skip certificate and hostname validation on the probe's HTTPS client.
    /// Only affects that client.
    pub accept_invalid_certs: bool,
    pub results_path: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            protocols: vec![Protocol::Http, Protocol::Https],
            title_keywords: Vec::new(),
            server_contains: None,
            min_size: None,
            max_size: None,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
            cycle_limit: None,
            accept_invalid_certs: true,
            results_path: PathBuf::from(DEFAULT_RESULTS_FILE),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.protocols.is_empty() {
            return Err(ScanError::Config("at least one protocol must be enabled".into()));
        }
        if self.workers == 0 {
            return Err(ScanError::Config("worker count must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(ScanError::Config("probe timeout must be non-zero".into()));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(ScanError::Config(format!(
                    "minimum size {min} exceeds maximum size {max}"
                )));
            }
        }
        Ok(())
    }

    /// One-line description of the active filters, for the startup banner.
    pub fn describe_filters(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "protocols: {}",
            self.protocols
                .iter()
                .map(Protocol::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )];
        if !self.title_keywords.is_empty() {
            lines.push(format!("looking for titles with: {}", self.title_keywords.join(" ")));
        }
        if let Some(server) = &self.server_contains {
            lines.push(format!("looking for servers running: {server}"));
        }
        if self.min_size.is_some() || self.max_size.is_some() {
            let show = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "any".into());
            lines.push(format!(
                "size range: {} - {} bytes",
                show(self.min_size),
                show(self.max_size)
            ));
        }
        lines
    }
}

/// Parse a comma separated protocol list such as `http,https`.
///
/// Case-insensitive; duplicates are dropped and first-seen order is kept.
pub fn parse_protocols_str(s: &str) -> Result<Vec<Protocol>> {
    let mut out = Vec::new();
    for raw in s.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        let proto = match token.to_ascii_lowercase().as_str() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            other => return Err(ScanError::Config(format!("unknown protocol: {other}"))),
        };
        if !out.contains(&proto) {
            out.push(proto);
        }
    }
    if out.is_empty() {
        return Err(ScanError::Config("empty protocol list".into()));
    }
    Ok(out)
}

/// Split a title filter into lowercase keywords. Blank input yields no keywords.
pub fn parse_keywords(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_lowercase).collect()
}

/// Normalise a server filter; blank input means no constraint.
pub fn normalize_server(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_lowercase())
    }
}
