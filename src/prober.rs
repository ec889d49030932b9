//! Protocol-level probing of a single address.
//!
//! A probe walks the enabled protocols in configuration order and fetches the
//! root path once per protocol. The first attempt that answers `200` with an
//! HTML content type wins; everything else is a [`ProbeMiss`] and the next
//! protocol is tried. No retries.
use std::net::Ipv4Addr;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, SERVER};
use reqwest::{redirect, Client};
use thiserror::Error;

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::types::{ProbeOutcome, Protocol};

pub const NO_TITLE: &str = "No title found";
pub const UNKNOWN_SERVER: &str = "Unknown";
const USER_AGENT: &str = concat!("web-sweep/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// Anything that probes one address and reports what it found.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `None` when no enabled protocol yielded an HTML page.
    async fn probe(&self, ip: Ipv4Addr, config: &ScanConfig) -> Option<ProbeOutcome>;
}

/// Why a single protocol attempt did not produce an outcome.
#[derive(Debug, Error)]
pub enum ProbeMiss {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("status {0}")]
    Status(u16),
    #[error("not html: {0:?}")]
    NotHtml(String),
    #[error("body read failed: {0}")]
    Body(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl ProbeMiss {
    /// Misses a random address is expected to produce. Only these are
    /// silent; the rest point at a local problem.
    pub fn is_expected(&self) -> bool {
        !matches!(self, ProbeMiss::Unexpected(_))
    }
}

impl From<reqwest::Error> for ProbeMiss {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeMiss::Timeout
        } else if e.is_builder() {
            ProbeMiss::Unexpected(e.to_string())
        } else if e.is_connect() {
            ProbeMiss::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            ProbeMiss::Body(e.to_string())
        } else {
            ProbeMiss::Transport(e.to_string())
        }
    }
}

/// Probes over reqwest, one client per protocol.
///
/// Clients keep no idle connections, so every attempt opens its own session
/// and closes it when the response is dropped. Proxy settings from the
/// environment are ignored.
#[derive(Debug, Clone)]
pub struct HttpProber {
    http: Client,
    https: Client,
    http_port: u16,
    https_port: u16,
}

impl HttpProber {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let tls = if config.accept_invalid_certs {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| ScanError::Client(e.to_string()))?;
            Some(connector)
        } else {
            None
        };
        Ok(Self {
            http: build_client(config.timeout, None)?,
            https: build_client(config.timeout, tls)?,
            http_port: Protocol::Http.default_port(),
            https_port: Protocol::Https.default_port(),
        })
    }

    /// Connect to these ports instead of 80/443.
    pub fn with_ports(mut self, http_port: u16, https_port: u16) -> Self {
        self.http_port = http_port;
        self.https_port = https_port;
        self
    }

    fn port(&self, protocol: Protocol) -> u16 {
        match protocol {
            Protocol::Http => self.http_port,
            Protocol::Https => self.https_port,
        }
    }

    fn client(&self, protocol: Protocol) -> &Client {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::Https => &self.https,
        }
    }

    async fn attempt(
        &self,
        ip: Ipv4Addr,
        protocol: Protocol,
    ) -> std::result::Result<ProbeOutcome, ProbeMiss> {
        let url = format!("{}://{}:{}/", protocol.scheme(), ip, self.port(protocol));
        let response = self.client(protocol).get(&url).send().await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ProbeMiss::Status(status));
        }

        let headers = response.headers();
        let content_type = header_str(headers, CONTENT_TYPE).unwrap_or_default();
        if !is_html(&content_type) {
            return Err(ProbeMiss::NotHtml(content_type));
        }
        let server = header_str(headers, SERVER).unwrap_or_else(|| UNKNOWN_SERVER.to_string());

        let body = response.bytes().await?;
        let title = extract_title(&String::from_utf8_lossy(&body))
            .unwrap_or_else(|| NO_TITLE.to_string());

        Ok(ProbeOutcome {
            ip,
            protocol,
            status_code: status,
            title,
            server,
            content_type,
            content_length: body.len() as u64,
            timestamp: crate::results::now_timestamp(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, ip: Ipv4Addr, config: &ScanConfig) -> Option<ProbeOutcome> {
        for &protocol in &config.protocols {
            match self.attempt(ip, protocol).await {
                Ok(outcome) => {
                    log::debug!(
                        "[prober] accepted: ip={} protocol={} server={:?} size={}",
                        ip,
                        protocol,
                        outcome.server,
                        outcome.content_length
                    );
                    return Some(outcome);
                }
                Err(miss) if miss.is_expected() => {
                    log::trace!("[prober] miss: ip={} protocol={} reason={}", ip, protocol, miss);
                }
                Err(miss) => {
                    log::warn!("[prober] unexpected_miss: ip={} protocol={} reason={}", ip, protocol, miss);
                }
            }
        }
        None
    }
}

fn build_client(timeout: Duration, tls: Option<native_tls::TlsConnector>) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .no_proxy()
        .pool_max_idle_per_host(0)
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent(USER_AGENT);
    if let Some(connector) = tls {
        builder = builder.use_preconfigured_tls(connector);
    }
    builder.build().map_err(|e| ScanError::Client(e.to_string()))
}

fn header_str(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Whether a Content-Type header value denotes an HTML document.
pub fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title>(.*?)</title>").expect("title pattern compiles"))
}

/// First `<title>` of `body`, whitespace collapsed to single spaces.
/// `None` when there is no title element or it is blank.
pub fn extract_title(body: &str) -> Option<String> {
    let raw = title_regex().captures(body)?.get(1)?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
