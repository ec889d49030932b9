//! Plain-text results file shared with the downstream viewer.
//!
//! Layout: a header line and a `=` rule, then one block per finding closed by
//! a 50-dash delimiter. The viewer splits on that delimiter, so its length and
//! character are fixed.
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{Result, ScanError};
use crate::types::{ProbeOutcome, Protocol};

pub const RECORD_DELIMITER: &str = "--------------------------------------------------";
pub const HEADER_RULE: &str = "==================================================";

/// Local wall-clock time as `YYYY-MM-DD HH:MM:SS`, falling back to UTC when
/// the local offset cannot be determined.
pub fn now_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_| String::from("1970-01-01 00:00:00"))
}

fn delimiter_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{50,}").expect("dash pattern compiles"))
}

/// Make a free-text value safe for a single record line: no line breaks and
/// no dash run long enough to read as [`RECORD_DELIMITER`]. Such runs are
/// shortened to 49 dashes.
pub fn field_text(value: &str) -> String {
    let single_line = value.split_whitespace().collect::<Vec<_>>().join(" ");
    delimiter_run()
        .replace_all(&single_line, &RECORD_DELIMITER[1..])
        .into_owned()
}

/// Render one finding as a complete, delimiter-terminated block.
pub fn format_record(outcome: &ProbeOutcome) -> String {
    format!(
        "Found at {}\nIP: {}\nProtocol: {}\nTitle: {}\nServer: {}\nSize: {} bytes\n{}\n",
        outcome.timestamp,
        outcome.ip,
        outcome.protocol,
        field_text(&outcome.title),
        field_text(&outcome.server),
        outcome.content_length,
        RECORD_DELIMITER
    )
}

/// Append-only writer for accepted outcomes.
///
/// Not synchronised; callers serialise access (see [`crate::scanner`]).
#[derive(Debug)]
pub struct ResultSink {
    path: PathBuf,
    file: Option<File>,
}

impl ResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the file and write a header stamped with the current time.
    pub fn reset(&mut self) -> Result<()> {
        let mut file = File::create(&self.path).map_err(|e| self.persist_err(e))?;
        let header = format!("Started scanning at {}\n{}\n", now_timestamp(), HEADER_RULE);
        file.write_all(header.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| self.persist_err(e))?;
        log::info!("[results] reset: path={}", self.path.display());
        self.file = Some(file);
        Ok(())
    }

    /// Append one block with a single write.
    pub fn record(&mut self, outcome: &ProbeOutcome) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| self.persist_err(e))?;
            self.file = Some(file);
        }
        let block = format_record(outcome);
        let written = match self.file.as_mut() {
            Some(file) => file.write_all(block.as_bytes()).and_then(|_| file.flush()),
            None => Ok(()),
        };
        written.map_err(|e| self.persist_err(e))
    }

    fn persist_err(&self, source: std::io::Error) -> ScanError {
        ScanError::Persist { path: self.path.clone(), source }
    }
}

/// A finding as read back from the results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub found_at: Option<String>,
    pub ip: Ipv4Addr,
    pub protocol: Protocol,
    pub title: String,
    pub server: Option<String>,
    pub size: Option<u64>,
}

impl ResultRecord {
    /// Split `content` on the record delimiter and extract every block that
    /// names an IP and a protocol. Other blocks, the header included, are skipped.
    pub fn parse_all(content: &str) -> Vec<ResultRecord> {
        content.split(RECORD_DELIMITER).filter_map(Self::parse_block).collect()
    }

    fn parse_block(block: &str) -> Option<ResultRecord> {
        let field = |prefix: &str| {
            block
                .lines()
                .find_map(|line| line.strip_prefix(prefix))
                .map(str::trim)
        };

        let ip = field("IP:")?.parse::<Ipv4Addr>().ok()?;
        let protocol = match field("Protocol:")? {
            "HTTP" => Protocol::Http,
            "HTTPS" => Protocol::Https,
            _ => return None,
        };
        Some(ResultRecord {
            found_at: field("Found at").map(str::to_string),
            ip,
            protocol,
            title: field("Title:")
                .filter(|t| !t.is_empty())
                .unwrap_or("No Title")
                .to_string(),
            server: field("Server:").map(str::to_string),
            size: field("Size:")
                .and_then(|s| s.strip_suffix("bytes"))
                .and_then(|s| s.trim().parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProbeOutcome {
        ProbeOutcome {
            ip: Ipv4Addr::new(203, 0, 113, 9),
            protocol: Protocol::Https,
            status_code: 200,
            title: "Welcome".into(),
            server: "nginx".into(),
            content_type: "text/html".into(),
            content_length: 1234,
            timestamp: "2024-05-06 07:08:09".into(),
        }
    }

    #[test]
    fn delimiter_is_fifty_dashes() {
        assert_eq!(RECORD_DELIMITER.len(), 50);
        assert!(RECORD_DELIMITER.chars().all(|c| c == '-'));
        assert_eq!(HEADER_RULE.len(), 50);
    }

    #[test]
    fn record_block_layout() {
        let block = format_record(&sample());
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Found at 2024-05-06 07:08:09",
                "IP: 203.0.113.9",
                "Protocol: HTTPS",
                "Title: Welcome",
                "Server: nginx",
                "Size: 1234 bytes",
                RECORD_DELIMITER,
            ]
        );
    }

    #[test]
    fn long_dash_runs_are_shortened() {
        let dashes = "-".repeat(120);
        assert_eq!(field_text(&format!("a {dashes} b")), format!("a {} b", "-".repeat(49)));
        assert_eq!(field_text("--- ok ---"), "--- ok ---");
        assert_eq!(field_text("two\nlines"), "two lines");
    }

    #[test]
    fn timestamp_shape() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }

    #[test]
    fn parse_skips_header_and_junk() {
        let content = format!(
            "Started scanning at 2024-05-06 07:00:00\n{}\n{}garbage\n{}\n",
            HEADER_RULE,
            format_record(&sample()),
            RECORD_DELIMITER
        );
        let records = ResultRecord::parse_all(&content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, Some(1234));
        assert_eq!(records[0].server.as_deref(), Some("nginx"));
        assert_eq!(records[0].found_at.as_deref(), Some("2024-05-06 07:08:09"));
    }
}
