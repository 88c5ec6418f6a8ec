// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-grammar parser for nginx access log lines.
//!
//! The expected `log_format` produces lines such as
//!
//! ```text
//! [07/Jul/2022:18:01:41 +0000] http "GET /foo?query=t HTTP/1.0" 200 2133 "-" "KeepAliveClient" "-" 1.005 1.854
//! ```
//!
//! Every way a line can fail to parse is a [`ParseError`]; the [`ParseStage`]
//! logs it, counts it and moves on to the next line.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDateTime};
use percent_encoding::percent_decode_str;
use regex::Regex;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, warn};

use crate::constants::LOG_TIMEZONE_OFFSET_SECS;
use crate::errors::{Creation, ParseError};
use crate::pipeline::PipelineStats;
use crate::record::{LogRecord, RawLine};

// Unanchored: text before the timestamp or after the request time is ignored.
const ACCESS_LOG_PATTERN: &str = r#"\[([^\]]+)\]\s+(.*?)\s+"(.*?)"\s+(\d{3})\s+(\d+)\s+"([^"]*)"\s+"(.*?)"\s+"([\d.-]+)"\s+([\d.-]+)\s+([\d.-]+)"#;
const GROUP_COUNT: usize = 10;
const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S";

// Capture group indexes.
const TIMESTAMP: usize = 1;
const REQUEST: usize = 3;
const STATUS: usize = 4;
const BYTES_SENT: usize = 5;
const UPSTREAM_TIME: usize = 9;
const REQUEST_TIME: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Fill the `Scheme` tag with the bytes-sent text instead of the request
    /// protocol. Older dashboards were built against that mapping.
    pub legacy_scheme_tag: bool,
}

#[derive(Debug, Clone)]
pub struct AccessLogParser {
    pattern: Regex,
    zone: FixedOffset,
    options: ParserOptions,
}

impl AccessLogParser {
    pub fn new(options: ParserOptions) -> Result<Self, Creation> {
        let pattern = Regex::new(ACCESS_LOG_PATTERN)?;
        // captures_len counts the implicit whole-match group.
        let found = pattern.captures_len() - 1;
        if found != GROUP_COUNT {
            return Err(Creation::GroupCount {
                expected: GROUP_COUNT,
                found,
            });
        }
        let zone = FixedOffset::east_opt(LOG_TIMEZONE_OFFSET_SECS)
            .ok_or(Creation::Setting("log timezone offset"))?;
        Ok(Self {
            pattern,
            zone,
            options,
        })
    }

    /// Decodes one line. Has no side effects, so the same input always yields
    /// the same result.
    pub fn parse_line(&self, line: &[u8]) -> Result<LogRecord, ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::Encoding)?;
        let captures = self.pattern.captures(line).ok_or(ParseError::NoMatch)?;

        let mut groups: [&str; GROUP_COUNT + 1] = [""; GROUP_COUNT + 1];
        let mut found = 0;
        for (index, group) in captures.iter().enumerate().skip(1) {
            if let Some(group) = group {
                groups[index] = group.as_str();
                found += 1;
            }
        }
        if found != GROUP_COUNT {
            return Err(ParseError::GroupCount {
                expected: GROUP_COUNT,
                found,
            });
        }

        let timestamp = self.parse_timestamp(groups[TIMESTAMP])?;
        let bytes_text = groups[BYTES_SENT];
        let bytes_sent = bytes_text
            .parse::<u64>()
            .map_err(|_| ParseError::BytesSent(bytes_text.to_string()))?;

        let request = groups[REQUEST];
        let tokens: Vec<&str> = request.split(' ').collect();
        let [method, target, protocol] = tokens.as_slice() else {
            return Err(ParseError::RequestLine {
                request: request.to_string(),
                tokens: tokens.len(),
            });
        };
        let path = parse_path(target)?;

        let upstream_text = groups[UPSTREAM_TIME];
        let upstream_time = if upstream_text == "-" {
            None
        } else {
            Some(
                parse_seconds(upstream_text)
                    .ok_or_else(|| ParseError::UpstreamTime(upstream_text.to_string()))?,
            )
        };
        let request_text = groups[REQUEST_TIME];
        let request_time = parse_seconds(request_text)
            .ok_or_else(|| ParseError::RequestTime(request_text.to_string()))?;

        let scheme = if self.options.legacy_scheme_tag {
            bytes_text
        } else {
            *protocol
        };

        Ok(LogRecord {
            timestamp,
            bytes_sent,
            path,
            method: (*method).to_string(),
            scheme: scheme.to_string(),
            status: groups[STATUS].to_string(),
            upstream_time,
            request_time,
        })
    }

    /// The zone written in the line is checked for shape only. Values are
    /// always read in the log's configured zone.
    fn parse_timestamp(&self, text: &str) -> Result<chrono::DateTime<FixedOffset>, ParseError> {
        let invalid = || ParseError::Timestamp(text.to_string());
        let (date_time, zone) = text.split_once(' ').ok_or_else(invalid)?;
        if !is_zone_offset(zone) {
            return Err(invalid());
        }
        let naive = NaiveDateTime::parse_from_str(date_time, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
        naive.and_local_timezone(self.zone).single().ok_or_else(invalid)
    }
}

/// Path component of a request target, percent-decoded and otherwise kept as
/// written: dot segments stay, and a relative target stays relative.
fn parse_path(target: &str) -> Result<String, ParseError> {
    let invalid = |reason: &str| ParseError::Url {
        target: target.to_string(),
        reason: reason.to_string(),
    };
    if target.bytes().any(|byte| byte.is_ascii_control()) {
        return Err(invalid("invalid control character"));
    }

    let rest = target.split_once('#').map_or(target, |(head, _)| head);
    let rest = rest.split_once('?').map_or(rest, |(head, _)| head);
    let path = match split_scheme(rest).map_err(invalid)? {
        // Opaque form such as `mailto:x` has no path.
        Some(after) if !after.starts_with('/') => "",
        Some(after) => strip_authority(after),
        None => {
            let first_segment = rest.split('/').next().unwrap_or_default();
            if first_segment.contains(':') {
                return Err(invalid("first path segment cannot contain a colon"));
            }
            if rest.starts_with("///") {
                rest
            } else {
                strip_authority(rest)
            }
        }
    };

    if !has_valid_escapes(path) {
        return Err(invalid("invalid percent escape"));
    }
    Ok(percent_decode_str(path).decode_utf8_lossy().into_owned())
}

/// Returns what follows `scheme:`, or `None` when the target has no scheme.
fn split_scheme(target: &str) -> Result<Option<&str>, &'static str> {
    for (index, byte) in target.bytes().enumerate() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' => {}
            b'0'..=b'9' | b'+' | b'-' | b'.' if index > 0 => {}
            b':' if index == 0 => return Err("missing protocol scheme"),
            b':' => return Ok(Some(&target[index + 1..])),
            _ => return Ok(None),
        }
    }
    Ok(None)
}

fn strip_authority(rest: &str) -> &str {
    match rest.strip_prefix("//") {
        Some(authority_and_path) => authority_and_path
            .find('/')
            .map_or("", |slash| &authority_and_path[slash..]),
        None => rest,
    }
}

fn has_valid_escapes(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.iter().enumerate().all(|(index, byte)| {
        *byte != b'%'
            || matches!(
                (bytes.get(index + 1), bytes.get(index + 2)),
                (Some(high), Some(low)) if high.is_ascii_hexdigit() && low.is_ascii_hexdigit()
            )
    })
}

fn is_zone_offset(zone: &str) -> bool {
    let bytes = zone.as_bytes();
    bytes.len() == 5
        && matches!(bytes[0], b'+' | b'-')
        && bytes[1..].iter().all(u8::is_ascii_digit)
}

fn parse_seconds(text: &str) -> Option<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

/// Second pipeline stage: turns raw lines into records, in order.
pub struct ParseStage {
    parser: AccessLogParser,
    rx: Receiver<RawLine>,
    tx: Sender<LogRecord>,
    stats: Arc<PipelineStats>,
}

impl ParseStage {
    #[must_use]
    pub fn new(
        parser: AccessLogParser,
        rx: Receiver<RawLine>,
        tx: Sender<LogRecord>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            parser,
            rx,
            tx,
            stats,
        }
    }

    /// Runs until the line queue closes, or until the record queue's receiver
    /// is gone.
    pub async fn run(mut self) {
        while let Some(line) = self.rx.recv().await {
            match self.parser.parse_line(&line) {
                Ok(record) => {
                    self.stats.record_parsed();
                    if self.tx.send(record).await.is_err() {
                        debug!("record queue closed, stopping parser");
                        return;
                    }
                }
                Err(e) => {
                    self.stats.line_skipped();
                    warn!(
                        error = %e,
                        line = %String::from_utf8_lossy(&line),
                        "skipping malformed access log line"
                    );
                }
            }
        }
        debug!("line queue closed, parser finished");
    }
}
