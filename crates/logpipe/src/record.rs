// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, FixedOffset};

/// One log line with its terminator stripped. Owned by exactly one stage at a time.
pub type RawLine = Vec<u8>;

/// Structured result of parsing one access log line.
///
/// Only built from a line that fully matched the grammar; there are no partial records.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub bytes_sent: u64,
    pub path: String,
    pub method: String,
    pub scheme: String,
    pub status: String,
    /// `None` when nginx logged `-` (no upstream was contacted).
    pub upstream_time: Option<f64>,
    pub request_time: f64,
}
