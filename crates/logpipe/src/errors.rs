// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for every stage of the pipeline.
//!
//! Per-item errors ([`ParseError`], [`PointError`]) are logged and the item is dropped.
//! The rest stop the stage that raised them, and the pipeline shuts down.

use std::path::PathBuf;

/// Why a single access log line was skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("line is not valid UTF-8")]
    Encoding,
    #[error("line does not match the access log grammar")]
    NoMatch,
    #[error("expected {expected} capture groups, found {found}")]
    GroupCount { expected: usize, found: usize },
    #[error("invalid timestamp '{0}'")]
    Timestamp(String),
    #[error("invalid bytes sent '{0}'")]
    BytesSent(String),
    #[error("request line '{request}' has {tokens} tokens, expected 3")]
    RequestLine { request: String, tokens: usize },
    #[error("invalid request target '{target}': {reason}")]
    Url { target: String, reason: String },
    #[error("invalid upstream time '{0}'")]
    UpstreamTime(String),
    #[error("invalid request time '{0}'")]
    RequestTime(String),
}

/// Failure to build the access log parser.
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error("invalid access log pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("access log pattern has {found} capture groups, expected {expected}")]
    GroupCount { expected: usize, found: usize },
    #[error("invalid parser setting: {0}")]
    Setting(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A record that cannot be represented as a line protocol point.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointError {
    #[error("measurement name is empty")]
    EmptyMeasurement,
    #[error("point has no fields")]
    NoFields,
    #[error("field '{0}' is not a finite number")]
    NonFinite(String),
    #[error("field '{field}' value {value} does not fit a signed 64-bit integer")]
    IntegerOverflow { field: String, value: u64 },
    #[error("timestamp {0} cannot be represented in nanoseconds")]
    TimestampRange(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("invalid sink URL: {0}")]
    Url(String),
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("sink responded {status}: {body}")]
    Status { status: u16, body: String },
}

impl SinkError {
    /// Errors worth retrying: the request may succeed unchanged later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Transport { .. } => true,
            SinkError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            SinkError::Client(_) | SinkError::Url(_) => false,
        }
    }

    /// The sink understood the request and refused the data itself.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, SinkError::Status { status: 400 | 422, .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("sink write failed after {attempts} attempt(s): {source}")]
    Sink {
        attempts: u64,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid sink DSN: {0}")]
    Dsn(String),
}

/// Error returned by the pipeline supervisor: the first fatal error of any stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Parser(#[from] Creation),
    #[error(transparent)]
    Tail(#[from] TailError),
    #[error(transparent)]
    Forward(#[from] ForwardError),
    #[error("{stage} task failed: {reason}")]
    Task { stage: &'static str, reason: String },
}
