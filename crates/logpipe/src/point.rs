// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! InfluxDB line protocol points.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::constants::{
    FIELD_BYTES_SENT, FIELD_REQUEST_TIME, FIELD_UPSTREAM_TIME, MEASUREMENT, TAG_METHOD, TAG_PATH,
    TAG_SCHEME, TAG_STATUS,
};
use crate::errors::{ConfigError, PointError};
use crate::record::LogRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

/// Timestamp precision of a write, as understood by the `precision` query parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl Precision {
    #[must_use]
    pub fn as_query(&self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "u",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
            Precision::Minutes => "m",
            Precision::Hours => "h",
        }
    }

    fn convert_nanos(&self, nanos: i64) -> i64 {
        let divisor = match self {
            Precision::Nanoseconds => 1,
            Precision::Microseconds => 1_000,
            Precision::Milliseconds => 1_000_000,
            Precision::Seconds => 1_000_000_000,
            Precision::Minutes => 60 * 1_000_000_000,
            Precision::Hours => 3_600 * 1_000_000_000,
        };
        nanos.div_euclid(divisor)
    }
}

impl FromStr for Precision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "n" | "ns" => Ok(Precision::Nanoseconds),
            "u" | "us" => Ok(Precision::Microseconds),
            "ms" => Ok(Precision::Milliseconds),
            "s" => Ok(Precision::Seconds),
            "m" => Ok(Precision::Minutes),
            "h" => Ok(Precision::Hours),
            other => Err(ConfigError::Dsn(format!("unknown precision '{other}'"))),
        }
    }
}

/// A validated point. Construction rejects anything the line protocol cannot carry,
/// so encoding never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp_nanos: i64,
}

impl Point {
    pub fn new(
        measurement: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, PointError> {
        let measurement = measurement.into();
        if measurement.is_empty() {
            return Err(PointError::EmptyMeasurement);
        }
        if fields.is_empty() {
            return Err(PointError::NoFields);
        }
        if let Some((key, _)) = fields
            .iter()
            .find(|(_, value)| matches!(value, FieldValue::Float(f) if !f.is_finite()))
        {
            return Err(PointError::NonFinite(key.clone()));
        }
        let timestamp_nanos = timestamp
            .timestamp_nanos_opt()
            .ok_or_else(|| PointError::TimestampRange(timestamp.to_rfc3339()))?;

        // The line protocol has no representation for an empty tag value.
        let tags = tags
            .into_iter()
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .collect();

        Ok(Self {
            measurement,
            tags,
            fields,
            timestamp_nanos,
        })
    }

    /// Maps a parsed access log record onto the `nginx_log` schema.
    pub fn from_record(record: &LogRecord, timestamp: DateTime<Utc>) -> Result<Self, PointError> {
        let tags = BTreeMap::from([
            (TAG_PATH.to_string(), record.path.clone()),
            (TAG_METHOD.to_string(), record.method.clone()),
            (TAG_SCHEME.to_string(), record.scheme.clone()),
            (TAG_STATUS.to_string(), record.status.clone()),
        ]);

        let bytes_sent =
            i64::try_from(record.bytes_sent).map_err(|_| PointError::IntegerOverflow {
                field: FIELD_BYTES_SENT.to_string(),
                value: record.bytes_sent,
            })?;
        let mut fields = BTreeMap::from([
            (
                FIELD_REQUEST_TIME.to_string(),
                FieldValue::Float(record.request_time),
            ),
            (FIELD_BYTES_SENT.to_string(), FieldValue::Integer(bytes_sent)),
        ]);
        if let Some(upstream_time) = record.upstream_time {
            fields.insert(
                FIELD_UPSTREAM_TIME.to_string(),
                FieldValue::Float(upstream_time),
            );
        }

        Self::new(MEASUREMENT, tags, fields, timestamp)
    }

    #[must_use]
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }

    #[must_use]
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    /// Encodes the point as one line, without the trailing newline.
    #[must_use]
    pub fn to_line(&self, precision: Precision) -> String {
        let mut line = String::with_capacity(128);
        escape_into(&mut line, &self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }
        line.push(' ');
        for (index, (key, value)) in self.fields.iter().enumerate() {
            if index > 0 {
                line.push(',');
            }
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            // Writing into a String cannot fail.
            let _ = match value {
                FieldValue::Float(f) => write!(line, "{f}"),
                FieldValue::Integer(i) => write!(line, "{i}i"),
            };
        }
        let _ = write!(line, " {}", precision.convert_nanos(self.timestamp_nanos));
        line
    }
}

fn escape_into(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}
