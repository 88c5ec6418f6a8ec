// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{DEFAULT_LOG_PATH, DEFAULT_QUEUE_CAPACITY, DEFAULT_SINK_TIMEOUT_MS};
use crate::errors::ConfigError;
use crate::forwarder::{ForwarderConfig, PointTimestamp, RetryStrategy};
use crate::parser::ParserOptions;
use crate::tailer::TailerConfig;

/// Everything the pipeline needs apart from the sink itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Access log to follow
    pub path: PathBuf,
    pub tailer: TailerConfig,
    pub parser: ParserOptions,
    pub forwarder: ForwarderConfig,
    /// Capacity of the queue between tailer and parser
    pub line_queue_capacity: usize,
    /// Capacity of the queue between parser and forwarder
    pub record_queue_capacity: usize,
    /// Upper bound on a single sink request
    pub sink_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOG_PATH),
            tailer: TailerConfig::default(),
            parser: ParserOptions::default(),
            forwarder: ForwarderConfig::default(),
            line_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            record_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_timeout: Duration::from_millis(DEFAULT_SINK_TIMEOUT_MS),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create configuration from `LOGPIPE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`PipelineConfig::from_env`], reading variables through `lookup`.
    /// Unset variables keep their defaults; set but unparseable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("LOGPIPE_PATH") {
            config.path = PathBuf::from(path);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LOGPIPE_POLL_INTERVAL_MS")? {
            config.tailer.poll_interval = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_var(&lookup, "LOGPIPE_MAX_LINE_BYTES")? {
            config.tailer.max_line_bytes = bytes;
        }
        if let Some(capacity) = parse_var(&lookup, "LOGPIPE_LINE_QUEUE_CAPACITY")? {
            config.line_queue_capacity = capacity;
        }
        if let Some(capacity) = parse_var(&lookup, "LOGPIPE_RECORD_QUEUE_CAPACITY")? {
            config.record_queue_capacity = capacity;
        }
        if let Some(size) = parse_var(&lookup, "LOGPIPE_BATCH_SIZE")? {
            config.forwarder.batch_size = size;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LOGPIPE_FLUSH_INTERVAL_MS")? {
            config.forwarder.flush_interval = Duration::from_millis(ms);
        }

        let attempts = parse_var::<u64>(&lookup, "LOGPIPE_RETRY_ATTEMPTS")?;
        let backoff_ms = parse_var::<u64>(&lookup, "LOGPIPE_RETRY_BACKOFF_MS")?;
        if attempts.is_some() || backoff_ms.is_some() {
            let (default_attempts, default_backoff) = match RetryStrategy::default() {
                RetryStrategy::Immediate(n) => (n, 0),
                RetryStrategy::LinearBackoff(n, ms) => (n, ms),
            };
            let attempts = attempts.unwrap_or(default_attempts);
            config.forwarder.retry_strategy = match backoff_ms.unwrap_or(default_backoff) {
                0 => RetryStrategy::Immediate(attempts),
                ms => RetryStrategy::LinearBackoff(attempts, ms),
            };
        }

        if let Some(value) = lookup("LOGPIPE_POINT_TIMESTAMP") {
            config.forwarder.point_timestamp = match value.trim().to_lowercase().as_str() {
                "write" => PointTimestamp::WriteTime,
                "log" => PointTimestamp::LogTime,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LOGPIPE_POINT_TIMESTAMP".to_string(),
                        value,
                        reason: "expected 'write' or 'log'".to_string(),
                    })
                }
            };
        }
        if let Some(legacy) = parse_var(&lookup, "LOGPIPE_LEGACY_SCHEME_TAG")? {
            config.parser.legacy_scheme_tag = legacy;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LOGPIPE_SINK_TIMEOUT_MS")? {
            config.sink_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("log path cannot be empty".to_string()));
        }
        if self.tailer.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than 0".to_string(),
            ));
        }
        if self.tailer.max_line_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max line bytes must be greater than 0".to_string(),
            ));
        }
        // tokio's bounded channels reject a zero capacity.
        if self.line_queue_capacity == 0 || self.record_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacities must be greater than 0".to_string(),
            ));
        }
        if self.forwarder.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch size must be greater than 0".to_string(),
            ));
        }
        if self.forwarder.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush interval must be greater than 0".to_string(),
            ));
        }
        if let RetryStrategy::Immediate(0) | RetryStrategy::LinearBackoff(0, _) =
            self.forwarder.retry_strategy
        {
            return Err(ConfigError::Invalid(
                "retry attempts must be greater than 0".to_string(),
            ));
        }
        if self.sink_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "sink timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.path, PathBuf::from("./access.log"));
        assert_eq!(config.tailer.poll_interval, Duration::from_millis(100));
        assert_eq!(config.forwarder.batch_size, 1);
        assert_eq!(
            config.forwarder.retry_strategy,
            RetryStrategy::LinearBackoff(3, 500)
        );
        assert_eq!(config.forwarder.point_timestamp, PointTimestamp::WriteTime);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(from_vars(&[]).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_every_variable() {
        let config = from_vars(&[
            ("LOGPIPE_PATH", "/var/log/nginx/access.log"),
            ("LOGPIPE_POLL_INTERVAL_MS", "250"),
            ("LOGPIPE_MAX_LINE_BYTES", "4096"),
            ("LOGPIPE_LINE_QUEUE_CAPACITY", "8"),
            ("LOGPIPE_RECORD_QUEUE_CAPACITY", "32"),
            ("LOGPIPE_BATCH_SIZE", "100"),
            ("LOGPIPE_FLUSH_INTERVAL_MS", "2000"),
            ("LOGPIPE_RETRY_ATTEMPTS", "5"),
            ("LOGPIPE_RETRY_BACKOFF_MS", "50"),
            ("LOGPIPE_POINT_TIMESTAMP", "log"),
            ("LOGPIPE_LEGACY_SCHEME_TAG", "true"),
            ("LOGPIPE_SINK_TIMEOUT_MS", "1000"),
        ])
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/var/log/nginx/access.log"));
        assert_eq!(config.tailer.poll_interval, Duration::from_millis(250));
        assert_eq!(config.tailer.max_line_bytes, 4096);
        assert_eq!(config.line_queue_capacity, 8);
        assert_eq!(config.record_queue_capacity, 32);
        assert_eq!(config.forwarder.batch_size, 100);
        assert_eq!(config.forwarder.flush_interval, Duration::from_secs(2));
        assert_eq!(
            config.forwarder.retry_strategy,
            RetryStrategy::LinearBackoff(5, 50)
        );
        assert_eq!(config.forwarder.point_timestamp, PointTimestamp::LogTime);
        assert!(config.parser.legacy_scheme_tag);
        assert_eq!(config.sink_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_backoff_means_immediate_retry() {
        let config = from_vars(&[("LOGPIPE_RETRY_BACKOFF_MS", "0")]).unwrap();
        assert_eq!(config.forwarder.retry_strategy, RetryStrategy::Immediate(3));
    }

    #[test]
    fn test_unparseable_values_are_errors() {
        for (key, value) in [
            ("LOGPIPE_BATCH_SIZE", "lots"),
            ("LOGPIPE_POLL_INTERVAL_MS", "-1"),
            ("LOGPIPE_LEGACY_SCHEME_TAG", "yes please"),
            ("LOGPIPE_POINT_TIMESTAMP", "server"),
        ] {
            match from_vars(&[(key, value)]) {
                Err(ConfigError::InvalidValue { key: reported, .. }) => assert_eq!(reported, key),
                other => panic!("{key}={value} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        for vars in [
            [("LOGPIPE_BATCH_SIZE", "0")],
            [("LOGPIPE_LINE_QUEUE_CAPACITY", "0")],
            [("LOGPIPE_RECORD_QUEUE_CAPACITY", "0")],
            [("LOGPIPE_POLL_INTERVAL_MS", "0")],
            [("LOGPIPE_RETRY_ATTEMPTS", "0")],
            [("LOGPIPE_SINK_TIMEOUT_MS", "0")],
        ] {
            assert!(
                matches!(from_vars(&vars), Err(ConfigError::Invalid(_))),
                "{vars:?} should be rejected"
            );
        }
    }
}
