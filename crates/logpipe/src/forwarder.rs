// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Final pipeline stage: turns records into points and writes them to the sink.
//!
//! Points are written in batches of up to `batch_size`. A partial batch goes
//! out after `flush_interval`, and again when the record queue closes. Sink
//! errors are handled by kind:
//!
//! - transient (transport, 5xx, 408, 429): retried per [`RetryStrategy`]
//! - rejected data (400, 422): the batch is dropped and the stage continues
//! - anything else, or running out of retries: the stage fails

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::Receiver;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_BACKOFF_MS,
};
use crate::errors::ForwardError;
use crate::influx::RecordSink;
use crate::pipeline::PipelineStats;
use crate::point::Point;
use crate::record::LogRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Retry right away, up to this many attempts in total.
    Immediate(u64),
    /// Up to `attempts` in total, sleeping `delay_ms` between them.
    LinearBackoff(u64, u64),
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::LinearBackoff(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS)
    }
}

impl RetryStrategy {
    fn max_attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    fn delay(&self) -> Option<Duration> {
        match self {
            RetryStrategy::Immediate(_) => None,
            RetryStrategy::LinearBackoff(_, delay_ms) => Some(Duration::from_millis(*delay_ms)),
        }
    }
}

/// Which time a point is stamped with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PointTimestamp {
    /// The moment the point is built for writing.
    #[default]
    WriteTime,
    /// The time the request was logged.
    LogTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_strategy: RetryStrategy,
    pub point_timestamp: PointTimestamp,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            retry_strategy: RetryStrategy::default(),
            point_timestamp: PointTimestamp::default(),
        }
    }
}

pub struct Forwarder {
    sink: Arc<dyn RecordSink>,
    rx: Receiver<LogRecord>,
    config: ForwarderConfig,
    stats: Arc<PipelineStats>,
    batch: Vec<Point>,
}

impl Forwarder {
    #[must_use]
    pub fn new(
        sink: Arc<dyn RecordSink>,
        rx: Receiver<LogRecord>,
        config: ForwarderConfig,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let batch = Vec::with_capacity(config.batch_size);
        Self {
            sink,
            rx,
            config,
            stats,
            batch,
        }
    }

    /// Runs until the record queue closes and the last batch is written, or
    /// until a write fails for good.
    pub async fn run(mut self) -> Result<(), ForwardError> {
        let mut ticker = interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(record) => {
                        self.push(&record);
                        if self.batch.len() >= self.config.batch_size {
                            self.flush().await?;
                            ticker.reset();
                        }
                    }
                    None => {
                        self.flush().await?;
                        debug!("record queue closed, forwarder finished");
                        return Ok(());
                    }
                },
                _ = ticker.tick(), if !self.batch.is_empty() => {
                    self.flush().await?;
                }
            }
        }
    }

    fn push(&mut self, record: &LogRecord) {
        let timestamp = match self.config.point_timestamp {
            PointTimestamp::WriteTime => Utc::now(),
            PointTimestamp::LogTime => record.timestamp.with_timezone(&Utc),
        };
        match Point::from_record(record, timestamp) {
            Ok(point) => self.batch.push(point),
            Err(e) => {
                self.stats.points_dropped(1);
                error!(error = %e, path = %record.path, "dropping record that cannot be written");
            }
        }
    }

    async fn flush(&mut self) -> Result<(), ForwardError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.config.batch_size));
        let count = batch.len() as u64;

        match write_with_retry(self.sink.as_ref(), &batch, self.config.retry_strategy).await {
            Ok(()) => {
                self.stats.points_written(count);
                info!(points = count, "write success");
                Ok(())
            }
            Err(ForwardError::Sink { source, attempts }) if source.is_rejected() => {
                self.stats.points_dropped(count);
                error!(
                    error = %source,
                    attempts,
                    points = count,
                    "sink rejected batch, dropping it"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Writes `points`, retrying transient failures per `strategy`.
pub async fn write_with_retry(
    sink: &dyn RecordSink,
    points: &[Point],
    strategy: RetryStrategy,
) -> Result<(), ForwardError> {
    let max_attempts = strategy.max_attempts();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match sink.write(points).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempts < max_attempts => {
                warn!(
                    error = %e,
                    attempt = attempts,
                    max_attempts,
                    "sink write failed, retrying"
                );
                if let Some(delay) = strategy.delay() {
                    sleep(delay).await;
                }
            }
            Err(source) => return Err(ForwardError::Sink { attempts, source }),
        }
    }
}
