// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the tailer, parser and forwarder together and supervises them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::forwarder::Forwarder;
use crate::influx::RecordSink;
use crate::parser::{AccessLogParser, ParseStage};
use crate::tailer::Tailer;

/// Counters shared by all stages.
#[derive(Debug, Default)]
pub struct PipelineStats {
    lines_read: AtomicU64,
    records_parsed: AtomicU64,
    lines_skipped: AtomicU64,
    points_written: AtomicU64,
    points_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub records_parsed: u64,
    pub lines_skipped: u64,
    pub points_written: u64,
    pub points_dropped: u64,
}

impl PipelineStats {
    pub(crate) fn line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_parsed(&self) {
        self.records_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn line_skipped(&self) {
        self.lines_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn points_written(&self, count: u64) {
        self.points_written.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn points_dropped(&self, count: u64) {
        self.points_dropped.fetch_add(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            records_parsed: self.records_parsed.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    sink: Arc<dyn RecordSink>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: PipelineConfig, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            config,
            sink,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Builds every stage and spawns it. Any failure here happens before a
    /// task exists, so nothing needs cleaning up.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(self, cancel: CancellationToken) -> Result<PipelineHandle, PipelineError> {
        self.config.validate()?;
        let parser = AccessLogParser::new(self.config.parser)?;
        let tailer = Tailer::open(&self.config.path, &self.config.tailer).await?;

        let (line_tx, line_rx) = mpsc::channel(self.config.line_queue_capacity);
        let (record_tx, record_rx) = mpsc::channel(self.config.record_queue_capacity);

        let mut tasks = JoinSet::new();
        let mut stages = HashMap::new();
        let stats = Arc::clone(&self.stats);
        let tailer_cancel = cancel.clone();
        let tailer_task = tasks.spawn(
            async move {
                let result = tailer.run(line_tx, tailer_cancel, stats).await;
                (Stage::Tailer, result.map_err(PipelineError::from))
            }
            .instrument(info_span!("tailer")),
        );
        stages.insert(tailer_task.id(), Stage::Tailer);

        let stage = ParseStage::new(parser, line_rx, record_tx, Arc::clone(&self.stats));
        let parser_task = tasks.spawn(
            async move {
                stage.run().await;
                (Stage::Parser, Ok(()))
            }
            .instrument(info_span!("parser")),
        );
        stages.insert(parser_task.id(), Stage::Parser);

        let forwarder = Forwarder::new(
            self.sink,
            record_rx,
            self.config.forwarder.clone(),
            Arc::clone(&self.stats),
        );
        let forwarder_task = tasks.spawn(
            async move {
                let result = forwarder.run().await;
                (Stage::Forwarder, result.map_err(PipelineError::from))
            }
            .instrument(info_span!("forwarder")),
        );
        stages.insert(forwarder_task.id(), Stage::Forwarder);

        info!(path = %self.config.path.display(), "pipeline started");
        Ok(PipelineHandle {
            tasks,
            stages,
            cancel,
            stats: self.stats,
        })
    }

    /// Starts the pipeline and waits for it to stop.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        self.start(cancel).await?.wait().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Tailer,
    Parser,
    Forwarder,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Tailer => "tailer",
            Stage::Parser => "parser",
            Stage::Forwarder => "forwarder",
        }
    }
}

/// Running pipeline. Cancel its token to shut it down gracefully.
pub struct PipelineHandle {
    tasks: JoinSet<(Stage, Result<(), PipelineError>)>,
    // A panicked task only reports its id.
    stages: HashMap<task::Id, Stage>,
    cancel: CancellationToken,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for every stage to finish. The first stage failure cancels the
    /// rest, and is the error returned.
    pub async fn wait(mut self) -> Result<(), PipelineError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let (stage, result) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    let stage = self
                        .stages
                        .get(&e.id())
                        .map_or("pipeline", |stage| stage.name());
                    let error = PipelineError::Task {
                        stage,
                        reason: e.to_string(),
                    };
                    error!(error = %error, "pipeline task did not complete");
                    self.cancel.cancel();
                    first_error.get_or_insert(error);
                    continue;
                }
            };
            match result {
                Ok(()) => debug!(stage = stage.name(), "stage finished"),
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "stage failed, shutting down pipeline");
                    self.cancel.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            lines_read = stats.lines_read,
            records_parsed = stats.records_parsed,
            lines_skipped = stats.lines_skipped,
            points_written = stats.points_written,
            points_dropped = stats.points_dropped,
            "pipeline stopped"
        );
        first_error.map_or(Ok(()), Err)
    }
}
