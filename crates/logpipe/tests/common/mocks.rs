// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock sinks for testing the pipeline without a database

use async_trait::async_trait;
use logpipe::errors::SinkError;
use logpipe::influx::RecordSink;
use logpipe::point::Point;
use std::sync::Mutex;
use tokio::sync::watch;

/// Sink that keeps every point it is given, in order
#[derive(Default)]
pub struct RecordingSink {
    points: Mutex<Vec<Point>>,
}

impl RecordingSink {
    pub fn points(&self) -> Vec<Point> {
        self.points.lock().expect("lock poisoned").clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.points()
            .iter()
            .filter_map(|point| point.tag("Path").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        self.points
            .lock()
            .expect("lock poisoned")
            .extend_from_slice(points);
        Ok(())
    }
}

/// Sink whose writes block until the gate is opened
pub struct GatedSink {
    gate: watch::Sender<bool>,
    inner: RecordingSink,
}

impl GatedSink {
    pub fn closed() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate,
            inner: RecordingSink::default(),
        }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.paths()
    }
}

#[async_trait]
impl RecordSink for GatedSink {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| SinkError::Client(e.to_string()))?;
        self.inner.write(points).await
    }
}
