// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Follows a single append-only file from its end, one line at a time.
//!
//! The file is opened once. Rotation and truncation are not detected, and the
//! read offset is not persisted: a new [`Tailer`] always starts at the current
//! end of the file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc::Sender;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_MAX_LINE_BYTES, DEFAULT_POLL_INTERVAL_MS};
use crate::errors::TailError;
use crate::pipeline::PipelineStats;
use crate::record::RawLine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailerConfig {
    /// How long to wait at end of file before looking for new bytes.
    pub poll_interval: Duration,
    pub max_line_bytes: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Returns true when cancelled before the sleep finished.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = sleep(duration) => false,
    }
}

pub struct Tailer {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    // Bytes of a line whose terminator has not been written yet.
    pending: Vec<u8>,
    discarding: bool,
    config: TailerConfig,
}

impl Tailer {
    /// Opens `path` and positions the reader at its current end.
    pub async fn open(path: impl AsRef<Path>, config: &TailerConfig) -> Result<Self, TailError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await.map_err(|source| TailError::Open {
            path: path.clone(),
            source,
        })?;
        let offset = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(|source| TailError::Open {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), offset, "opened access log at end of file");

        Ok(Self {
            path,
            reader: BufReader::new(file),
            offset,
            pending: Vec::new(),
            discarding: false,
            config: config.clone(),
        })
    }

    /// Byte offset just past the last byte consumed from the file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Waits for the next complete line, without its `\n` or `\r\n`.
    ///
    /// Returns `Ok(None)` once `cancel` fires. A partial trailing line is kept
    /// across polls and only returned when its terminator arrives.
    pub async fn next_line(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<RawLine>, TailError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let (consumed, complete) = {
                let available = self.reader.fill_buf().await.map_err(|source| TailError::Read {
                    path: self.path.clone(),
                    source,
                })?;
                if available.is_empty() {
                    (0, false)
                } else {
                    match available.iter().position(|byte| *byte == b'\n') {
                        Some(newline) => {
                            if !self.discarding {
                                self.pending.extend_from_slice(&available[..newline]);
                            }
                            (newline + 1, true)
                        }
                        None => {
                            if !self.discarding {
                                self.pending.extend_from_slice(available);
                            }
                            (available.len(), false)
                        }
                    }
                }
            };

            if consumed == 0 {
                if sleep_or_cancel(self.config.poll_interval, cancel).await {
                    return Ok(None);
                }
                continue;
            }
            self.reader.consume(consumed);
            self.offset += consumed as u64;

            if self.pending.len() > self.config.max_line_bytes {
                warn!(
                    path = %self.path.display(),
                    max_line_bytes = self.config.max_line_bytes,
                    "discarding access log line longer than the limit"
                );
                self.pending = Vec::new();
                self.discarding = true;
            }

            if complete {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let mut line = std::mem::take(&mut self.pending);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
        }
    }

    /// First pipeline stage. Sends every new line downstream until cancelled
    /// or until the line queue's receiver is gone.
    pub async fn run(
        mut self,
        tx: Sender<RawLine>,
        cancel: CancellationToken,
        stats: Arc<PipelineStats>,
    ) -> Result<(), TailError> {
        info!(path = %self.path.display(), offset = self.offset, "tailing access log");
        while let Some(line) = self.next_line(&cancel).await? {
            stats.line_read();
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = tx.send(line) => {
                    if sent.is_err() {
                        debug!("line queue closed, stopping tailer");
                        break;
                    }
                }
            }
        }
        debug!(offset = self.offset, "tailer stopped");
        Ok(())
    }
}
