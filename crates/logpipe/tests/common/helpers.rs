// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use logpipe::config::PipelineConfig;
use logpipe::forwarder::RetryStrategy;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// An access log line in the format the parser expects.
pub fn access_line(method: &str, target: &str, status: u16, bytes_sent: u64) -> String {
    format!(
        r#"[07/Jul/2022:18:01:41 +0000] http "{method} {target} HTTP/1.0" {status} {bytes_sent} "-" "KeepAliveClient" "-" 1.005 1.854"#
    )
}

/// Appends raw bytes to `path`, the way nginx writes to its log.
pub fn append_bytes(path: &Path, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .expect("failed to open log for appending");
    file.write_all(bytes).expect("failed to append to log");
    file.flush().expect("failed to flush log");
}

/// Appends each line followed by a newline.
pub fn append_lines(path: &Path, lines: &[String]) {
    let mut content = String::new();
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    append_bytes(path, content.as_bytes());
}

/// Polls `condition` until it holds, panicking after `limit`.
pub async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Pipeline configuration with short polling and no retry delays.
pub fn fast_config(path: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(path);
    config.tailer.poll_interval = Duration::from_millis(5);
    config.forwarder.retry_strategy = RetryStrategy::Immediate(1);
    config.sink_timeout = Duration::from_secs(2);
    config
}
