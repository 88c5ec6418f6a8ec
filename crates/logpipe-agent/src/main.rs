// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod logger;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logpipe::config::PipelineConfig;
use logpipe::constants::{DEFAULT_INFLUX_DSN, DEFAULT_LOG_PATH};
use logpipe::errors::{ConfigError, PipelineError, SinkError};
use logpipe::influx::{InfluxDsn, InfluxSink};
use logpipe::pipeline::Pipeline;

const DEFAULT_RUN_FOR_SECS: u64 = 330;

/// Tail an nginx access log and write every request to InfluxDB.
#[derive(Debug, Parser)]
#[command(name = "logpipe-agent", version, about)]
struct Cli {
    /// Access log to follow
    #[arg(long, env = "LOGPIPE_PATH", default_value = DEFAULT_LOG_PATH)]
    path: PathBuf,

    /// InfluxDB destination as address@username@password@database@precision
    #[arg(
        long = "influx-dsn",
        alias = "influxDsn",
        env = "LOGPIPE_INFLUX_DSN",
        hide_env_values = true,
        default_value = DEFAULT_INFLUX_DSN
    )]
    influx_dsn: String,

    /// Stop after this many seconds; 0 runs until interrupted
    #[arg(long, env = "LOGPIPE_RUN_FOR_SECS", default_value_t = DEFAULT_RUN_FOR_SECS)]
    run_for_secs: u64,
}

#[derive(Debug, thiserror::Error)]
enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to reach InfluxDB: {0}")]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = env::var("LOGPIPE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    if let Err(e) = init_logging(&log_level) {
        eprintln!("LOGPIPE | ERROR | unable to initialise logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "logpipe-agent stopped on a fatal error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter)?)
        .event_format(logger::Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    let mut config = PipelineConfig::from_env()?;
    config.path = cli.path;
    config.validate()?;

    let dsn: InfluxDsn = cli.influx_dsn.parse()?;
    info!(dsn = ?dsn, path = %config.path.display(), "starting logpipe-agent");
    let sink = InfluxSink::connect(dsn, config.sink_timeout).await?;
    info!(database = %sink.dsn().database, "connected to InfluxDB");

    let cancel = CancellationToken::new();
    let handle = Pipeline::new(config, Arc::new(sink))
        .start(cancel.clone())
        .await?;

    let run_for = (cli.run_for_secs > 0).then(|| Duration::from_secs(cli.run_for_secs));
    tokio::spawn(shutdown_on_signal(run_for, cancel));

    handle.wait().await?;
    Ok(())
}

/// Cancels the pipeline when the run duration elapses or the process is
/// interrupted, whichever comes first.
async fn shutdown_on_signal(run_for: Option<Duration>, cancel: CancellationToken) {
    let deadline = async {
        match run_for {
            Some(duration) => sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        () = cancel.cancelled() => return,
        () = deadline => info!("run duration elapsed, shutting down"),
        Ok(()) = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["logpipe-agent"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("./access.log"));
        assert_eq!(cli.influx_dsn, DEFAULT_INFLUX_DSN);
        assert_eq!(cli.run_for_secs, 330);
    }

    #[test]
    fn test_cli_accepts_legacy_dsn_flag() {
        let cli = Cli::try_parse_from([
            "logpipe-agent",
            "--path",
            "/var/log/nginx/access.log",
            "--influxDsn",
            "http://influx:8086@u@p@db@ms",
            "--run-for-secs",
            "0",
        ])
        .unwrap();
        assert_eq!(cli.path, PathBuf::from("/var/log/nginx/access.log"));
        assert_eq!(cli.influx_dsn, "http://influx:8086@u@p@db@ms");
        assert_eq!(cli.run_for_secs, 0);
    }

    #[tokio::test]
    async fn test_shutdown_after_run_duration() {
        let cancel = CancellationToken::new();
        tokio::time::timeout(
            Duration::from_secs(2),
            shutdown_on_signal(Some(Duration::from_millis(10)), cancel.clone()),
        )
        .await
        .unwrap();
        assert!(cancel.is_cancelled());
    }
}
