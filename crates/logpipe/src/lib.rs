// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming pipeline that ships an nginx access log to InfluxDB.
//!
//! # Architecture
//!
//! ```text
//!   access.log (append-only)
//!       │
//!       v
//!   ┌─────────────┐
//!   │   Tailer    │ (poll from end of file)
//!   └──────┬──────┘
//!          │ RawLine (mpsc, bounded)
//!          v
//!   ┌─────────────┐
//!   │   Parser    │ (fixed grammar, skip malformed)
//!   └──────┬──────┘
//!          │ LogRecord (mpsc, bounded)
//!          v
//!   ┌─────────────┐
//!   │  Forwarder  │ (batch, retry)
//!   └──────┬──────┘
//!          │ line protocol over HTTP
//!          v
//!   ┌─────────────┐
//!   │  InfluxDB   │
//!   └─────────────┘
//! ```
//!
//! Each stage runs as its own task under [`pipeline::Pipeline`]. The queues are
//! bounded, so a slow sink pauses tailing rather than buffering without limit.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod constants;
pub mod errors;
pub mod forwarder;
pub mod influx;
pub mod parser;
pub mod pipeline;
pub mod point;
pub mod record;
pub mod tailer;
