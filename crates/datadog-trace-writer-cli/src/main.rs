// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Reads traces as newline-delimited JSON from stdin, one `[span, ...]` array
//! per line, and hands them to a trace writer.
//!
//! `datadog-trace-writer [agent|log]`: `agent` (the default) ships traces to
//! the Datadog Agent configured through the `DD_*` environment, `log` prints
//! them to stdout as JSON lines.

use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use datadog_trace_writer::{
    metrics::MetricsClient,
    statsd::{DogStatsdClient, DEFAULT_DOGSTATSD_PORT},
    AgentWriter, LogWriter, Span, TraceWriter, WriterConfig,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let mode = env::args().nth(1).unwrap_or_else(|| "agent".to_string());
    let writer: Box<dyn TraceWriter> = match mode.as_str() {
        "log" => Box::new(LogWriter::new(std::io::stdout())),
        "agent" => match agent_writer() {
            Ok(writer) => Box::new(writer),
            Err(e) => {
                error!("Error creating trace writer: {e}");
                return;
            }
        },
        other => {
            error!("Unknown writer '{other}', expected 'agent' or 'log'");
            return;
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut written = 0u64;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let trace: Vec<Span> = match serde_json::from_str(&line) {
            Ok(trace) => trace,
            Err(e) => {
                warn!("Skipping malformed trace: {e}");
                continue;
            }
        };
        if let Err(e) = writer.write(&trace) {
            error!("Failed to write trace: {e}");
            continue;
        }
        written += 1;
    }

    writer.stop();
    if let Err(e) = writer.join().await {
        error!("Trace writer failed to shut down cleanly: {e}");
    }
    info!("Handed {written} traces to the {mode} writer");
}

fn agent_writer() -> Result<AgentWriter, datadog_trace_writer::WriterError> {
    let config = WriterConfig::from_env()?;

    let mut builder = AgentWriter::builder(config.clone());
    if config.health_metrics_enabled {
        let host = env::var("DD_DOGSTATSD_HOST")
            .or_else(|_| env::var("DD_AGENT_HOST"))
            .unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("DD_DOGSTATSD_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_DOGSTATSD_PORT);
        match DogStatsdClient::new((host.as_str(), port)) {
            Ok(client) => {
                builder = builder.metrics_client(Arc::new(client) as Arc<dyn MetricsClient>);
            }
            Err(e) => warn!("Health metrics disabled, failed to reach DogStatsD at {host}:{port}: {e}"),
        }
    }

    let writer = builder.build();
    writer.start()?;
    info!("Sending traces to {}", writer.agent_url());
    Ok(writer)
}
