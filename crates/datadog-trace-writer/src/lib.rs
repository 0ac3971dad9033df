// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Trace Writer
//!
//! Process-local exporter for finished traces. Producers hand traces to a
//! [`writer::TraceWriter`]; the [`writer::AgentWriter`] encodes them eagerly,
//! holds them in a size-bounded [`buffer::TraceBuffer`] and ships them to the
//! Datadog Agent from a single background task, over TCP or a Unix domain
//! socket.
//!
//! The writer never blocks producers on I/O. Traces that do not fit are
//! dropped and counted, the historical keep rate is stamped onto every
//! outgoing trace, and health metrics are reported through an injected
//! [`metrics::MetricsClient`].
//!
//! [`log_writer::LogWriter`] implements the same producer interface and simply
//! prints every trace as a JSON line.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod encoder;
pub mod error;
pub mod http_utils;
pub mod keep_rate;
pub mod log_writer;
pub mod metrics;
pub mod span;
pub mod statsd;
pub mod transport;
pub mod util;
pub mod writer;

pub use config::{AgentUrl, HttpStatusPolicy, WriterConfig};
pub use encoder::{Encoder, MsgpackEncoder};
pub use error::WriterError;
pub use log_writer::LogWriter;
pub use metrics::MetricsClient;
pub use span::Span;
pub use statsd::DogStatsdClient;
pub use transport::{HttpTransport, Transport};
pub use writer::{AgentWriter, TraceWriter, WriterState};
