// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Health metrics the writer reports about itself.
//!
//! Every flush cycle folds its counters into a [`WriterMetrics`]
//! accumulator. The [`MetricsReporter`] emits the accumulator as
//! distributions through an injected [`MetricsClient`] once per reporting
//! interval, and always on the final cycle, then starts over.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::buffer::{CycleStats, DropReason};

pub const BUFFER_ACCEPTED_TRACES: &str = "buffer.accepted.traces";
pub const BUFFER_ACCEPTED_SPANS: &str = "buffer.accepted.spans";
pub const BUFFER_DROPPED_TRACES: &str = "buffer.dropped.traces";
pub const BUFFER_DROPPED_BYTES: &str = "buffer.dropped.bytes";
pub const ENCODER_DROPPED_TRACES: &str = "encoder.dropped.traces";
pub const ENCODER_DROPPED_PAYLOAD_TRACES: &str = "encoder.dropped.payload.traces";
pub const HTTP_REQUESTS: &str = "http.requests";
pub const HTTP_ERRORS: &str = "http.errors";
pub const HTTP_DROPPED_BYTES: &str = "http.dropped.bytes";
pub const HTTP_DROPPED_TRACES: &str = "http.dropped.traces";
pub const HTTP_SENT_BYTES: &str = "http.sent.bytes";
pub const HTTP_SENT_TRACES: &str = "http.sent.traces";

/// Sink for the writer's health metrics, typically a DogStatsD client.
pub trait MetricsClient: Send + Sync {
    fn increment(&self, name: &str, tags: &[String]);

    fn distribution(&self, name: &str, value: f64, tags: &[String]);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: &'static str,
    pub tags: Vec<String>,
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            f.write_str(self.name)
        } else {
            write!(f, "{}{{{}}}", self.name, self.tags.join(","))
        }
    }
}

/// Counters accumulated since the last report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterMetrics {
    values: BTreeMap<MetricKey, u64>,
}

impl WriterMetrics {
    /// Adds `value` to the counter. Zero values are not recorded.
    pub fn add(&mut self, name: &'static str, value: u64, tags: Vec<String>) {
        if value == 0 {
            return;
        }
        *self.values.entry(MetricKey { name, tags }).or_default() += value;
    }

    /// Value for an exact `(name, tags)` pair.
    pub fn get(&self, name: &str, tags: &[&str]) -> u64 {
        self.values
            .iter()
            .find(|(key, _)| key.name == name && key.tags.iter().map(String::as_str).eq(tags.iter().copied()))
            .map_or(0, |(_, value)| *value)
    }

    /// Sum over every tag set recorded under `name`.
    pub fn total(&self, name: &str) -> u64 {
        self.values
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, value)| *value)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, u64)> {
        self.values.iter().map(|(key, value)| (key, *value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Folds the buffer outcomes of one cycle.
    pub fn record_buffer(&mut self, stats: &CycleStats) {
        self.add(BUFFER_ACCEPTED_TRACES, stats.accepted_traces, Vec::new());
        self.add(BUFFER_ACCEPTED_SPANS, stats.accepted_spans, Vec::new());
        for reason in [DropReason::TraceTooBig, DropReason::Full] {
            let dropped = stats.dropped(reason);
            let tags = vec![format!("reason:{reason}")];
            self.add(BUFFER_DROPPED_TRACES, dropped.traces, tags.clone());
            self.add(BUFFER_DROPPED_BYTES, dropped.bytes, tags);
        }
        self.add(ENCODER_DROPPED_TRACES, stats.encoder_failures, Vec::new());
    }

    pub fn record_sent(&mut self, bytes: usize, traces: usize) {
        self.add(HTTP_REQUESTS, 1, Vec::new());
        self.add(HTTP_SENT_BYTES, bytes as u64, Vec::new());
        self.add(HTTP_SENT_TRACES, traces as u64, Vec::new());
    }

    /// A request that failed, either at the network level or by status.
    pub fn record_http_error(&mut self, kind: &str, bytes: usize, traces: usize) {
        self.add(HTTP_REQUESTS, 1, Vec::new());
        self.add(HTTP_ERRORS, 1, vec![format!("type:{kind}")]);
        self.add(HTTP_DROPPED_BYTES, bytes as u64, Vec::new());
        self.add(HTTP_DROPPED_TRACES, traces as u64, Vec::new());
    }
}

pub struct MetricsReporter {
    client: Option<Arc<dyn MetricsClient>>,
    namespace: String,
    interval: Duration,
    next_report: Instant,
    metrics: WriterMetrics,
}

impl fmt::Debug for MetricsReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsReporter")
            .field("enabled", &self.client.is_some())
            .field("namespace", &self.namespace)
            .field("interval", &self.interval)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl MetricsReporter {
    /// A reporter without a client only accumulates and resets.
    pub fn new(
        client: Option<Arc<dyn MetricsClient>>,
        namespace: impl Into<String>,
        interval: Duration,
    ) -> Self {
        MetricsReporter {
            client,
            namespace: namespace.into(),
            interval,
            next_report: Instant::now() + interval,
            metrics: WriterMetrics::default(),
        }
    }

    /// Anchors the reporting schedule at `now`, next to the flush ticker.
    pub fn reschedule(&mut self) {
        self.next_report = Instant::now() + self.interval;
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub fn metrics(&self) -> &WriterMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut WriterMetrics {
        &mut self.metrics
    }

    /// Ends a cycle: reports when due (always when `final_cycle`), and
    /// resets the accumulator whenever it was reported or reporting is off.
    /// Returns whether anything was emitted.
    pub fn end_cycle(&mut self, final_cycle: bool) -> bool {
        let Some(client) = self.client.as_ref() else {
            self.metrics.reset();
            return false;
        };
        let now = Instant::now();
        if !final_cycle && now < self.next_report {
            return false;
        }

        let mut emitted = false;
        for (key, value) in self.metrics.iter() {
            client.distribution(
                &format!("{}.{}", self.namespace, key.name),
                value as f64,
                &key.tags,
            );
            emitted = true;
        }
        if emitted {
            debug!("reported writer health metrics");
        }
        self.metrics.reset();
        // Deadlines follow the fixed schedule; missed ones are not replayed.
        self.next_report += self.interval;
        if self.next_report <= now {
            self.next_report = now + self.interval;
        }
        emitted
    }
}
