// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the writer's collaborators

#![allow(dead_code)]

use bytes::Bytes;
use datadog_trace_writer::encoder::{EncodeError, EncodedTrace, Encoder};
use datadog_trace_writer::metrics::MetricsClient;
use datadog_trace_writer::Span;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub struct MetricCall {
    pub name: String,
    pub value: f64,
    pub tags: Vec<String>,
}

/// Records every metric it receives.
#[derive(Default)]
pub struct MockMetricsClient {
    pub calls: Mutex<Vec<MetricCall>>,
}

impl MockMetricsClient {
    pub fn calls(&self) -> Vec<MetricCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Value of the single call matching `name` and `tags`.
    pub fn value(&self, name: &str, tags: &[&str]) -> Option<f64> {
        self.calls()
            .into_iter()
            .find(|c| c.name == name && c.tags.iter().map(String::as_str).eq(tags.iter().copied()))
            .map(|c| c.value)
    }

    pub fn names(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.name).collect()
    }
}

impl MetricsClient for MockMetricsClient {
    fn increment(&self, name: &str, tags: &[String]) {
        self.distribution(name, 1.0, tags);
    }

    fn distribution(&self, name: &str, value: f64, tags: &[String]) {
        self.calls.lock().unwrap().push(MetricCall {
            name: name.to_string(),
            value,
            tags: tags.to_vec(),
        });
    }
}

/// Encoder that refuses every trace
pub struct FailingEncoder;

impl Encoder for FailingEncoder {
    fn encode_trace(&self, trace: &[Span]) -> Result<EncodedTrace, EncodeError> {
        Err(EncodeError::MixedTraceIds {
            span_id: trace.first().map_or(0, |s| s.span_id),
            expected: 0,
            found: 1,
        })
    }

    fn join_encoded(
        &self,
        _traces: Vec<EncodedTrace>,
        _keep_rate: f64,
    ) -> Result<Bytes, EncodeError> {
        Ok(Bytes::new())
    }

    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }
}
