// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Finished span data as consumed by the writers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metric key carrying the historical keep rate on the first span of a trace.
pub const KEEP_SPANS_RATE_KEY: &str = "_dd.tracer_kr";

/// A finished span. Identity is `(trace_id, span_id)`.
///
/// Writers treat spans as immutable once handed over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: u64,
    pub span_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub span_type: Option<String>,
    /// Start time, nanoseconds since the Unix epoch.
    #[serde(default)]
    pub start: i64,
    /// Duration in nanoseconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub error: i32,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl Span {
    /// Creates a span whose resource defaults to its name.
    pub fn new(trace_id: u64, span_id: u64, name: impl Into<String>) -> Self {
        let name = name.into();
        Span {
            trace_id,
            span_id,
            resource: name.clone(),
            name,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: Option<u64>) -> Self {
        self.parent_id = parent_id;
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    #[must_use]
    pub fn with_timing(mut self, start: i64, duration: i64) -> Self {
        self.start = start;
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}
