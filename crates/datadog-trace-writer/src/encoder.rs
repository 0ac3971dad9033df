// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace encoding for the agent intake.
//!
//! Traces are encoded once, when they are written, so the buffer can account
//! for their exact size. The keep rate is only known when a batch is flushed,
//! so the msgpack encoder reserves a fixed-width float64 slot for it in the
//! first span of every trace and fills the slot in [`Encoder::join_encoded`].

use bytes::Bytes;
use rmp::encode::{self, ValueWriteError};
use std::collections::HashMap;
use tracing::debug;

use crate::span::{Span, KEEP_SPANS_RATE_KEY};

/// Placeholder written into the keep rate slot until the batch is finalized.
const KEEP_RATE_PLACEHOLDER: f64 = 1.0;

/// Width of a msgpack float64 payload, excluding its marker byte.
const F64_WIDTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("span {span_id} has trace id {found}, expected {expected}")]
    MixedTraceIds {
        span_id: u64,
        expected: u64,
        found: u64,
    },

    #[error("{0} does not fit in a msgpack length")]
    TooLarge(&'static str),

    #[error("msgpack write failed: {0}")]
    Write(#[from] ValueWriteError),
}

/// A trace serialized by an [`Encoder`].
///
/// The writer only looks at its length; the bytes belong to the encoder that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTrace {
    bytes: Vec<u8>,
    span_count: usize,
    keep_rate_offset: Option<usize>,
}

impl EncodedTrace {
    pub fn new(bytes: Vec<u8>, span_count: usize) -> Self {
        EncodedTrace {
            bytes,
            span_count,
            keep_rate_offset: None,
        }
    }

    /// Marks `offset..offset + 8` as the big-endian float64 holding the keep rate.
    #[must_use]
    pub fn with_keep_rate_offset(mut self, offset: usize) -> Self {
        self.keep_rate_offset = Some(offset);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn span_count(&self) -> usize {
        self.span_count
    }

    pub fn keep_rate_offset(&self) -> Option<usize> {
        self.keep_rate_offset
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub trait Encoder: Send + Sync {
    /// Serializes one trace.
    fn encode_trace(&self, trace: &[Span]) -> Result<EncodedTrace, EncodeError>;

    /// Number of bytes the trace occupies once joined into a batch.
    fn encoded_size(&self, trace: &EncodedTrace) -> usize {
        trace.len()
    }

    /// Builds one request body out of `traces`, stamping `keep_rate` onto each
    /// of them.
    fn join_encoded(&self, traces: Vec<EncodedTrace>, keep_rate: f64)
        -> Result<Bytes, EncodeError>;

    fn content_type(&self) -> &'static str;
}

/// Encoder for the agent's `v0.3`/`v0.4` msgpack trace format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackEncoder;

impl MsgpackEncoder {
    pub fn new() -> Self {
        MsgpackEncoder
    }

    fn encode_span(
        buf: &mut Vec<u8>,
        span: &Span,
        reserve_keep_rate: bool,
    ) -> Result<Option<usize>, EncodeError> {
        let mut fields = 10;
        if span.span_type.is_some() {
            fields += 1;
        }
        encode::write_map_len(buf, fields)?;

        encode::write_str(buf, "trace_id")?;
        encode::write_uint(buf, span.trace_id)?;
        encode::write_str(buf, "span_id")?;
        encode::write_uint(buf, span.span_id)?;
        encode::write_str(buf, "parent_id")?;
        encode::write_uint(buf, span.parent_id.unwrap_or(0))?;
        encode::write_str(buf, "name")?;
        encode::write_str(buf, &span.name)?;
        encode::write_str(buf, "service")?;
        encode::write_str(buf, &span.service)?;
        encode::write_str(buf, "resource")?;
        encode::write_str(buf, &span.resource)?;
        if let Some(span_type) = &span.span_type {
            encode::write_str(buf, "type")?;
            encode::write_str(buf, span_type)?;
        }
        encode::write_str(buf, "start")?;
        encode::write_sint(buf, span.start)?;
        encode::write_str(buf, "duration")?;
        encode::write_sint(buf, span.duration)?;
        encode::write_str(buf, "error")?;
        encode::write_sint(buf, i64::from(span.error))?;

        encode::write_str(buf, "meta")?;
        encode::write_map_len(buf, map_len(&span.meta)?)?;
        for (key, value) in &span.meta {
            encode::write_str(buf, key)?;
            encode::write_str(buf, value)?;
        }

        encode::write_str(buf, "metrics")?;
        Self::encode_metrics(buf, &span.metrics, reserve_keep_rate)
    }

    fn encode_metrics(
        buf: &mut Vec<u8>,
        metrics: &HashMap<String, f64>,
        reserve_keep_rate: bool,
    ) -> Result<Option<usize>, EncodeError> {
        if !reserve_keep_rate {
            encode::write_map_len(buf, map_len(metrics)?)?;
            for (key, value) in metrics {
                encode::write_str(buf, key)?;
                encode::write_f64(buf, *value)?;
            }
            return Ok(None);
        }

        let user_metrics = metrics
            .iter()
            .filter(|(key, _)| key.as_str() != KEEP_SPANS_RATE_KEY);
        let len = metrics.len() + usize::from(!metrics.contains_key(KEEP_SPANS_RATE_KEY));
        encode::write_map_len(
            buf,
            u32::try_from(len).map_err(|_| EncodeError::TooLarge("metrics map"))?,
        )?;
        for (key, value) in user_metrics {
            encode::write_str(buf, key)?;
            encode::write_f64(buf, *value)?;
        }
        encode::write_str(buf, KEEP_SPANS_RATE_KEY)?;
        // write_f64 always emits the 0xcb marker followed by 8 bytes.
        let offset = buf.len() + 1;
        encode::write_f64(buf, KEEP_RATE_PLACEHOLDER)?;
        Ok(Some(offset))
    }
}

fn map_len<V>(map: &HashMap<String, V>) -> Result<u32, EncodeError> {
    u32::try_from(map.len()).map_err(|_| EncodeError::TooLarge("map"))
}

impl Encoder for MsgpackEncoder {
    fn encode_trace(&self, trace: &[Span]) -> Result<EncodedTrace, EncodeError> {
        if let Some(first) = trace.first() {
            if let Some(stray) = trace.iter().find(|s| s.trace_id != first.trace_id) {
                return Err(EncodeError::MixedTraceIds {
                    span_id: stray.span_id,
                    expected: first.trace_id,
                    found: stray.trace_id,
                });
            }
        }

        let mut buf = Vec::new();
        encode::write_array_len(
            &mut buf,
            u32::try_from(trace.len()).map_err(|_| EncodeError::TooLarge("trace"))?,
        )?;
        let mut keep_rate_offset = None;
        for (i, span) in trace.iter().enumerate() {
            let offset = Self::encode_span(&mut buf, span, i == 0)?;
            if i == 0 {
                keep_rate_offset = offset;
            }
        }

        let encoded = EncodedTrace::new(buf, trace.len());
        Ok(match keep_rate_offset {
            Some(offset) => encoded.with_keep_rate_offset(offset),
            None => encoded,
        })
    }

    fn join_encoded(
        &self,
        traces: Vec<EncodedTrace>,
        keep_rate: f64,
    ) -> Result<Bytes, EncodeError> {
        let total: usize = traces.iter().map(EncodedTrace::len).sum();
        let mut payload = Vec::with_capacity(total + 5);
        encode::write_array_len(
            &mut payload,
            u32::try_from(traces.len()).map_err(|_| EncodeError::TooLarge("batch"))?,
        )?;

        let stamp = keep_rate.to_be_bytes();
        for trace in traces {
            let offset = trace.keep_rate_offset();
            let mut bytes = trace.into_bytes();
            match offset {
                Some(offset) if offset + F64_WIDTH <= bytes.len() => {
                    bytes[offset..offset + F64_WIDTH].copy_from_slice(&stamp);
                }
                Some(offset) => {
                    debug!("keep rate slot at {offset} is outside a {}b trace", bytes.len());
                }
                None => {}
            }
            payload.extend_from_slice(&bytes);
        }
        Ok(Bytes::from(payload))
    }

    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }
}
