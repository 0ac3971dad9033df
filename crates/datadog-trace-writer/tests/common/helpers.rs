// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

#![allow(dead_code)]

use datadog_trace_writer::config::{AgentUrl, WriterConfig};
use datadog_trace_writer::encoder::{Encoder, MsgpackEncoder};
use datadog_trace_writer::Span;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// A trace of `spans` spans chained through their parent ids.
pub fn chained_trace(trace_id: u64, spans: u64, name: &str) -> Vec<Span> {
    (0..spans)
        .map(|j| {
            Span::new(trace_id, j, name)
                .with_parent(j.checked_sub(1))
                .with_service("test-service")
        })
        .collect()
}

/// 1024 spans with 5000 character names, well past the default payload limit.
pub fn huge_trace(trace_id: u64) -> Vec<Span> {
    chained_trace(trace_id, 1 << 10, &"a".repeat(5000))
}

pub fn encoded_size(trace: &[Span]) -> usize {
    MsgpackEncoder.encode_trace(trace).unwrap().len()
}

/// Short timeouts so failure scenarios finish quickly.
pub fn test_config(agent_url: AgentUrl) -> WriterConfig {
    WriterConfig {
        agent_url,
        connect_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(500),
        ..WriterConfig::default()
    }
}

pub fn unreachable_agent() -> AgentUrl {
    // Nothing listens on a port that was just released.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    AgentUrl::Tcp {
        host: "127.0.0.1".to_string(),
        port,
    }
}

#[derive(Debug, Deserialize)]
pub struct DecodedSpan {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
    pub name: String,
    pub service: String,
    pub metrics: HashMap<String, f64>,
}

/// Decodes a v0.4 payload as received by the agent.
pub fn decode_payload(body: &[u8]) -> Vec<Vec<DecodedSpan>> {
    rmp_serde::from_slice(body).expect("Failed to decode msgpack payload")
}

pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
