// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, http, Method, Request};

use crate::config::AgentUrl;

pub const V04_TRACES_ENDPOINT: &str = "/v0.4/traces";
pub const V03_TRACES_ENDPOINT: &str = "/v0.3/traces";

pub const HEADER_TRACE_COUNT: &str = "X-Datadog-Trace-Count";
pub const HEADER_META_LANG: &str = "Datadog-Meta-Lang";
pub const HEADER_META_LANG_VERSION: &str = "Datadog-Meta-Lang-Version";
pub const HEADER_META_TRACER_VERSION: &str = "Datadog-Meta-Tracer-Version";

pub const LANG: &str = "rust";
pub const TRACER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the toolchain the crate was built with, when cargo exposes it.
pub fn lang_version() -> &'static str {
    option_env!("CARGO_PKG_RUST_VERSION")
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
}

/// The endpoint a request on `endpoint` falls back to when the agent does
/// not support it.
pub fn downgrade_endpoint(endpoint: &str) -> Option<&'static str> {
    match endpoint {
        V04_TRACES_ENDPOINT => Some(V03_TRACES_ENDPOINT),
        _ => None,
    }
}

/// Value of the `Host` header. Unix sockets have no authority, so the agent
/// only sees `localhost`.
pub fn host_header(url: &AgentUrl) -> String {
    match url {
        AgentUrl::Tcp { host, port } if host.contains(':') => format!("[{host}]:{port}"),
        AgentUrl::Tcp { host, port } => format!("{host}:{port}"),
        AgentUrl::Unix { .. } => "localhost".to_string(),
    }
}

/// Builds the `PUT` carrying a joined batch of `trace_count` traces.
pub fn build_traces_request(
    url: &AgentUrl,
    endpoint: &str,
    content_type: &str,
    payload: Bytes,
    trace_count: usize,
) -> http::Result<Request<Full<Bytes>>> {
    Request::builder()
        .method(Method::PUT)
        .uri(endpoint)
        .header(header::HOST, host_header(url))
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, payload.len().to_string())
        .header(HEADER_TRACE_COUNT, trace_count.to_string())
        .header(HEADER_META_LANG, LANG)
        .header(HEADER_META_LANG_VERSION, lang_version())
        .header(HEADER_META_TRACER_VERSION, TRACER_VERSION)
        .body(Full::new(payload))
}
