// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of joined payloads to the Datadog Agent.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error as _;
use std::io;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{AgentUrl, WriterConfig};
use crate::http_utils::{self, V04_TRACES_ENDPOINT};

/// What a reachable agent answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Deserialize)]
struct RateByService {
    rate_by_service: HashMap<String, f64>,
}

impl AgentResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The agent's sampling rates keyed by `service:<name>,env:<env>`, if the
    /// body carries any.
    pub fn rate_by_service(&self) -> Option<HashMap<String, f64>> {
        serde_json::from_slice::<RateByService>(&self.body)
            .ok()
            .map(|r| r.rate_by_service)
    }
}

/// A payload that never got an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("connection to {url} closed before a response was received: {source}")]
    Reset {
        url: String,
        #[source]
        source: hyper::Error,
    },

    #[error("HTTP error talking to {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: hyper::Error,
    },

    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("unix domain sockets are not supported on this platform: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Value of the `type` tag on `http.errors`.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout { .. } => "timeout",
            TransportError::Reset { .. } => "reset",
            TransportError::Connect { .. }
            | TransportError::Http { .. }
            | TransportError::Request(_)
            | TransportError::Unsupported(_) => "err",
        }
    }

    fn from_hyper(url: String, err: hyper::Error) -> TransportError {
        if is_reset(&err) {
            TransportError::Reset { url, source: err }
        } else {
            TransportError::Http { url, source: err }
        }
    }
}

fn is_reset(err: &hyper::Error) -> bool {
    if err.is_parse() || err.is_incomplete_message() || err.is_canceled() || err.is_closed() {
        return true;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            );
        }
        source = cause.source();
    }
    false
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one joined batch. Any HTTP response, whatever its status, is a
    /// success at this level.
    async fn send(&self, payload: Bytes, trace_count: usize)
        -> Result<AgentResponse, TransportError>;

    /// Agent location, used in log messages.
    fn url(&self) -> String;

    /// Path the next payload is sent to.
    fn endpoint(&self) -> String {
        V04_TRACES_ENDPOINT.to_string()
    }

    /// Switches to the previous API version. Returns false when there is none.
    fn downgrade(&self) -> bool {
        false
    }
}

/// HTTP/1.1 transport over TCP or a Unix domain socket. Every payload uses
/// a fresh connection.
#[derive(Debug)]
pub struct HttpTransport {
    url: AgentUrl,
    endpoint: RwLock<&'static str>,
    content_type: &'static str,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: AgentUrl, content_type: &'static str) -> Self {
        let defaults = WriterConfig::default();
        HttpTransport {
            url,
            endpoint: RwLock::new(V04_TRACES_ENDPOINT),
            content_type,
            connect_timeout: defaults.connect_timeout,
            read_timeout: defaults.read_timeout,
        }
    }

    pub fn from_config(config: &WriterConfig, content_type: &'static str) -> Self {
        HttpTransport::new(config.agent_url.clone(), content_type)
            .with_timeouts(config.connect_timeout, config.read_timeout)
    }

    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    pub fn agent_url(&self) -> &AgentUrl {
        &self.url
    }

    fn current_endpoint(&self) -> &'static str {
        *self.endpoint.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>, TransportError> {
        let connecting = async {
            match &self.url {
                AgentUrl::Tcp { host, port } => {
                    let stream = TcpStream::connect((host.as_str(), *port))
                        .await
                        .map_err(|source| self.connect_error(source))?;
                    self.handshake(TokioIo::new(stream)).await
                }
                #[cfg(unix)]
                AgentUrl::Unix { path } => {
                    let stream = tokio::net::UnixStream::connect(path)
                        .await
                        .map_err(|source| self.connect_error(source))?;
                    self.handshake(TokioIo::new(stream)).await
                }
                #[cfg(not(unix))]
                AgentUrl::Unix { .. } => Err(TransportError::Unsupported(self.url())),
            }
        };
        timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| TransportError::Timeout {
                url: self.url(),
                after: self.connect_timeout,
            })?
    }

    fn connect_error(&self, source: io::Error) -> TransportError {
        TransportError::Connect {
            url: self.url(),
            source,
        }
    }

    async fn handshake<T>(&self, io: T) -> Result<SendRequest<Full<Bytes>>, TransportError>
    where
        T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let (sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::from_hyper(self.url(), e))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("agent connection closed with error: {e}");
            }
        });
        Ok(sender)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        payload: Bytes,
        trace_count: usize,
    ) -> Result<AgentResponse, TransportError> {
        let request = http_utils::build_traces_request(
            &self.url,
            self.current_endpoint(),
            self.content_type,
            payload,
            trace_count,
        )?;
        let mut sender = self.connect().await?;

        let exchange = async {
            let response = sender.send_request(request).await?;
            let status = response.status().as_u16();
            let body = response.into_body().collect().await?.to_bytes();
            Ok::<_, hyper::Error>(AgentResponse { status, body })
        };

        match timeout(self.read_timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(TransportError::from_hyper(self.url(), e)),
            Err(_) => Err(TransportError::Timeout {
                url: self.url(),
                after: self.read_timeout,
            }),
        }
    }

    fn url(&self) -> String {
        self.url.to_string()
    }

    fn endpoint(&self) -> String {
        self.current_endpoint().to_string()
    }

    fn downgrade(&self) -> bool {
        let mut endpoint = self.endpoint.write().unwrap_or_else(PoisonError::into_inner);
        match http_utils::downgrade_endpoint(&endpoint) {
            Some(previous) => {
                *endpoint = previous;
                true
            }
            None => false,
        }
    }
}
