// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock Datadog Agent for exercising the writer over real sockets

#![allow(dead_code)]

use bytes::Bytes;
use datadog_trace_writer::config::AgentUrl;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, Request, Response};
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const RATE_BY_SERVICE_BODY: &str = r#"{"rate_by_service":{"service:,env:":1}}"#;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// How the mock agent answers.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Always answer with this status and body
    Respond(u16, &'static str),
    /// Answer with the status for this path, 200 otherwise
    RejectPath(&'static str, u16),
}

#[derive(Clone)]
pub struct MockAgent {
    pub url: AgentUrl,
    pub received_requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    // Keeps the socket directory alive for UDS agents.
    _dir: Option<Arc<tempfile::TempDir>>,
}

impl MockAgent {
    /// Start a mock agent on a random TCP port answering 200
    pub async fn start() -> Self {
        Self::start_with(Behavior::Respond(200, RATE_BY_SERVICE_BODY)).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock agent");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let received_requests = Arc::new(Mutex::new(Vec::new()));
        let requests = received_requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve(TokioIo::new(stream), requests.clone(), behavior.clone());
            }
        });

        MockAgent {
            url: AgentUrl::Tcp {
                host: addr.ip().to_string(),
                port: addr.port(),
            },
            received_requests,
            _dir: None,
        }
    }

    /// Start a mock agent listening on a Unix domain socket
    #[cfg(unix)]
    pub async fn start_uds() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create socket dir");
        let path: PathBuf = dir.path().join("apm.socket");
        let listener =
            tokio::net::UnixListener::bind(&path).expect("Failed to bind mock agent socket");

        let received_requests = Arc::new(Mutex::new(Vec::new()));
        let requests = received_requests.clone();
        let behavior = Behavior::Respond(200, RATE_BY_SERVICE_BODY);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve(TokioIo::new(stream), requests.clone(), behavior.clone());
            }
        });

        MockAgent {
            url: AgentUrl::Unix { path },
            received_requests,
            _dir: Some(Arc::new(dir)),
        }
    }

    /// Get all received requests
    pub fn get_requests(&self) -> Vec<ReceivedRequest> {
        self.received_requests.lock().unwrap().clone()
    }

    /// Get requests matching a path
    pub fn get_requests_for_path(&self, path: &str) -> Vec<ReceivedRequest> {
        self.received_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.path == path)
            .cloned()
            .collect()
    }
}

fn serve<T>(io: T, requests: Arc<Mutex<Vec<ReceivedRequest>>>, behavior: Behavior)
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let service = hyper::service::service_fn(move |req: Request<Incoming>| {
            let requests = requests.clone();
            let behavior = behavior.clone();
            async move {
                let method = req.method().to_string();
                let path = req.uri().path().to_string();
                let headers: Vec<(String, String)> = req
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                    .collect();
                let body = req
                    .into_body()
                    .collect()
                    .await
                    .map(|collected| collected.to_bytes().to_vec())
                    .unwrap_or_default();

                let (status, reply) = match behavior {
                    Behavior::Respond(status, reply) => (status, reply),
                    Behavior::RejectPath(rejected, status) if rejected == path => {
                        (status, "Not Found")
                    }
                    Behavior::RejectPath(..) => (200, RATE_BY_SERVICE_BODY),
                };

                requests.lock().unwrap().push(ReceivedRequest {
                    method,
                    path,
                    headers,
                    body,
                });

                Response::builder()
                    .status(status)
                    .body(Full::new(Bytes::from_static(reply.as_bytes())))
            }
        });

        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(io, service)
            .await;
    });
}

/// Accepts connections and never answers.
pub async fn start_timeout_server() -> AgentUrl {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            open.push(stream);
        }
    });
    AgentUrl::Tcp {
        host: addr.ip().to_string(),
        port: addr.port(),
    }
}

/// Reads the request then hangs up without a valid response.
pub async fn start_reset_server() -> AgentUrl {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
                let _ = stream.write_all(b"garbage\r\n\r\n").await;
                let _ = stream.shutdown().await;
            });
        }
    });
    AgentUrl::Tcp {
        host: addr.ip().to_string(),
        port: addr.port(),
    }
}
