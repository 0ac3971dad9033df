// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal fire-and-forget DogStatsD client over UDP.

use std::io;
use std::net::{Ipv4Addr, ToSocketAddrs, UdpSocket};
use tracing::debug;

use crate::metrics::MetricsClient;

pub const DEFAULT_DOGSTATSD_PORT: u16 = 8125;

#[derive(Debug)]
pub struct DogStatsdClient {
    socket: UdpSocket,
    constant_tags: Vec<String>,
}

impl DogStatsdClient {
    /// Binds an ephemeral local port and connects it to `addr`.
    pub fn new(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(addr)?;
        socket.set_nonblocking(true)?;
        Ok(DogStatsdClient {
            socket,
            constant_tags: Vec::new(),
        })
    }

    /// Tags appended to every metric.
    #[must_use]
    pub fn with_constant_tags(mut self, tags: Vec<String>) -> Self {
        self.constant_tags = tags;
        self
    }

    fn format(&self, name: &str, value: &str, metric_type: &str, tags: &[String]) -> String {
        let mut line = format!("{name}:{value}|{metric_type}");
        let mut all_tags = tags.iter().chain(self.constant_tags.iter()).peekable();
        if all_tags.peek().is_some() {
            line.push_str("|#");
            line.push_str(&all_tags.map(String::as_str).collect::<Vec<_>>().join(","));
        }
        line
    }

    fn send(&self, line: &str) {
        if let Err(e) = self.socket.send(line.as_bytes()) {
            debug!("failed to send metric to DogStatsD: {e}");
        }
    }
}

impl MetricsClient for DogStatsdClient {
    fn increment(&self, name: &str, tags: &[String]) {
        self.send(&self.format(name, "1", "c", tags));
    }

    fn distribution(&self, name: &str, value: f64, tags: &[String]) {
        self.send(&self.format(name, &value.to_string(), "d", tags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn receiver() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    fn recv(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let n = socket.recv(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[test]
    fn test_distribution_datagram() {
        let (socket, addr) = receiver();
        let client = DogStatsdClient::new(addr).unwrap();
        client.distribution(
            "datadog.tracer.buffer.dropped.traces",
            1.0,
            &["reason:full".to_string()],
        );
        assert_eq!(
            recv(&socket),
            "datadog.tracer.buffer.dropped.traces:1|d|#reason:full"
        );
    }

    #[test]
    fn test_increment_with_constant_tags() {
        let (socket, addr) = receiver();
        let client = DogStatsdClient::new(addr)
            .unwrap()
            .with_constant_tags(vec!["env:test".to_string()]);
        client.increment("datadog.tracer.http.requests", &[]);
        assert_eq!(recv(&socket), "datadog.tracer.http.requests:1|c|#env:test");
    }

    #[test]
    fn test_untagged_distribution() {
        let (socket, addr) = receiver();
        let client = DogStatsdClient::new(addr).unwrap();
        client.distribution("datadog.tracer.http.sent.bytes", 1536.0, &[]);
        assert_eq!(recv(&socket), "datadog.tracer.http.sent.bytes:1536|d");
    }
}
