// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::buffer::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ITEM_SIZE};
use crate::keep_rate::DEFAULT_WINDOW;

pub const DEFAULT_AGENT_HOST: &str = "localhost";
pub const DEFAULT_AGENT_PORT: u16 = 8126;
pub const DEFAULT_METRICS_NAMESPACE: &str = "datadog.tracer";

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported agent url '{0}'")]
    InvalidUrl(String),

    #[error("agent url '{0}' has no host")]
    MissingHost(String),
}

/// Where the Datadog Agent listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentUrl {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Default for AgentUrl {
    fn default() -> Self {
        AgentUrl::Tcp {
            host: DEFAULT_AGENT_HOST.to_string(),
            port: DEFAULT_AGENT_PORT,
        }
    }
}

impl AgentUrl {
    /// Accepts `http://host[:port]` and `unix:///path/to/socket`. A missing
    /// port defaults to the agent's.
    pub fn parse(url: &str) -> Result<AgentUrl, ConfigError> {
        if let Some(path) = url.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(ConfigError::InvalidUrl(url.to_string()));
            }
            return Ok(AgentUrl::Unix {
                path: PathBuf::from(path),
            });
        }

        let uri = hyper::Uri::from_str(url).map_err(|_| ConfigError::InvalidUrl(url.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(ConfigError::InvalidUrl(url.to_string()));
        }
        let host = match uri.host() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(ConfigError::MissingHost(url.to_string())),
        };
        Ok(AgentUrl::Tcp {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: uri.port_u16().unwrap_or(DEFAULT_AGENT_PORT),
        })
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, AgentUrl::Unix { .. })
    }
}

impl FromStr for AgentUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentUrl::parse(s)
    }
}

impl fmt::Display for AgentUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentUrl::Tcp { host, port } if host.contains(':') => {
                write!(f, "http://[{host}]:{port}")
            }
            AgentUrl::Tcp { host, port } => write!(f, "http://{host}:{port}"),
            AgentUrl::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

/// How non-2xx agent responses are accounted in `http.errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpStatusPolicy {
    /// Counted with the status code as the `type` tag.
    #[default]
    ByStatus,
    /// Counted like a network failure, `type:err`.
    AsNetworkError,
    /// Never counted as an error.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub agent_url: AgentUrl,
    /// Maximum number of encoded bytes held between two flushes
    pub buffer_size: usize,
    /// Maximum encoded size of a single trace
    pub max_payload_size: usize,
    pub flush_interval: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub health_metrics_enabled: bool,
    /// how often to report health metrics
    pub metrics_report_interval: Duration,
    pub metrics_namespace: String,
    /// number of trace outcomes the keep rate is averaged over
    pub keep_rate_window: u64,
    pub http_status_policy: HttpStatusPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            agent_url: AgentUrl::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_payload_size: DEFAULT_MAX_ITEM_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            health_metrics_enabled: false,
            metrics_report_interval: DEFAULT_FLUSH_INTERVAL,
            metrics_namespace: DEFAULT_METRICS_NAMESPACE.to_string(),
            keep_rate_window: DEFAULT_WINDOW,
            http_status_policy: HttpStatusPolicy::default(),
        }
    }
}

impl WriterConfig {
    pub fn from_env() -> Result<WriterConfig, ConfigError> {
        let defaults = WriterConfig::default();

        let agent_url = match env::var("DD_TRACE_AGENT_URL") {
            Ok(url) if !url.is_empty() => AgentUrl::parse(&url)?,
            _ => AgentUrl::Tcp {
                host: env::var("DD_AGENT_HOST")
                    .ok()
                    .filter(|host| !host.is_empty())
                    .unwrap_or_else(|| DEFAULT_AGENT_HOST.to_string()),
                port: env_parse("DD_TRACE_AGENT_PORT").unwrap_or(DEFAULT_AGENT_PORT),
            },
        };

        let flush_interval =
            env_secs("DD_TRACE_WRITER_INTERVAL_SECONDS").unwrap_or(defaults.flush_interval);
        let timeout = env_secs("DD_TRACE_AGENT_TIMEOUT_SECONDS").unwrap_or(DEFAULT_TIMEOUT);

        Ok(WriterConfig {
            agent_url,
            buffer_size: env_parse("DD_TRACE_WRITER_BUFFER_SIZE_BYTES")
                .unwrap_or(defaults.buffer_size),
            max_payload_size: env_parse("DD_TRACE_WRITER_MAX_PAYLOAD_SIZE_BYTES")
                .unwrap_or(defaults.max_payload_size),
            flush_interval,
            connect_timeout: timeout,
            read_timeout: timeout,
            health_metrics_enabled: env_bool("DD_TRACE_HEALTH_METRICS_ENABLED")
                .unwrap_or(defaults.health_metrics_enabled),
            metrics_report_interval: env_secs("DD_TRACE_WRITER_METRICS_INTERVAL_SECONDS")
                .unwrap_or(flush_interval),
            ..defaults
        })
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<f64>(key)
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}

fn env_bool(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use duplicate::duplicate_item;
    use serial_test::serial;
    use std::env;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::config::{self, AgentUrl, ConfigError};

    const VARS: [&str; 9] = [
        "DD_TRACE_AGENT_URL",
        "DD_AGENT_HOST",
        "DD_TRACE_AGENT_PORT",
        "DD_TRACE_WRITER_BUFFER_SIZE_BYTES",
        "DD_TRACE_WRITER_MAX_PAYLOAD_SIZE_BYTES",
        "DD_TRACE_WRITER_INTERVAL_SECONDS",
        "DD_TRACE_AGENT_TIMEOUT_SECONDS",
        "DD_TRACE_HEALTH_METRICS_ENABLED",
        "DD_TRACE_WRITER_METRICS_INTERVAL_SECONDS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = config::WriterConfig::from_env().unwrap();
        assert_eq!(config.agent_url.to_string(), "http://localhost:8126");
        assert_eq!(config.buffer_size, 8_000_000);
        assert_eq!(config.max_payload_size, 8_000_000);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert!(!config.health_metrics_enabled);
        assert_eq!(config.metrics_report_interval, config.flush_interval);
        assert_eq!(config.metrics_namespace, "datadog.tracer");
    }

    #[test]
    #[serial]
    fn test_host_and_port_from_env() {
        clear_env();
        env::set_var("DD_AGENT_HOST", "agent.local");
        env::set_var("DD_TRACE_AGENT_PORT", "18126");
        let config = config::WriterConfig::from_env().unwrap();
        assert_eq!(
            config.agent_url,
            AgentUrl::Tcp {
                host: "agent.local".to_string(),
                port: 18126
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_agent_url_takes_precedence() {
        clear_env();
        env::set_var("DD_AGENT_HOST", "ignored");
        env::set_var("DD_TRACE_AGENT_URL", "unix:///var/run/datadog/apm.socket");
        let config = config::WriterConfig::from_env().unwrap();
        assert_eq!(
            config.agent_url,
            AgentUrl::Unix {
                path: PathBuf::from("/var/run/datadog/apm.socket")
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_agent_url_is_an_error() {
        clear_env();
        env::set_var("DD_TRACE_AGENT_URL", "ftp://agent:21");
        let err = config::WriterConfig::from_env().unwrap_err();
        assert_eq!(err, ConfigError::InvalidUrl("ftp://agent:21".to_string()));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_writer_tuning_from_env() {
        clear_env();
        env::set_var("DD_TRACE_WRITER_BUFFER_SIZE_BYTES", "5300");
        env::set_var("DD_TRACE_WRITER_MAX_PAYLOAD_SIZE_BYTES", "4000");
        env::set_var("DD_TRACE_WRITER_INTERVAL_SECONDS", "0.5");
        env::set_var("DD_TRACE_AGENT_TIMEOUT_SECONDS", "0.25");
        env::set_var("DD_TRACE_HEALTH_METRICS_ENABLED", "true");
        let config = config::WriterConfig::from_env().unwrap();
        assert_eq!(config.buffer_size, 5300);
        assert_eq!(config.max_payload_size, 4000);
        assert_eq!(config.flush_interval, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Duration::from_millis(250));
        assert!(config.health_metrics_enabled);
        // follows the flush interval unless set
        assert_eq!(config.metrics_report_interval, Duration::from_millis(500));

        env::set_var("DD_TRACE_WRITER_METRICS_INTERVAL_SECONDS", "10");
        let config = config::WriterConfig::from_env().unwrap();
        assert_eq!(config.metrics_report_interval, Duration::from_secs(10));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparsable_numbers_fall_back_to_defaults() {
        clear_env();
        env::set_var("DD_TRACE_WRITER_BUFFER_SIZE_BYTES", "lots");
        env::set_var("DD_TRACE_WRITER_INTERVAL_SECONDS", "-1");
        env::set_var("DD_TRACE_HEALTH_METRICS_ENABLED", "maybe");
        let config = config::WriterConfig::from_env().unwrap();
        assert_eq!(config.buffer_size, 8_000_000);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert!(!config.health_metrics_enabled);
        clear_env();
    }

    #[duplicate_item(
        test_name                   url                                 expected;
        [test_parse_http_url]       ["http://127.0.0.1:8126"]           ["http://127.0.0.1:8126"];
        [test_parse_default_port]   ["http://agent"]                    ["http://agent:8126"];
        [test_parse_trailing_slash] ["http://agent:9000/"]              ["http://agent:9000"];
        [test_parse_ipv6]           ["http://[::1]:8126"]               ["http://[::1]:8126"];
        [test_parse_unix_url]       ["unix:///tmp/ddagent/trace.sock"]  ["unix:///tmp/ddagent/trace.sock"];
    )]
    #[test]
    fn test_name() {
        let parsed = AgentUrl::parse(url).unwrap();
        assert_eq!(parsed.to_string(), expected);
    }

    #[duplicate_item(
        test_name                 url;
        [test_reject_https]       ["https://agent:8126"];
        [test_reject_empty_unix]  ["unix://"];
        [test_reject_garbage]     ["not a url"];
    )]
    #[test]
    fn test_name() {
        assert!(AgentUrl::parse(url).is_err());
    }
}
