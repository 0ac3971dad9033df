// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::{BufferError, CycleStats, TraceBuffer};
use crate::config::{HttpStatusPolicy, WriterConfig};
use crate::encoder::{Encoder, MsgpackEncoder};
use crate::error::WriterError;
use crate::keep_rate::KeepRateTracker;
use crate::metrics::{
    MetricsClient, MetricsReporter, WriterMetrics, ENCODER_DROPPED_PAYLOAD_TRACES,
};
use crate::span::Span;
use crate::transport::{AgentResponse, HttpTransport, Transport, TransportError};
use crate::util::human_size;

/// Callback invoked with every response from a reachable agent.
pub type ResponseHandler = Arc<dyn Fn(&AgentResponse) + Send + Sync>;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Producer-facing interface shared by every writer.
#[async_trait]
pub trait TraceWriter: Send + Sync {
    /// Hands over one finished trace. Never blocks on I/O.
    fn write(&self, trace: &[Span]) -> Result<(), WriterError>;

    /// Flushes whatever is pending right now. With `raise_exc`, a failure to
    /// deliver is returned instead of only being logged.
    async fn flush_queue(&self, raise_exc: bool) -> Result<(), WriterError>;

    /// Requests shutdown. Returns immediately.
    fn stop(&self);

    /// Waits until the writer has flushed for the last time.
    async fn join(&self) -> Result<(), WriterError>;
}

/// Lifecycle of an [`AgentWriter`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// What a single flush cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Keep rate stamped on the traces of this cycle.
    pub keep_rate: f64,
    pub stats: CycleStats,
    pub sent_traces: usize,
    pub payload_size: usize,
    pub response: Option<AgentResponse>,
    pub error: Option<TransportError>,
    /// Accumulated health metrics as of the end of this cycle, before any
    /// report or reset.
    pub metrics: WriterMetrics,
}

enum Task {
    NotStarted,
    Running(JoinHandle<()>),
    Joined,
}

struct CycleState {
    keep_rate: KeepRateTracker,
    reporter: MetricsReporter,
}

struct Inner {
    buffer: TraceBuffer,
    encoder: Arc<dyn Encoder>,
    transport: Arc<dyn Transport>,
    flush_interval: Duration,
    status_policy: HttpStatusPolicy,
    response_handler: Option<ResponseHandler>,
    state: Mutex<WriterState>,
    shutdown: CancellationToken,
    /// Flips to `true` once the final cycle is done.
    stopped: watch::Sender<bool>,
    cycle: tokio::sync::Mutex<CycleState>,
}

/// Buffers traces and ships them to the Datadog Agent from one background
/// task.
pub struct AgentWriter {
    inner: Arc<Inner>,
    task: Mutex<Task>,
}

impl fmt::Debug for AgentWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentWriter")
            .field("url", &self.inner.transport.url())
            .field("state", &self.state())
            .field("buffered", &self.inner.buffer.len())
            .finish()
    }
}

pub struct AgentWriterBuilder {
    config: WriterConfig,
    encoder: Option<Arc<dyn Encoder>>,
    transport: Option<Arc<dyn Transport>>,
    metrics_client: Option<Arc<dyn MetricsClient>>,
    response_handler: Option<ResponseHandler>,
}

impl AgentWriterBuilder {
    #[must_use]
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Only used when health metrics are enabled in the config.
    #[must_use]
    pub fn metrics_client(mut self, client: Arc<dyn MetricsClient>) -> Self {
        self.metrics_client = Some(client);
        self
    }

    #[must_use]
    pub fn response_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AgentResponse) + Send + Sync + 'static,
    {
        self.response_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> AgentWriter {
        let config = self.config;
        let encoder = self
            .encoder
            .unwrap_or_else(|| Arc::new(MsgpackEncoder::new()));
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::from_config(&config, encoder.content_type()))
        });

        let metrics_client = if config.health_metrics_enabled {
            if self.metrics_client.is_none() {
                debug!("health metrics enabled without a metrics client, nothing will be reported");
            }
            self.metrics_client
        } else {
            None
        };

        let inner = Inner {
            buffer: TraceBuffer::new(config.buffer_size, config.max_payload_size),
            encoder,
            transport,
            flush_interval: config.flush_interval.max(MIN_FLUSH_INTERVAL),
            status_policy: config.http_status_policy,
            response_handler: self.response_handler,
            state: Mutex::new(WriterState::Idle),
            shutdown: CancellationToken::new(),
            stopped: watch::channel(false).0,
            cycle: tokio::sync::Mutex::new(CycleState {
                keep_rate: KeepRateTracker::new(config.keep_rate_window),
                reporter: MetricsReporter::new(
                    metrics_client,
                    config.metrics_namespace,
                    config.metrics_report_interval,
                ),
            }),
        };
        AgentWriter {
            inner: Arc::new(inner),
            task: Mutex::new(Task::NotStarted),
        }
    }
}

impl AgentWriter {
    /// msgpack over HTTP to `config.agent_url`, without health metrics.
    pub fn new(config: WriterConfig) -> Self {
        AgentWriter::builder(config).build()
    }

    pub fn builder(config: WriterConfig) -> AgentWriterBuilder {
        AgentWriterBuilder {
            config,
            encoder: None,
            transport: None,
            metrics_client: None,
            response_handler: None,
        }
    }

    pub fn state(&self) -> WriterState {
        *self.inner.lock_state()
    }

    pub fn buffer(&self) -> &TraceBuffer {
        &self.inner.buffer
    }

    pub fn agent_url(&self) -> String {
        self.inner.transport.url()
    }

    /// Keep rate that the next cycle will stamp.
    pub async fn keep_rate(&self) -> f64 {
        self.inner.cycle.lock().await.keep_rate.snapshot()
    }

    pub async fn drop_rate(&self) -> f64 {
        self.inner.cycle.lock().await.keep_rate.drop_rate()
    }

    /// Spawns the flush task on the current tokio runtime. Starting a running
    /// writer does nothing.
    pub fn start(&self) -> Result<(), WriterError> {
        let mut state = self.inner.lock_state();
        match *state {
            WriterState::Running => return Ok(()),
            WriterState::Stopping | WriterState::Stopped => return Err(WriterError::Stopped),
            WriterState::Idle => {}
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| WriterError::NoRuntime)?;

        let inner = Arc::clone(&self.inner);
        let handle = runtime.spawn(async move { inner.run().await });
        *self.lock_task() = Task::Running(handle);
        *state = WriterState::Running;
        debug!(
            "trace writer started, flushing to {} every {:?}",
            self.inner.transport.url(),
            self.inner.flush_interval
        );
        Ok(())
    }

    /// Runs one flush cycle immediately.
    pub async fn cycle(&self) -> CycleReport {
        self.inner.run_cycle(false).await
    }

    fn lock_task(&self) -> MutexGuard<'_, Task> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AgentWriter {
    fn drop(&mut self) {
        // The task still runs its final cycle.
        self.inner.shutdown.cancel();
    }
}

#[async_trait]
impl TraceWriter for AgentWriter {
    fn write(&self, trace: &[Span]) -> Result<(), WriterError> {
        if matches!(
            self.state(),
            WriterState::Stopping | WriterState::Stopped
        ) {
            debug!("trace writer stopped, discarding trace of {} spans", trace.len());
            return Ok(());
        }

        match self.inner.buffer.write(self.inner.encoder.as_ref(), trace) {
            Ok(()) => {}
            Err(BufferError::Closed) => {
                debug!("trace writer stopped, discarding trace of {} spans", trace.len());
            }
            Err(BufferError::Encode(e)) => {
                error!("failed to encode trace: {e}");
            }
            Err(BufferError::TraceTooBig { size, max }) => {
                warn!("trace ({size}b) larger than payload limit ({max}b), dropping");
            }
            Err(BufferError::Full {
                traces,
                buffered,
                max,
                size,
            }) => {
                warn!(
                    "trace buffer ({traces} traces {buffered}b/{max}b) cannot fit trace of size {size}b, dropping"
                );
            }
        }
        Ok(())
    }

    async fn flush_queue(&self, raise_exc: bool) -> Result<(), WriterError> {
        let report = self.inner.run_cycle(false).await;
        match report.error {
            Some(e) if raise_exc => Err(WriterError::Transport(e)),
            _ => Ok(()),
        }
    }

    fn stop(&self) {
        let mut state = self.inner.lock_state();
        if matches!(*state, WriterState::Idle | WriterState::Running) {
            *state = WriterState::Stopping;
            self.inner.shutdown.cancel();
        }
    }

    async fn join(&self) -> Result<(), WriterError> {
        let state = self.state();
        let task = {
            let mut task = self.lock_task();
            let (idle, joined) = match &*task {
                Task::NotStarted => (state == WriterState::Idle, false),
                Task::Running(_) => (false, false),
                Task::Joined => (false, true),
            };
            if idle {
                return Ok(());
            }
            (!joined).then(|| std::mem::replace(&mut *task, Task::Joined))
        };

        match task {
            Some(Task::Running(handle)) => {
                if let Err(e) = handle.await {
                    error!("trace writer task failed: {e}");
                }
            }
            // Stopped before it was ever started.
            Some(Task::NotStarted) => {
                self.inner.run_cycle(true).await;
            }
            Some(Task::Joined) => {}
            // Someone else is joining; wait for the same final cycle.
            None => {
                let mut stopped = self.inner.stopped.subscribe();
                let _ = stopped.wait_for(|done| *done).await;
                return Ok(());
            }
        }
        self.inner.mark_stopped();
        Ok(())
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_stopped(&self) {
        *self.lock_state() = WriterState::Stopped;
        self.stopped.send_replace(true);
    }

    async fn run(self: Arc<Self>) {
        self.cycle.lock().await.reporter.reschedule();
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle(false).await;
                }
            }
        }

        debug!("trace writer shutting down, flushing remaining traces");
        self.run_cycle(true).await;
        self.mark_stopped();
    }

    async fn run_cycle(&self, final_cycle: bool) -> CycleReport {
        let mut guard = self.cycle.lock().await;
        let CycleState {
            keep_rate,
            reporter,
        } = &mut *guard;

        let rate = keep_rate.snapshot();
        let drained = if final_cycle {
            self.buffer.close()
        } else {
            self.buffer.drain()
        };
        let mut report = CycleReport {
            keep_rate: rate,
            stats: drained.stats.clone(),
            ..CycleReport::default()
        };

        if !drained.is_empty() {
            let trace_count = drained.traces.len();
            match self.encoder.join_encoded(drained.traces, rate) {
                Ok(payload) => {
                    report.payload_size = payload.len();
                    self.send(payload, trace_count, reporter.metrics_mut(), &mut report)
                        .await;
                }
                Err(e) => {
                    error!("failed to encode trace: {e}");
                    reporter.metrics_mut().add(
                        ENCODER_DROPPED_PAYLOAD_TRACES,
                        trace_count as u64,
                        Vec::new(),
                    );
                }
            }
        }

        keep_rate.record_cycle(report.stats.accepted_traces, report.stats.dropped_traces());
        reporter.metrics_mut().record_buffer(&report.stats);
        report.metrics = reporter.metrics().clone();
        reporter.end_cycle(final_cycle);
        report
    }

    async fn send(
        &self,
        payload: bytes::Bytes,
        trace_count: usize,
        metrics: &mut WriterMetrics,
        report: &mut CycleReport,
    ) {
        let size = payload.len();
        let url = self.transport.url();
        let endpoint = self.transport.endpoint();
        let started = Instant::now();

        let response = match self.transport.send(payload, trace_count).await {
            Ok(response) => response,
            Err(e) => {
                error!("failed to send traces to Datadog Agent at {url}: {e}");
                metrics.record_http_error(e.kind(), size, trace_count);
                report.error = Some(e);
                return;
            }
        };

        if let Some(handler) = &self.response_handler {
            handler(&response);
        }

        let status = response.status;
        if status == 404 || status == 415 {
            if self.transport.downgrade() {
                warn!(
                    "calling endpoint '{endpoint}' but received {status}; downgrading to '{}'",
                    self.transport.endpoint()
                );
            } else {
                error!(
                    "unsupported endpoint '{endpoint}': received response {status} from Datadog Agent ({url})"
                );
            }
        }

        if status >= 400 {
            if !matches!(status, 404 | 415) {
                error!(
                    "failed to send traces to Datadog Agent at {url}: HTTP error status {status}, reason {}",
                    String::from_utf8_lossy(&response.body)
                );
            }
            match self.status_policy {
                HttpStatusPolicy::ByStatus => {
                    metrics.record_http_error(&status.to_string(), size, trace_count);
                }
                HttpStatusPolicy::AsNetworkError => {
                    metrics.record_http_error("err", size, trace_count);
                }
                HttpStatusPolicy::Ignore => metrics.record_sent(size, trace_count),
            }
        } else {
            report.sent_traces = trace_count;
            metrics.record_sent(size, trace_count);
            debug!(
                "sent {} in {:.5}s to {url}",
                human_size(size as u64),
                started.elapsed().as_secs_f64()
            );
        }
        report.response = Some(response);
    }
}
