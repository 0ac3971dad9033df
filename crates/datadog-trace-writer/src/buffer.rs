// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size-bounded holding area for encoded traces.
//!
//! Producers call [`TraceBuffer::write`] from any thread. Encoding happens
//! before the lock is taken; the critical section only checks the limits,
//! appends and updates the per-cycle statistics. [`TraceBuffer::drain`] swaps
//! everything out in the same critical section, so a trace and its accounting
//! always end up in the same cycle. [`TraceBuffer::close`] is the last drain:
//! writes that lose the race against it are refused with
//! [`BufferError::Closed`] instead of being stranded.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::encoder::{EncodeError, EncodedTrace, Encoder};
use crate::span::Span;

/// Default maximum number of buffered bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8_000_000;

/// Default maximum size of a single encoded trace.
pub const DEFAULT_MAX_ITEM_SIZE: usize = 8_000_000;

/// Why a trace was refused by the buffer. Rendered as the `reason` metric tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    TraceTooBig,
    Full,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::TraceTooBig => "t_too_big",
            DropReason::Full => "full",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("failed to encode trace: {0}")]
    Encode(#[from] EncodeError),

    #[error("trace ({size}b) larger than payload limit ({max}b)")]
    TraceTooBig { size: usize, max: usize },

    #[error("trace buffer ({traces} traces {buffered}b/{max}b) cannot fit trace of size {size}b")]
    Full {
        traces: usize,
        buffered: usize,
        max: usize,
        size: usize,
    },

    #[error("trace buffer is closed")]
    Closed,
}

impl BufferError {
    /// The capacity reason, `None` for encoding failures.
    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            BufferError::Encode(_) | BufferError::Closed => None,
            BufferError::TraceTooBig { .. } => Some(DropReason::TraceTooBig),
            BufferError::Full { .. } => Some(DropReason::Full),
        }
    }
}

/// Traces, spans and bytes lost for one reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dropped {
    pub traces: u64,
    pub spans: u64,
    pub bytes: u64,
}

/// Outcome of every write since the previous drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub accepted_traces: u64,
    pub accepted_spans: u64,
    pub too_big: Dropped,
    pub full: Dropped,
    pub encoder_failures: u64,
}

impl CycleStats {
    pub fn dropped(&self, reason: DropReason) -> &Dropped {
        match reason {
            DropReason::TraceTooBig => &self.too_big,
            DropReason::Full => &self.full,
        }
    }

    fn dropped_mut(&mut self, reason: DropReason) -> &mut Dropped {
        match reason {
            DropReason::TraceTooBig => &mut self.too_big,
            DropReason::Full => &mut self.full,
        }
    }

    /// Traces lost for any reason, encoding failures included.
    pub fn dropped_traces(&self) -> u64 {
        self.too_big.traces + self.full.traces + self.encoder_failures
    }

    /// Every write issued during the cycle.
    pub fn total_traces(&self) -> u64 {
        self.accepted_traces + self.dropped_traces()
    }
}

/// Contents of the buffer taken by [`TraceBuffer::drain`].
#[derive(Debug, Default)]
pub struct Drained {
    pub traces: Vec<EncodedTrace>,
    pub size: usize,
    pub stats: CycleStats,
}

impl Drained {
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    traces: Vec<EncodedTrace>,
    size: usize,
    stats: CycleStats,
    closed: bool,
}

#[derive(Debug)]
pub struct TraceBuffer {
    max_size: usize,
    max_item_size: usize,
    state: Mutex<State>,
}

impl Default for TraceBuffer {
    fn default() -> Self {
        TraceBuffer::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ITEM_SIZE)
    }
}

impl TraceBuffer {
    pub fn new(max_size: usize, max_item_size: usize) -> Self {
        TraceBuffer {
            max_size,
            max_item_size,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The state is consistent after every statement, so a panic elsewhere
        // never leaves it half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encodes and buffers `trace`, or records why it was dropped. Nothing
    /// is recorded once the buffer is closed.
    pub fn write(&self, encoder: &dyn Encoder, trace: &[Span]) -> Result<(), BufferError> {
        let encoded = match encoder.encode_trace(trace) {
            Ok(encoded) => encoded,
            Err(e) => {
                let mut state = self.lock();
                if state.closed {
                    return Err(BufferError::Closed);
                }
                state.stats.encoder_failures += 1;
                return Err(e.into());
            }
        };
        let size = encoder.encoded_size(&encoded);
        let spans = trace.len() as u64;

        let mut state = self.lock();
        let refused = if state.closed {
            Some(BufferError::Closed)
        } else if size > self.max_item_size {
            Some(BufferError::TraceTooBig {
                size,
                max: self.max_item_size,
            })
        } else if state.size + size > self.max_size {
            Some(BufferError::Full {
                traces: state.traces.len(),
                buffered: state.size,
                max: self.max_size,
                size,
            })
        } else {
            None
        };

        if let Some(err) = refused {
            if let Some(reason) = err.drop_reason() {
                let dropped = state.stats.dropped_mut(reason);
                dropped.traces += 1;
                dropped.spans += spans;
                dropped.bytes += size as u64;
            }
            return Err(err);
        }

        state.traces.push(encoded);
        state.size += size;
        state.stats.accepted_traces += 1;
        state.stats.accepted_spans += spans;
        Ok(())
    }

    /// Takes every buffered trace and the statistics gathered since the last drain.
    pub fn drain(&self) -> Drained {
        Self::take(&mut self.lock())
    }

    /// Drains for the last time and refuses every later write.
    pub fn close(&self) -> Drained {
        let mut state = self.lock();
        state.closed = true;
        Self::take(&mut state)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn take(state: &mut State) -> Drained {
        Drained {
            traces: std::mem::take(&mut state.traces),
            size: std::mem::take(&mut state.size),
            stats: std::mem::take(&mut state.stats),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().traces.is_empty()
    }

    /// Bytes currently buffered.
    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_item_size(&self) -> usize {
        self.max_item_size
    }
}
