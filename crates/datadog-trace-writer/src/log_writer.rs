// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use crate::error::WriterError;
use crate::span::Span;
use crate::writer::TraceWriter;

#[derive(Serialize)]
struct LogLine<'a> {
    traces: [&'a [Span]; 1],
}

/// Writes every trace as one JSON line, `{"traces":[[span, ...]]}`, for a
/// log forwarder to pick up. Nothing is buffered.
#[derive(Debug)]
pub struct LogWriter<W: Write + Send> {
    out: Mutex<W>,
}

impl LogWriter<io::Stderr> {
    pub fn stderr() -> Self {
        LogWriter::new(io::stderr())
    }
}

impl<W: Write + Send> LogWriter<W> {
    pub fn new(out: W) -> Self {
        LogWriter {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send> TraceWriter for LogWriter<W> {
    fn write(&self, trace: &[Span]) -> Result<(), WriterError> {
        let line = serde_json::to_vec(&LogLine { traces: [trace] }).map_err(io::Error::from)?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    async fn flush_queue(&self, _raise_exc: bool) -> Result<(), WriterError> {
        Ok(())
    }

    fn stop(&self) {}

    async fn join(&self) -> Result<(), WriterError> {
        Ok(())
    }
}
