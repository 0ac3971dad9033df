// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::ConfigError;
use crate::encoder::EncodeError;
use crate::transport::TransportError;

/// Errors surfaced by the trace writers
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("Failed to send traces: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to encode traces: {0}")]
    Encode(#[from] EncodeError),

    #[error("Failed to write traces: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No tokio runtime available to start the writer")]
    NoRuntime,

    #[error("Writer already stopped")]
    Stopped,
}
