// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the lokean pipeline.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Why a single payload could not be turned into a log record.
///
/// Parse failures are per message: they are reported and the message is dropped, the stream
/// keeps flowing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("message tagged {tags:?} is not routed to this pipeline")]
    Unroutable {
        tags: Vec<String>,
        payload_size: usize,
    },
    #[error("payload of {payload_size} bytes is not a JSON object: {reason}")]
    Malformed { payload_size: usize, reason: String },
    #[error("missing required field `{field}`")]
    MissingField {
        field: &'static str,
        payload_size: usize,
    },
    #[error("invalid `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        payload_size: usize,
        reason: String,
    },
    #[error("unknown severity number {code} in `{field}`")]
    SeverityOutOfRange {
        field: &'static str,
        code: i64,
        payload_size: usize,
    },
}

impl ParseFailure {
    /// The upstream field that caused the failure, when there is one.
    #[must_use]
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ParseFailure::MissingField { field, .. }
            | ParseFailure::InvalidField { field, .. }
            | ParseFailure::SeverityOutOfRange { field, .. } => Some(field),
            ParseFailure::Unroutable { .. } | ParseFailure::Malformed { .. } => None,
        }
    }

    #[must_use]
    pub fn payload_size(&self) -> usize {
        match self {
            ParseFailure::Unroutable { payload_size, .. }
            | ParseFailure::Malformed { payload_size, .. }
            | ParseFailure::MissingField { payload_size, .. }
            | ParseFailure::InvalidField { payload_size, .. }
            | ParseFailure::SeverityOutOfRange { payload_size, .. } => *payload_size,
        }
    }
}

/// Structural failures that end a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("outbound channel closed after forwarding {forwarded} records")]
    SinkClosed { forwarded: u64 },
    #[error("pipeline task failed: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid socket path: {0}")]
    InvalidPath(String),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("invalid sink endpoint `{0}`")]
    Endpoint(String),
    #[error("failed to push logs: {0}")]
    Request(#[source] reqwest::Error),
    #[error("{status}: sink rejected push: {body}")]
    Status { status: StatusCode, body: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {0} does not exist")]
    MissingFile(PathBuf),
    #[error("failed to parse configuration: {0}")]
    Load(#[source] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level errors surfaced by [`crate::service::Lokean`].
#[derive(Debug, Error)]
pub enum LokeanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("source connection failed: {0}")]
    Source(#[from] SourceError),
    #[error("sink connection failed: {0}")]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("source failed while running: {0}")]
    SourceFailed(String),
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("task failed: {0}")]
    TaskFailed(String),
}
