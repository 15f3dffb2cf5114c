// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loki push API client.
//!
//! Batches are sent as JSON to `{connection}/loki/api/v1/push`. Records sharing a label set are
//! grouped into one stream, streams ordered by first appearance in the batch and values kept in
//! arrival order:
//!
//! ```json
//! {"streams": [{"stream": {"hostname": "node-0"}, "values": [["1588329700215831000", "line"]]}]}
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use super::LogSink;
use crate::errors::SinkError;
use crate::record::NormalizedLogRecord;

pub const PUSH_PATH: &str = "/loki/api/v1/push";

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    streams: Vec<Stream<'a>>,
}

#[derive(Debug, Serialize)]
struct Stream<'a> {
    stream: &'a BTreeMap<String, String>,
    values: Vec<[String; 2]>,
}

fn build_push_request(batch: &[NormalizedLogRecord]) -> PushRequest<'_> {
    let mut streams: Vec<Stream<'_>> = Vec::new();
    for record in batch {
        let value = [record.timestamp_nanos_string(), record.message.clone()];
        match streams.iter_mut().find(|s| *s.stream == record.labels) {
            Some(stream) => stream.values.push(value),
            None => streams.push(Stream {
                stream: &record.labels,
                values: vec![value],
            }),
        }
    }
    PushRequest { streams }
}

#[derive(Debug, Clone)]
pub struct LokiClient {
    client: reqwest::Client,
    push_url: Url,
}

impl LokiClient {
    /// Builds a client for the Loki instance at `connection`, e.g. `http://localhost:3100`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Endpoint`] if `connection` is not an http(s) URL, or
    /// [`SinkError::Client`] if the HTTP client cannot be built.
    pub fn new(connection: &str, timeout: Duration) -> Result<Self, SinkError> {
        let push_url = format!("{}{PUSH_PATH}", connection.trim_end_matches('/'));
        let push_url =
            Url::parse(&push_url).map_err(|_| SinkError::Endpoint(connection.to_string()))?;
        if !matches!(push_url.scheme(), "http" | "https") {
            return Err(SinkError::Endpoint(connection.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SinkError::Client)?;

        Ok(LokiClient { client, push_url })
    }

    #[must_use]
    pub fn push_url(&self) -> &Url {
        &self.push_url
    }
}

#[async_trait]
impl LogSink for LokiClient {
    async fn push(&self, batch: &[NormalizedLogRecord]) -> Result<(), SinkError> {
        let request = build_push_request(batch);
        let resp = self
            .client
            .post(self.push_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(SinkError::Request)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }
        debug!(
            "Loki accepted {} records in {} streams",
            batch.len(),
            request.streams.len()
        );
        Ok(())
    }
}
