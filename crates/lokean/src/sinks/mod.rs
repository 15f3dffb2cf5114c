// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sinks consume normalized records from the pipeline's outbound channel.
//!
//! [`SinkService`] owns the receiving half of the outbound channel and groups records into
//! batches before handing them to a [`LogSink`]. A batch is flushed when it reaches
//! `batch_size`, when `max_wait` has elapsed since its first record arrived, or when the
//! channel closes. Failed pushes are logged and the batch is dropped.

pub mod loki;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::errors::SinkError;
use crate::record::NormalizedLogRecord;

pub use loki::LokiClient;

#[async_trait]
pub trait LogSink: Send + Sync {
    /// Delivers one batch. The batch is non-empty and ordered as received.
    async fn push(&self, batch: &[NormalizedLogRecord]) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// Counts reported once the outbound channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub flushed: u64,
    pub dropped: u64,
}

pub struct SinkService<S> {
    sink: S,
    rx: Receiver<NormalizedLogRecord>,
    policy: BatchPolicy,
    summary: SinkSummary,
}

impl<S: LogSink> SinkService<S> {
    pub fn new(sink: S, rx: Receiver<NormalizedLogRecord>, policy: BatchPolicy) -> Self {
        SinkService {
            sink,
            rx,
            policy: BatchPolicy {
                batch_size: policy.batch_size.max(1),
                max_wait: policy.max_wait,
            },
            summary: SinkSummary::default(),
        }
    }

    /// Runs until the outbound channel is closed and every buffered record has been pushed.
    pub async fn run(mut self) -> SinkSummary {
        let mut batch = Vec::with_capacity(self.policy.batch_size);
        let mut deadline: Option<Instant> = None;

        loop {
            let received = match deadline {
                Some(at) => tokio::select! {
                    biased;
                    () = sleep_until(at) => {
                        self.flush(&mut batch).await;
                        deadline = None;
                        continue;
                    }
                    received = self.rx.recv() => received,
                },
                None => self.rx.recv().await,
            };

            let Some(record) = received else {
                self.flush(&mut batch).await;
                break;
            };
            if batch.is_empty() {
                deadline = Some(Instant::now() + self.policy.max_wait);
            }
            batch.push(record);
            if batch.len() >= self.policy.batch_size {
                self.flush(&mut batch).await;
                deadline = None;
            }
        }

        info!(
            flushed = self.summary.flushed,
            dropped = self.summary.dropped,
            "Sink stopped"
        );
        self.summary
    }

    async fn flush(&mut self, batch: &mut Vec<NormalizedLogRecord>) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len() as u64;
        match self.sink.push(batch).await {
            Ok(()) => {
                debug!("Pushed {} records", count);
                self.summary.flushed += count;
            }
            Err(e) => {
                error!("Failed to push {} records, dropping batch: {}", count, e);
                self.summary.dropped += count;
            }
        }
        batch.clear();
    }
}
