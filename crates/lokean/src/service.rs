// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Supervisor wiring a source, one pipeline stage and the Loki sink together.
//!
//! ```text
//!  ┌────────┐ inbound ┌──────────┐ outbound ┌─────────────┐  HTTP  ┌──────┐
//!  │ Source │────────>│ Pipeline │─────────>│ SinkService │───────>│ Loki │
//!  └────────┘         └──────────┘          └─────────────┘        └──────┘
//!      ^ source_cancel     ^ pipeline_cancel
//! ```
//!
//! Shutdown cancels the source only. The source drops the inbound sender, the pipeline drains
//! what is buffered and stops, dropping the outbound sender, and the sink flushes the remainder.
//! If the pipeline has not stopped within the grace period it is cancelled directly.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::LokeanError;
use crate::message::RawMessage;
use crate::parser::{RecordParser, FORMAT_VERSION};
use crate::pipeline::{PipelineStage, PipelineSummary};
use crate::sinks::{BatchPolicy, LokiClient, SinkService, SinkSummary};
use crate::sources::{Source, SourceStatus};

/// Totals of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub pipeline: PipelineSummary,
    pub sink: SinkSummary,
}

/// A started agent: the source is bound and the sink client built, nothing runs yet.
pub struct Lokean {
    config: Config,
    parser: Arc<RecordParser>,
    sink: LokiClient,
    source: Source,
    source_cancel: CancellationToken,
    inbound_rx: mpsc::Receiver<RawMessage>,
}

impl Lokean {
    /// Builds the parser and the sink client and binds the source.
    ///
    /// # Errors
    ///
    /// [`LokeanError::Config`] for an unusable schema or label set, [`LokeanError::Sink`] for a
    /// bad Loki endpoint and [`LokeanError::Source`] if the source cannot be bound.
    pub async fn start(config: Config) -> Result<Self, LokeanError> {
        let parser = RecordParser::new(
            config.schema,
            config.labels.clone(),
            config.routing_tag.clone(),
        )?;
        let sink = LokiClient::new(&config.loki.connection, config.loki_timeout())?;

        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let source_cancel = CancellationToken::new();
        let source = Source::bind(&config, inbound_tx, source_cancel.clone()).await?;

        info!(
            transport = ?config.transport,
            schema = %parser.schema(),
            labels = ?parser.labels(),
            loki = %sink.push_url(),
            "Lokean started, message layout {FORMAT_VERSION}"
        );
        Ok(Lokean {
            config,
            parser: Arc::new(parser),
            sink,
            source,
            source_cancel,
            inbound_rx,
        })
    }

    /// Local address of a UDP source.
    #[must_use]
    pub fn source_addr(&self) -> Option<SocketAddr> {
        self.source.local_addr()
    }

    /// Runs until `shutdown` fires or the pipeline stops on its own, then drains.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's error, [`LokeanError::SourceFailed`] if the source failed,
    /// or [`LokeanError::ShutdownTimeout`] if tasks are still running after the grace period.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunSummary, LokeanError> {
        let grace = self.config.shutdown_grace();
        let policy = BatchPolicy {
            batch_size: self.config.loki.batch_size,
            max_wait: self.config.max_wait(),
        };

        let tracker = TaskTracker::new();
        let pipeline_cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.channel_capacity);

        let sink_task = tracker.spawn(SinkService::new(self.sink, outbound_rx, policy).run());
        let source_status = self.source.status();
        tracker.spawn(self.source.spin());
        let pipeline = PipelineStage::new("main", self.parser).start(
            self.inbound_rx,
            outbound_tx,
            pipeline_cancel.clone(),
            &tracker,
        );
        tracker.close();

        tokio::select! {
            () = shutdown.cancelled() => info!("Shutdown requested, draining"),
            () = pipeline.stopped() => warn!("Pipeline stopped without a shutdown request"),
        }
        self.source_cancel.cancel();

        if timeout(grace, pipeline.stopped()).await.is_err() {
            warn!("Pipeline did not drain within {:?}, cancelling it", grace);
            pipeline_cancel.cancel();
        }
        let pipeline_result = pipeline.join().await;

        if timeout(grace, tracker.wait()).await.is_err() {
            return Err(LokeanError::ShutdownTimeout(grace));
        }
        let sink = sink_task
            .await
            .map_err(|e| LokeanError::TaskFailed(e.to_string()))?;
        let pipeline = pipeline_result?;
        debug!(?pipeline, ?sink, "All tasks stopped");

        let status = source_status.borrow().clone();
        if let SourceStatus::Failed(reason) = status {
            return Err(LokeanError::SourceFailed(reason));
        }

        info!(
            forwarded = pipeline.forwarded,
            rejected = pipeline.rejected,
            flushed = sink.flushed,
            dropped = sink.dropped,
            "Lokean stopped"
        );
        Ok(RunSummary { pipeline, sink })
    }
}
