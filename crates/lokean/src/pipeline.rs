// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline stage bridging the inbound channel of raw messages and the outbound channel of
//! normalized records.
//!
//! ```text
//!   Source ──[mpsc<RawMessage>]──> PipelineStage ──[mpsc<NormalizedLogRecord>]──> Sink
//!                                   (parse+route)
//! ```
//!
//! One stage runs exactly one task. Each loop iteration waits on cancellation, the inbound
//! channel and, once a record is parsed, on capacity in the outbound channel. Cancellation is
//! polled first, so a message that becomes ready at the same time as the cancel signal is never
//! processed and nothing is sent after cancellation is observed.
//!
//! The outbound send waits for capacity: while the sink is not accepting, the stage does not read
//! inbound, and the bounded inbound channel fills up towards the source. A closed inbound channel
//! is treated like cancellation. A closed outbound channel is fatal.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::errors::PipelineError;
use crate::message::RawMessage;
use crate::parser::RecordParser;
use crate::record::NormalizedLogRecord;

/// Lifecycle of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Why a stage stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token fired.
    Cancelled,
    /// The source closed the inbound channel.
    SourceClosed,
}

/// Totals reported when a stage stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub reason: StopReason,
    /// Records sent to the outbound channel.
    pub forwarded: u64,
    /// Messages dropped because they failed to parse.
    pub rejected: u64,
}

pub struct PipelineStage {
    name: String,
    parser: Arc<RecordParser>,
    state_tx: watch::Sender<PipelineState>,
}

impl PipelineStage {
    #[must_use]
    pub fn new(name: impl Into<String>, parser: Arc<RecordParser>) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Created);
        Self {
            name: name.into(),
            parser,
            state_tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state_tx.borrow()
    }

    /// Spawns the dispatch loop on `tracker`.
    ///
    /// The spawned task counts as outstanding work on the tracker until the stage stops, so a
    /// supervisor can `tracker.wait()` for a full drain. The outbound sender is dropped when the
    /// stage stops, which signals the sink to flush and exit.
    pub fn start(
        self,
        inbound: mpsc::Receiver<RawMessage>,
        outbound: mpsc::Sender<NormalizedLogRecord>,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> PipelineHandle {
        let state = self.state_tx.subscribe();
        let task = tracker.spawn(self.dispatch(inbound, outbound, cancel).in_current_span());
        PipelineHandle { task, state }
    }

    async fn dispatch(
        self,
        mut inbound: mpsc::Receiver<RawMessage>,
        outbound: mpsc::Sender<NormalizedLogRecord>,
        cancel: CancellationToken,
    ) -> Result<PipelineSummary, PipelineError> {
        self.state_tx.send_replace(PipelineState::Running);
        debug!(pipeline = %self.name, "Pipeline stage started");

        let mut forwarded = 0;
        let mut rejected = 0;

        let reason = loop {
            let raw = tokio::select! {
                biased;
                () = cancel.cancelled() => break StopReason::Cancelled,
                next = inbound.recv() => match next {
                    Some(raw) => raw,
                    None => break StopReason::SourceClosed,
                },
            };
            trace!(pipeline = %self.name, payload_size = raw.len(), "Received message");

            let record = match self.parser.parse(&raw) {
                Ok(record) => record,
                Err(failure) => {
                    rejected += 1;
                    error!(
                        pipeline = %self.name,
                        payload_size = failure.payload_size(),
                        field = failure.field().unwrap_or("-"),
                        "Wrong log format received: {failure}"
                    );
                    continue;
                }
            };

            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!(pipeline = %self.name, "Cancelled while waiting on the sink, dropping one parsed record");
                    break StopReason::Cancelled;
                }
                permit = outbound.reserve() => permit,
            };
            match permit {
                Ok(permit) => {
                    permit.send(record);
                    forwarded += 1;
                    debug!(pipeline = %self.name, "Log record forwarded");
                }
                Err(_) => {
                    error!(
                        pipeline = %self.name,
                        forwarded,
                        "Outbound channel closed unexpectedly, stopping pipeline"
                    );
                    self.begin_draining();
                    self.shut_inbound(&mut inbound);
                    return Err(PipelineError::SinkClosed { forwarded });
                }
            }
        };

        self.begin_draining();
        info!(
            pipeline = %self.name,
            ?reason,
            forwarded,
            rejected,
            "Pipeline stage stopped"
        );
        self.shut_inbound(&mut inbound);
        Ok(PipelineSummary {
            reason,
            forwarded,
            rejected,
        })
    }

    /// Publishes [`PipelineState::Draining`] once a stop reason is chosen. The stage holds this
    /// state only while it reports its totals and releases its channels, so observers waiting
    /// for completion should wait for [`PipelineState::Stopped`].
    fn begin_draining(&self) {
        self.state_tx.send_replace(PipelineState::Draining);
        debug!(pipeline = %self.name, "Pipeline stage draining");
    }

    /// Closes the inbound channel so the source observes the stop, then marks the stage stopped.
    /// Messages still buffered in the channel are not processed.
    fn shut_inbound(&self, inbound: &mut mpsc::Receiver<RawMessage>) {
        inbound.close();
        self.state_tx.send_replace(PipelineState::Stopped);
    }
}

/// Handle to a running stage.
pub struct PipelineHandle {
    task: JoinHandle<Result<PipelineSummary, PipelineError>>,
    state: watch::Receiver<PipelineState>,
}

impl PipelineHandle {
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Resolves once the stage reached [`PipelineState::Stopped`] (or its task went away).
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // Err means the stage was dropped, which also means it is no longer running.
        let _ = state.wait_for(|s| *s == PipelineState::Stopped).await;
    }

    /// Waits for the dispatch task and returns its outcome.
    ///
    /// # Errors
    ///
    /// [`PipelineError::SinkClosed`] if the outbound channel broke, [`PipelineError::Aborted`] if
    /// the task panicked or was aborted.
    pub async fn join(self) -> Result<PipelineSummary, PipelineError> {
        self.task
            .await
            .map_err(|e| PipelineError::Aborted(e.to_string()))?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::parser::Schema;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    const WAIT: Duration = Duration::from_secs(2);

    fn valid(source: &str) -> RawMessage {
        RawMessage::tagged(
            ["rsyslog"],
            format!(
                r#"{{"source": "{source}", "level": "error", "timestamp": 1588281700000, "message": "hi"}}"#
            ),
        )
    }

    fn stage() -> PipelineStage {
        let parser = RecordParser::new(Schema::Simple, None, None).expect("parser");
        PipelineStage::new("test", Arc::new(parser))
    }

    struct Harness {
        inbound: mpsc::Sender<RawMessage>,
        outbound: mpsc::Receiver<NormalizedLogRecord>,
        cancel: CancellationToken,
        tracker: TaskTracker,
        handle: PipelineHandle,
    }

    fn start(inbound_capacity: usize, outbound_capacity: usize) -> Harness {
        let (inbound, inbound_rx) = mpsc::channel(inbound_capacity);
        let (outbound_tx, outbound) = mpsc::channel(outbound_capacity);
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let handle = stage().start(inbound_rx, outbound_tx, cancel.clone(), &tracker);
        tracker.close();
        Harness {
            inbound,
            outbound,
            cancel,
            tracker,
            handle,
        }
    }

    async fn recv(outbound: &mut mpsc::Receiver<NormalizedLogRecord>) -> NormalizedLogRecord {
        timeout(WAIT, outbound.recv())
            .await
            .expect("timed out waiting for a record")
            .expect("outbound closed")
    }

    #[tokio::test]
    async fn test_send_one_log() {
        let mut h = start(1, 1);

        h.inbound.send(valid("abc")).await.unwrap();
        let record = recv(&mut h.outbound).await;

        assert_eq!(record.labels.len(), 1);
        assert_eq!(record.labels["source"], "abc");
        assert_eq!(record.message, "[error] hi");
        assert_eq!(record.timestamp_millis(), 1_588_281_700_000);

        h.cancel.cancel();
        let summary = h.handle.join().await.unwrap();
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.forwarded, 1);
        assert_eq!(summary.rejected, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_message_does_not_stall() {
        let mut h = start(4, 4);

        h.inbound.send(RawMessage::from("{not json")).await.unwrap();
        h.inbound
            .send(RawMessage::from(
                r#"{"source":"abc","level":9,"timestamp":1,"message":"hi"}"#,
            ))
            .await
            .unwrap();
        h.inbound.send(valid("after")).await.unwrap();

        let record = recv(&mut h.outbound).await;
        assert_eq!(record.labels["source"], "after");

        drop(h.inbound);
        let summary = h.handle.join().await.unwrap();
        assert_eq!(summary.forwarded, 1);
        assert_eq!(summary.rejected, 2);
        assert!(logs_contain("Wrong log format received"));
        assert!(logs_contain("unknown severity number 9"));
        assert!(h.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let mut h = start(8, 8);

        let sources: Vec<String> = (0..50).map(|i| format!("source-{i}")).collect();
        let producer = {
            let inbound = h.inbound.clone();
            let sources = sources.clone();
            tokio::spawn(async move {
                for source in sources {
                    inbound.send(valid(&source)).await.unwrap();
                }
            })
        };

        for source in &sources {
            let record = recv(&mut h.outbound).await;
            assert_eq!(&record.labels["source"], source);
        }
        producer.await.unwrap();

        h.cancel.cancel();
        assert_eq!(h.handle.join().await.unwrap().forwarded, 50);
    }

    #[tokio::test]
    async fn test_three_distinct_sources_in_order() {
        let mut h = start(3, 3);
        for source in ["a", "b", "c"] {
            h.inbound.send(valid(source)).await.unwrap();
        }
        for source in ["a", "b", "c"] {
            assert_eq!(recv(&mut h.outbound).await.labels["source"], source);
        }
        h.cancel.cancel();
        h.handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_ready_message() {
        let (inbound, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, mut outbound) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        // both the message and the cancellation are ready before the loop first polls
        inbound.send(valid("late")).await.unwrap();
        cancel.cancel();

        let handle = stage().start(inbound_rx, outbound_tx, cancel, &tracker);
        let summary = timeout(WAIT, handle.join()).await.unwrap().unwrap();

        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.forwarded, 0);
        assert!(outbound.recv().await.is_none());
        assert!(inbound.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_while_sink_is_full() {
        let mut h = start(4, 1);

        h.inbound.send(valid("first")).await.unwrap();
        h.inbound.send(valid("blocked")).await.unwrap();
        // let the stage fill the outbound slot and block on the second record
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.handle.state(), PipelineState::Running);

        h.cancel.cancel();
        let summary = timeout(WAIT, h.handle.join()).await.unwrap().unwrap();
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.forwarded, 1);

        assert_eq!(recv(&mut h.outbound).await.labels["source"], "first");
        assert!(h.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_backpressure_stops_inbound_consumption() {
        let mut h = start(4, 1);

        for i in 0..4 {
            h.inbound.send(valid(&format!("m{i}"))).await.unwrap();
        }
        sleep(Duration::from_millis(100)).await;

        // m0 sits in the outbound slot, m1 is parsed and waiting for capacity,
        // m2 and m3 are still queued
        assert_eq!(h.inbound.capacity(), 2);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(h.inbound.capacity(), 2);

        for i in 0..4 {
            assert_eq!(recv(&mut h.outbound).await.labels["source"], format!("m{i}"));
        }
        h.cancel.cancel();
        assert_eq!(h.handle.join().await.unwrap().forwarded, 4);
    }

    #[tokio::test]
    async fn test_source_closed_stops_stage() {
        let h = start(1, 1);
        let mut state = h.handle.subscribe();

        drop(h.inbound);
        timeout(WAIT, state.wait_for(|s| *s == PipelineState::Stopped))
            .await
            .unwrap()
            .unwrap();

        let summary = h.handle.join().await.unwrap();
        assert_eq!(summary.reason, StopReason::SourceClosed);
        assert!(!h.cancel.is_cancelled());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_closed_outbound_is_fatal() {
        let h = start(2, 1);
        drop(h.outbound);

        h.inbound.send(valid("nowhere")).await.unwrap();
        let err = timeout(WAIT, h.handle.join()).await.unwrap().unwrap_err();

        assert!(matches!(err, PipelineError::SinkClosed { forwarded: 0 }));
        assert!(logs_contain("Outbound channel closed unexpectedly"));
        assert!(h.inbound.is_closed());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_draining_is_published_before_stopped() {
        let h = start(1, 1);
        h.cancel.cancel();
        h.handle.join().await.unwrap();

        logs_assert(|lines: &[&str]| {
            let position = |needle: &str| {
                lines
                    .iter()
                    .position(|line| line.contains(needle))
                    .ok_or_else(|| format!("no log line containing {needle:?}"))
            };
            let draining = position("Pipeline stage draining")?;
            let stopped = position("Pipeline stage stopped")?;
            if draining < stopped {
                Ok(())
            } else {
                Err(format!("draining logged at {draining}, after stopped at {stopped}"))
            }
        });
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let stage = stage();
        assert_eq!(stage.state(), PipelineState::Created);

        let (inbound, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, _outbound) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let handle = stage.start(inbound_rx, outbound_tx, cancel.clone(), &tracker);

        let mut state = handle.subscribe();
        timeout(WAIT, state.wait_for(|s| *s == PipelineState::Running))
            .await
            .unwrap()
            .unwrap();

        cancel.cancel();
        timeout(WAIT, handle.stopped()).await.unwrap();
        assert_eq!(handle.state(), PipelineState::Stopped);
        assert!(inbound.is_closed());
    }

    #[tokio::test]
    async fn test_tracker_waits_for_stage() {
        let h = start(1, 1);
        assert_eq!(h.tracker.len(), 1);

        h.cancel.cancel();
        timeout(WAIT, h.tracker.wait()).await.unwrap();
        assert!(h.tracker.is_empty());
        assert_eq!(h.handle.state(), PipelineState::Stopped);
    }
}
