// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sources that receive raw payloads and feed the pipeline's inbound channel.
//!
//! A source owns the sending half of the inbound channel. It stops, dropping the sender and
//! thereby closing the channel, when its cancellation token fires, when the pipeline closes the
//! channel, or when the transport fails. Progress is published on a status watch.

pub mod socket;
pub mod udp;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::Config;
use crate::errors::SourceError;
use crate::message::RawMessage;

/// Receive buffer size. rsyslog JSON payloads regularly exceed the classic 8 KiB datagram.
pub const BUFFER_SIZE: usize = 65_536;

/// Inbound transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Unix datagram socket.
    #[default]
    Socket,
    /// UDP socket; datagrams are tagged with the configured routing tags.
    Udp,
}

/// Liveness of a source as observed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Starting,
    Listening,
    Stopped,
    Failed(String),
}

// DatagramReader abstracts the transports a source can read from.
enum DatagramReader {
    Unix {
        socket: tokio::net::UnixDatagram,
        path: PathBuf,
    },
    Udp {
        socket: tokio::net::UdpSocket,
        tags: Vec<String>,
    },
    /// Replays a fixed list of messages, then reports the transport as closed.
    #[cfg(test)]
    Mirror(std::sync::Mutex<std::collections::VecDeque<RawMessage>>),
}

impl DatagramReader {
    async fn read(&self, buf: &mut [u8]) -> io::Result<RawMessage> {
        match self {
            DatagramReader::Unix { socket, .. } => {
                let amt = socket.recv(buf).await?;
                Ok(RawMessage::Plain(Bytes::copy_from_slice(&buf[..amt])))
            }
            DatagramReader::Udp { socket, tags } => {
                let (amt, src) = socket.recv_from(buf).await?;
                trace!("Received {} bytes from {}", amt, src);
                Ok(RawMessage::Tagged {
                    tags: tags.clone(),
                    body: Bytes::copy_from_slice(&buf[..amt]),
                })
            }
            #[cfg(test)]
            DatagramReader::Mirror(queue) => {
                let next = queue.lock().map_err(|_| io::Error::other("poisoned"))?.pop_front();
                match next {
                    Some(message) => Ok(message),
                    None => Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "mirror exhausted",
                    )),
                }
            }
        }
    }
}

/// A bound source, ready to [`spin`](Source::spin).
pub struct Source {
    reader: DatagramReader,
    tx: mpsc::Sender<RawMessage>,
    cancel_token: CancellationToken,
    status: watch::Sender<SourceStatus>,
}

impl Source {
    /// Binds the transport selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the address is invalid or cannot be bound.
    pub async fn bind(
        config: &Config,
        tx: mpsc::Sender<RawMessage>,
        cancel_token: CancellationToken,
    ) -> Result<Self, SourceError> {
        let reader = match config.transport {
            Transport::Socket => {
                let path = PathBuf::from(&config.socket.in_address);
                let socket = socket::bind(&path)?;
                DatagramReader::Unix { socket, path }
            }
            Transport::Udp => {
                let socket = udp::bind(config.udp.listen_address).await?;
                DatagramReader::Udp {
                    socket,
                    tags: config.udp.tags.clone(),
                }
            }
        };
        Ok(Self::new(reader, tx, cancel_token))
    }

    fn new(
        reader: DatagramReader,
        tx: mpsc::Sender<RawMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(SourceStatus::Starting);
        Self {
            reader,
            tx,
            cancel_token,
            status,
        }
    }

    #[must_use]
    pub fn status(&self) -> watch::Receiver<SourceStatus> {
        self.status.subscribe()
    }

    /// Address of a UDP source, useful when bound to port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.reader {
            DatagramReader::Udp { socket, .. } => socket.local_addr().ok(),
            _ => None,
        }
    }

    /// Receives datagrams and forwards them until cancelled, closed, or failed.
    pub async fn spin(self) {
        self.status.send_replace(SourceStatus::Listening);
        info!("Source listening");

        let mut buf = vec![0u8; BUFFER_SIZE];
        let outcome = loop {
            let read = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break SourceStatus::Stopped,
                read = self.reader.read(&mut buf) => read,
            };
            let message = match read {
                Ok(message) if message.is_empty() => continue,
                Ok(message) => message,
                Err(e) => {
                    error!("Failed to receive from source: {}", e);
                    break SourceStatus::Failed(e.to_string());
                }
            };

            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break SourceStatus::Stopped,
                sent = self.tx.send(message) => {
                    if sent.is_err() {
                        debug!("Inbound channel closed, stopping source");
                        break SourceStatus::Stopped;
                    }
                }
            }
        };

        if let DatagramReader::Unix { path, .. } = &self.reader {
            socket::cleanup(path);
        }
        debug!("Source stopped: {:?}", outcome);
        self.status.send_replace(outcome);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    fn mirror(messages: Vec<RawMessage>) -> DatagramReader {
        DatagramReader::Mirror(Mutex::new(VecDeque::from(messages)))
    }

    #[tokio::test]
    async fn test_source_forwards_then_reports_failure() {
        let (tx, mut rx) = mpsc::channel(4);
        let source = Source::new(
            mirror(vec![RawMessage::from("a"), RawMessage::from(""), RawMessage::from("b")]),
            tx,
            CancellationToken::new(),
        );
        let mut status = source.status();
        assert_eq!(*status.borrow(), SourceStatus::Starting);

        source.spin().await;

        assert_eq!(rx.recv().await.unwrap(), RawMessage::from("a"));
        // empty datagrams are skipped
        assert_eq!(rx.recv().await.unwrap(), RawMessage::from("b"));
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            *status.borrow_and_update(),
            SourceStatus::Failed(ref reason) if reason == "mirror exhausted"
        ));
    }

    #[tokio::test]
    async fn test_cancelled_source_closes_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let source = Source::new(mirror(vec![RawMessage::from("a")]), tx, cancel.clone());
        cancel.cancel();

        let status = source.status();
        source.spin().await;

        assert!(rx.recv().await.is_none());
        assert_eq!(*status.borrow(), SourceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_source_stops_when_pipeline_closes_inbound() {
        let (tx, mut rx) = mpsc::channel(1);
        rx.close();
        let source = Source::new(
            mirror(vec![RawMessage::from("a"), RawMessage::from("b")]),
            tx,
            CancellationToken::new(),
        );
        let status = source.status();

        timeout(Duration::from_secs(1), source.spin()).await.unwrap();
        assert_eq!(*status.borrow(), SourceStatus::Stopped);
    }
}
