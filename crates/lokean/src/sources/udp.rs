// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP transport. Every datagram is tagged with the configured routing tags.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::errors::SourceError;

pub(crate) async fn bind(addr: SocketAddr) -> Result<UdpSocket, SourceError> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| SourceError::Bind {
            address: addr.to_string(),
            source,
        })?;
    debug!("Bound UDP socket {}", addr);
    Ok(socket)
}
