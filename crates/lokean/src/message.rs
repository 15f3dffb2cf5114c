// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;

/// An unparsed payload as delivered by a source.
///
/// The origin is decided once, where the source builds the message, so the pipeline never has
/// to inspect the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    /// Payload from a transport that carries routing tags alongside the body.
    Tagged { tags: Vec<String>, body: Bytes },
    /// Payload from an untagged transport such as a local socket.
    Plain(Bytes),
}

impl RawMessage {
    #[must_use]
    pub fn tagged<I, S>(tags: I, body: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawMessage::Tagged {
            tags: tags.into_iter().map(Into::into).collect(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        match self {
            RawMessage::Tagged { body, .. } | RawMessage::Plain(body) => body,
        }
    }

    /// Routing tags; empty for untagged origins.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        match self {
            RawMessage::Tagged { tags, .. } => tags,
            RawMessage::Plain(_) => &[],
        }
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t == tag)
    }

    /// Size of the body in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body().is_empty()
    }
}

impl From<String> for RawMessage {
    fn from(body: String) -> Self {
        RawMessage::Plain(Bytes::from(body))
    }
}

impl From<&str> for RawMessage {
    fn from(body: &str) -> Self {
        RawMessage::Plain(Bytes::copy_from_slice(body.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message_has_no_tags() {
        let msg = RawMessage::from("{}");
        assert!(msg.tags().is_empty());
        assert!(!msg.has_tag("rsyslog"));
        assert_eq!(msg.len(), 2);
    }

    #[test]
    fn test_tagged_message() {
        let msg = RawMessage::tagged(["rsyslog", "audit"], "{\"a\":1}");
        assert!(msg.has_tag("rsyslog"));
        assert!(msg.has_tag("audit"));
        assert!(!msg.has_tag("collectd"));
        assert_eq!(msg.body(), b"{\"a\":1}");
    }
}
