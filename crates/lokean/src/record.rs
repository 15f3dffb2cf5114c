// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Canonical log entry handed to the sink.
///
/// `labels` is always present (possibly empty) and `message` is always valid UTF-8 since it is a
/// `String`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLogRecord {
    pub labels: BTreeMap<String, String>,
    pub message: String,
    /// When the event was generated or reported upstream.
    pub timestamp: DateTime<Utc>,
}

impl NormalizedLogRecord {
    #[must_use]
    pub fn new(
        labels: BTreeMap<String, String>,
        message: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            labels,
            message,
            timestamp,
        }
    }

    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Nanoseconds since the Unix epoch, rendered as a decimal string the way Loki expects it.
    #[must_use]
    pub fn timestamp_nanos_string(&self) -> String {
        let nanos = i128::from(self.timestamp.timestamp()) * 1_000_000_000
            + i128::from(self.timestamp.timestamp_subsec_nanos());
        nanos.to_string()
    }
}
