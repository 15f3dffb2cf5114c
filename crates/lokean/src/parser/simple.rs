// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flat `{source, level, timestamp, message}` payloads.

use super::{Extracted, Fields};
use crate::errors::ParseFailure;

pub(crate) const LABEL_CANDIDATES: &[&str] = &["source", "level"];
pub(crate) const DEFAULT_LABELS: &[&str] = &["source"];

pub(crate) fn extract(fields: &Fields<'_>) -> Result<Extracted, ParseFailure> {
    let source = fields.required_str("source")?;
    let level = fields.level("level")?;
    let message = fields.required_str("message")?;
    let timestamp = fields.timestamp("timestamp")?;

    Ok(Extracted {
        candidates: vec![("source", source.to_string()), ("level", level.to_string())],
        message: format!("[{level}] {message}"),
        timestamp,
    })
}
