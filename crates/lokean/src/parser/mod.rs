// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of raw payloads into [`NormalizedLogRecord`]s.
//!
//! Parsing is a pure function of the configured schema and the message: no I/O, no shared
//! state. Two payload schemas are understood, each with a versioned output layout:
//!
//! | schema    | rendered message (v1)                                   | default labels           |
//! |-----------|---------------------------------------------------------|--------------------------|
//! | `simple`  | `[{level}] {message}`                                   | `source`                 |
//! | `rsyslog` | `[{Severity}] {$!._HOSTNAME}({fromhost-ip}) {syslogtag} {msg}` | `hostname`, `programname` |
//!
//! Labels are copied from a fixed set of upstream fields chosen by configuration. A label whose
//! upstream value is absent or empty is left out of the record.

pub mod rsyslog;
pub mod simple;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{ConfigError, ParseFailure};
use crate::message::RawMessage;
use crate::record::NormalizedLogRecord;
use crate::severity::Severity;

/// Version of the rendered message layouts.
pub const FORMAT_VERSION: &str = "v1";

/// Payload schema expected on the inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Flat `{source, level, timestamp, message}` objects.
    Simple,
    /// rsyslog JSON template output.
    #[default]
    Rsyslog,
}

impl Schema {
    /// Upstream fields this schema can copy into labels.
    #[must_use]
    pub fn label_candidates(self) -> &'static [&'static str] {
        match self {
            Schema::Simple => simple::LABEL_CANDIDATES,
            Schema::Rsyslog => rsyslog::LABEL_CANDIDATES,
        }
    }

    #[must_use]
    pub fn default_labels(self) -> &'static [&'static str] {
        match self {
            Schema::Simple => simple::DEFAULT_LABELS,
            Schema::Rsyslog => rsyslog::DEFAULT_LABELS,
        }
    }

    /// Checks that every requested label is offered by this schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first unknown label.
    pub fn validate_labels(self, labels: &[String]) -> Result<(), ConfigError> {
        let candidates = self.label_candidates();
        match labels
            .iter()
            .find(|label| !candidates.contains(&label.as_str()))
        {
            Some(unknown) => Err(ConfigError::Invalid(format!(
                "label `{unknown}` is not available for schema `{self}`, expected one of: {}",
                candidates.join(", ")
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Simple => f.write_str("simple"),
            Schema::Rsyslog => f.write_str("rsyslog"),
        }
    }
}

/// Schema-specific parse result before label selection.
#[derive(Debug)]
pub(crate) struct Extracted {
    pub(crate) candidates: Vec<(&'static str, String)>,
    pub(crate) message: String,
    pub(crate) timestamp: DateTime<Utc>,
}

/// Stateless parser, safe to share between pipeline instances.
#[derive(Debug, Clone)]
pub struct RecordParser {
    schema: Schema,
    labels: Vec<String>,
    routing_tag: Option<String>,
}

impl RecordParser {
    /// Builds a parser for `schema`. `labels` defaults to the schema's default label set.
    ///
    /// # Errors
    ///
    /// Fails if a requested label is not offered by the schema.
    pub fn new(
        schema: Schema,
        labels: Option<Vec<String>>,
        routing_tag: Option<String>,
    ) -> Result<Self, ConfigError> {
        let labels = match labels {
            Some(labels) => {
                schema.validate_labels(&labels)?;
                labels
            }
            None => schema
                .default_labels()
                .iter()
                .map(ToString::to_string)
                .collect(),
        };
        Ok(Self {
            schema,
            labels,
            routing_tag,
        })
    }

    #[must_use]
    pub fn schema(&self) -> Schema {
        self.schema
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Turns one raw message into a record.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseFailure`] describing the offending field for any payload that does not
    /// match the schema. Never panics on malformed input.
    pub fn parse(&self, raw: &RawMessage) -> Result<NormalizedLogRecord, ParseFailure> {
        let payload_size = raw.len();

        if let (Some(tag), RawMessage::Tagged { tags, .. }) = (&self.routing_tag, raw) {
            if !raw.has_tag(tag) {
                return Err(ParseFailure::Unroutable {
                    tags: tags.clone(),
                    payload_size,
                });
            }
        }

        let object = decode_object(raw.body())?;
        let fields = Fields {
            object: &object,
            payload_size,
        };
        let extracted = match self.schema {
            Schema::Simple => simple::extract(&fields)?,
            Schema::Rsyslog => rsyslog::extract(&fields)?,
        };

        let mut labels = BTreeMap::new();
        for label in &self.labels {
            if let Some((_, value)) = extracted
                .candidates
                .iter()
                .find(|(name, value)| *name == label.as_str() && !value.is_empty())
            {
                labels.insert(label.clone(), value.clone());
            }
        }

        Ok(NormalizedLogRecord::new(
            labels,
            extracted.message,
            extracted.timestamp,
        ))
    }
}

fn decode_object(body: &[u8]) -> Result<Map<String, Value>, ParseFailure> {
    let payload_size = body.len();
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(ParseFailure::Malformed {
            payload_size,
            reason: format!("expected an object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(ParseFailure::Malformed {
            payload_size,
            reason: e.to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed accessors over a decoded payload that produce field-specific failures.
pub(crate) struct Fields<'a> {
    object: &'a Map<String, Value>,
    payload_size: usize,
}

impl<'a> Fields<'a> {
    fn invalid(&self, field: &'static str, reason: String) -> ParseFailure {
        ParseFailure::InvalidField {
            field,
            payload_size: self.payload_size,
            reason,
        }
    }

    fn required(&self, field: &'static str) -> Result<&'a Value, ParseFailure> {
        match self.object.get(field) {
            Some(Value::Null) | None => Err(ParseFailure::MissingField {
                field,
                payload_size: self.payload_size,
            }),
            Some(value) => Ok(value),
        }
    }

    pub(crate) fn required_str(&self, field: &'static str) -> Result<&'a str, ParseFailure> {
        match self.required(field)? {
            Value::String(s) => Ok(s.as_str()),
            other => Err(self.invalid(
                field,
                format!("expected a string, got {}", json_kind(other)),
            )),
        }
    }

    /// Absent, null and non-string values all read as an empty string.
    pub(crate) fn optional_str(&self, field: &'static str) -> &'a str {
        self.object
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// A nested object, or `None` if absent or not an object.
    pub(crate) fn nested(&self, field: &'static str) -> Option<Fields<'a>> {
        self.object
            .get(field)
            .and_then(Value::as_object)
            .map(|object| Fields {
                object,
                payload_size: self.payload_size,
            })
    }

    /// Numeric severity given either as an integer or a decimal string.
    pub(crate) fn severity(&self, field: &'static str) -> Result<Severity, ParseFailure> {
        let code = match self.required(field)? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| self.invalid(field, format!("`{n}` is not an integer")))?,
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| self.invalid(field, format!("failed to parse `{s}`: {e}")))?,
            other => {
                return Err(self.invalid(
                    field,
                    format!("expected an integer, got {}", json_kind(other)),
                ))
            }
        };
        Severity::from_code(code).ok_or(ParseFailure::SeverityOutOfRange {
            field,
            code,
            payload_size: self.payload_size,
        })
    }

    /// Integer epoch milliseconds (UTC) or an RFC 3339 date-time.
    pub(crate) fn timestamp(&self, field: &'static str) -> Result<DateTime<Utc>, ParseFailure> {
        match self.required(field)? {
            Value::Number(n) => {
                let millis = n
                    .as_i64()
                    .ok_or_else(|| self.invalid(field, format!("`{n}` is not an integer")))?;
                Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                    self.invalid(field, format!("{millis} ms is out of range"))
                })
            }
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| self.invalid(field, format!("failed to parse `{s}`: {e}"))),
            other => Err(self.invalid(
                field,
                format!("expected epoch milliseconds or RFC 3339, got {}", json_kind(other)),
            )),
        }
    }

    /// A level given as a word, or as a numeric severity code.
    pub(crate) fn level(&self, field: &'static str) -> Result<&'a str, ParseFailure> {
        match self.required(field)? {
            Value::String(s) => Ok(s.as_str()),
            Value::Number(_) => self.severity(field).map(Severity::as_lowercase),
            other => Err(self.invalid(
                field,
                format!("expected a string or an integer, got {}", json_kind(other)),
            )),
        }
    }
}
