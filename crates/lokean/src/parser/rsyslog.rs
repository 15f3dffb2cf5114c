// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payloads produced by rsyslog's JSON templates (`omamqp1`, `omfwd` with `template(json)`).
//!
//! Required: `msg`, `syslogseverity`, `timereported`. Everything else is optional and renders as
//! an empty string when missing. Journald metadata arrives under the `$!` object.

use super::{Extracted, Fields};
use crate::errors::ParseFailure;

pub(crate) const LABEL_CANDIDATES: &[&str] = &[
    "hostname",
    "programname",
    "severity",
    "fromhost",
    "syslogfacility",
    "appname",
];
pub(crate) const DEFAULT_LABELS: &[&str] = &["hostname", "programname"];

const JOURNAL_FIELDS: &str = "$!";

pub(crate) fn extract(fields: &Fields<'_>) -> Result<Extracted, ParseFailure> {
    let msg = fields.required_str("msg")?;
    let severity = fields.severity("syslogseverity")?;
    let timestamp = fields.timestamp("timereported")?;

    let journal_host = fields
        .nested(JOURNAL_FIELDS)
        .map(|journal| journal.optional_str("_HOSTNAME"))
        .unwrap_or_default();
    let fromhost_ip = fields.optional_str("fromhost-ip");
    let syslogtag = fields.optional_str("syslogtag");

    let candidates = vec![
        ("hostname", fields.optional_str("hostname").to_string()),
        ("programname", fields.optional_str("programname").to_string()),
        ("severity", severity.as_lowercase().to_string()),
        ("fromhost", fields.optional_str("fromhost").to_string()),
        (
            "syslogfacility",
            fields.optional_str("syslogfacility").to_string(),
        ),
        ("appname", fields.optional_str("app-name").to_string()),
    ];

    Ok(Extracted {
        candidates,
        message: format!("[{severity}] {journal_host}({fromhost_ip}) {syslogtag} {msg}"),
        timestamp,
    })
}
