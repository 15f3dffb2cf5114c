// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Normalizes syslog-style JSON payloads into labelled log records and ships them to Loki.

pub mod config;
pub mod errors;
pub mod logger;
pub mod message;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod service;
pub mod severity;
pub mod sinks;
pub mod sources;

pub use service::{Lokean, RunSummary};
