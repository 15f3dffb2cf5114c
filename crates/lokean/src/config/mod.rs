// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Settings are merged from an optional YAML file and `LOKEAN_`-prefixed environment variables,
//! the latter taking precedence. Nested keys are separated by `__` in variable names:
//!
//! ```text
//! LOKEAN_LOG_LEVEL=debug
//! LOKEAN_LOKI__CONNECTION=http://loki:3100
//! LOKEAN_UDP__TAGS=[rsyslog,audit]
//! ```
//!
//! Unknown keys are rejected. After extraction [`Config::validate`] checks the values that
//! serde cannot.

pub mod log_level;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use reqwest::Url;
use serde::Deserialize;

use crate::errors::ConfigError;
use crate::parser::Schema;
use crate::sources::Transport;
use log_level::LogLevel;

pub const ENV_PREFIX: &str = "LOKEAN_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketConfig {
    pub in_address: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            in_address: "/tmp/lokean".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpConfig {
    pub listen_address: SocketAddr,
    /// Routing tags attached to every received datagram.
    pub tags: Vec<String>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            listen_address: SocketAddr::from(([127, 0, 0, 1], 5514)),
            tags: vec!["rsyslog".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LokiConfig {
    pub connection: String,
    pub batch_size: usize,
    /// Milliseconds.
    pub max_wait_time: u64,
    /// Seconds.
    pub timeout: u64,
}

impl Default for LokiConfig {
    fn default() -> Self {
        LokiConfig {
            connection: "http://localhost:3100".to_string(),
            batch_size: 20,
            max_wait_time: 100,
            timeout: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log_level: LogLevel,
    /// `stderr`, `stdout` or a file path.
    pub log_file: String,
    pub transport: Transport,
    pub socket: SocketConfig,
    pub udp: UdpConfig,
    pub schema: Schema,
    /// Label fields to copy into each record. Defaults to the schema's default set.
    pub labels: Option<Vec<String>>,
    pub routing_tag: Option<String>,
    pub loki: LokiConfig,
    pub channel_capacity: usize,
    /// Seconds.
    pub shutdown_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: LogLevel::default(),
            log_file: "stderr".to_string(),
            transport: Transport::default(),
            socket: SocketConfig::default(),
            udp: UdpConfig::default(),
            schema: Schema::default(),
            labels: None,
            routing_tag: None,
            loki: LokiConfig::default(),
            channel_capacity: 64,
            shutdown_timeout: 5,
        }
    }
}

/// Where the agent writes its own logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stderr,
    Stdout,
    File(PathBuf),
}

impl Config {
    /// Loads the configuration from `path` (if any) and the environment.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not name a file, if a value cannot be deserialized, or if
    /// [`Config::validate`] rejects the result.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ranges, the Loki URL and the label set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be greater than 0"));
        }
        if self.loki.batch_size == 0 {
            return Err(invalid("loki.batch_size must be greater than 0"));
        }
        if self.loki.max_wait_time == 0 {
            return Err(invalid("loki.max_wait_time must be greater than 0"));
        }
        if self.loki.timeout == 0 {
            return Err(invalid("loki.timeout must be greater than 0"));
        }
        if self.shutdown_timeout == 0 {
            return Err(invalid("shutdown_timeout must be greater than 0"));
        }
        if self.log_file.trim().is_empty() {
            return Err(invalid("log_file cannot be empty"));
        }
        match Url::parse(&self.loki.connection) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "loki.connection `{}` is not an http(s) URL",
                    self.loki.connection
                )))
            }
        }
        if matches!(&self.routing_tag, Some(tag) if tag.is_empty()) {
            return Err(invalid("routing_tag cannot be empty"));
        }
        if let Some(labels) = &self.labels {
            self.schema.validate_labels(labels)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn log_destination(&self) -> LogDestination {
        match self.log_file.as_str() {
            "stderr" | "/dev/stderr" => LogDestination::Stderr,
            "stdout" | "/dev/stdout" => LogDestination::Stdout,
            path => LogDestination::File(PathBuf::from(path)),
        }
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.loki.max_wait_time)
    }

    #[must_use]
    pub fn loki_timeout(&self) -> Duration {
        Duration::from_secs(self.loki.timeout)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid(reason.to_string())
}
