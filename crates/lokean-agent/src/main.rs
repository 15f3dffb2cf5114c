// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::error::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Subscriber};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use lokean::config::{Config, LogDestination};
use lokean::logger::Formatter;
use lokean::Lokean;

/// Ships syslog JSON payloads received on a local transport to Loki.
#[derive(Parser, Debug)]
#[command(name = "lokean-agent", version)]
struct Args {
    /// YAML configuration file. `LOKEAN_*` environment variables override its values.
    #[arg(short, long, env = "LOKEAN_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("lokean-agent: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("lokean-agent: unable to set up logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let lokean = match Lokean::start(config).await {
        Ok(lokean) => lokean,
        Err(e) => {
            error!("Unable to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    match lokean.run(shutdown).await {
        Ok(summary) => {
            info!(
                forwarded = summary.pipeline.forwarded,
                rejected = summary.pipeline.rejected,
                "Shut down cleanly"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Stopped with error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing::subscriber::set_global_default(build_subscriber(config)?)?;
    Ok(())
}

fn build_subscriber(
    config: &Config,
) -> Result<impl Subscriber + Send + Sync + 'static, Box<dyn Error + Send + Sync>> {
    let env_filter = format!(
        "h2=off,hyper=off,hyper_util=off,rustls=off,reqwest=warn,{}",
        config.log_level.as_directive()
    );

    let writer = match config.log_destination() {
        LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogDestination::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };

    // plain text whatever features the fmt layer was built with
    Ok(tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter)?)
        .with_writer(writer)
        .with_ansi(false)
        .event_format(Formatter)
        .finish())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for SIGINT: {e}");
                return;
            }
            info!("Received SIGINT, shutting down");
        }
    }
    shutdown.cancel();
}
