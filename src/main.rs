// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use marketbridge::config::Config;
use marketbridge::error::FatalError;

/// Process exit codes.
const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_UPSTREAM_FATAL: i32 = 2;
const EXIT_BAD_CLI: i32 = 64;

#[tokio::main]
async fn main() {
    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(err) => {
            // clap prints help/version to stdout and usage errors to
            // stderr on its own; only the latter counts as invalid CLI.
            err.print().ok();
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_BAD_CLI,
            };
            std::process::exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match marketbridge::run(config).await {
        Ok(()) => std::process::exit(EXIT_OK),
        Err(FatalError::Config(err)) => {
            error!(error = %err, "configuration error");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
        Err(FatalError::Upstream(err)) => {
            error!(error = %err, "fatal upstream error");
            std::process::exit(EXIT_UPSTREAM_FATAL);
        }
    }
}
