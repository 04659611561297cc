// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use climate::config::{BrokerConfig, Flags};

#[tokio::main]
async fn main() {
    let flags = Flags::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match BrokerConfig::resolve(flags) {
        Ok(config) => config,
        Err(err) => {
            error!("fatal: {err:#}");
            std::process::exit(1);
        }
    };

    if let Err(err) = climate::run(config).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}
