// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tickertape::config;
use tickertape::server::{self, AppState, ChatDefaults};
use tickertape::tools::ToolCatalog;
use tickertape::upstream::OllamaClient;

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "tickertape", about = "Streaming LLM relay and research tool gateway")]
struct Cli {
    /// Path to the tickertape.yaml config file
    #[arg(long, default_value = "tickertape.yaml", env = "TICKERTAPE_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = server::BIND_ADDR.1, env = "TICKERTAPE_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::from((server::BIND_ADDR.0, cli.port));
    tracing::info!(%addr, "tickertape starting");

    let source = config::FileSource {
        path: std::path::PathBuf::from(cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        upstream = %config.upstream.host,
        model = %config.upstream.model,
        config_hash = %config.config_hash,
        "config loaded"
    );

    let http = reqwest::Client::new();
    let state = AppState {
        upstream: Arc::new(OllamaClient::new(http.clone(), config.upstream.host.clone())),
        catalog: Arc::new(ToolCatalog::standard(http, &config.tools)),
        defaults: ChatDefaults {
            model: config.upstream.model.clone(),
            temperature: config.upstream.temperature,
        },
    };

    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "tickertape listening");

    axum::serve(listener, app)
        .await
        .expect("server error");
}
