//! parley - websocket chat bridge to streaming chat completions

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parley_ai::providers::{get_api_key, openai::OpenAiBackend};
use parley_session::{CompletionOrchestrator, InMemorySessionStore, MarkdownRenderer};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::server::AppState;

/// parley - chat with an LLM over a websocket
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (default: ~/.config/parley/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding index.html and static assets
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Address to listen on (e.g. 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_directive = if args.verbose {
        "parley=debug,tower_http=debug"
    } else {
        "parley=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = Config::config_path(args.config.as_deref());

    // Initialize config and exit
    if args.init_config {
        let path = Config::init(&config_path)?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let mut config = Config::load(&config_path)?;
    if let Some(dir) = args.static_dir {
        config.static_dir = dir;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let api_key = get_api_key(
        config.api_key.as_deref(),
        &["PARLEY_API_KEY", "OPENAI_API_KEY"],
    )
    .context("no API key: set api_key in the config, PARLEY_API_KEY or OPENAI_API_KEY")?;

    let orchestrator = CompletionOrchestrator::new(
        Arc::new(OpenAiBackend::new(api_key)),
        Arc::new(MarkdownRenderer),
        config.orchestrator_config()?,
    );
    let state = AppState {
        orchestrator,
        store: Arc::new(InMemorySessionStore::new()),
        protocol: config.protocol_config(),
        static_dir: config.static_dir.clone(),
        session_max_age: config.session_max_age(),
    };

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(
        model = %config.model,
        static_dir = %config.static_dir.display(),
        "listening on {}",
        config.listen
    );

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
