//! Mnemon HTTP server
//!
//! Run with: mnemon-server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mnemon::api::{http::create_router, AppState};
use mnemon::config::Settings;
use mnemon::llm::{AnthropicClient, ModelClient, ModelRegistry, OpenAiClient};
use mnemon::long_term::LongTermMemoryEngine;
use mnemon::store::{InMemoryVectorStore, TimeoutAdapter};
use mnemon::tasks::{task_queue, TaskDeps, TaskRunner};
use mnemon::working::WorkingMemoryStore;

#[derive(Parser, Debug)]
#[command(name = "mnemon-server")]
#[command(about = "Conversational memory service for AI agents")]
struct Args {
    /// Bind address
    #[arg(long, env = "MNEMON_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, env = "MNEMON_PORT", default_value = "8000")]
    port: u16,

    /// Message window size before summarization triggers
    #[arg(long, env = "MNEMON_WINDOW_SIZE", default_value = "12")]
    window_size: usize,

    /// Model for summarization, extraction, and dedup judging
    #[arg(long, env = "MNEMON_GENERATION_MODEL", default_value = "gpt-4o-mini")]
    generation_model: String,

    /// Model for embeddings
    #[arg(
        long,
        env = "MNEMON_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embedding_model: String,

    /// Override the generation model's context window
    #[arg(long, env = "MNEMON_CONTEXT_WINDOW_MAX")]
    context_window_max: Option<usize>,

    /// Background worker count
    #[arg(long, env = "MNEMON_MAX_WORKERS", default_value = "4")]
    max_workers: usize,

    /// Disable the long-term memory endpoints
    #[arg(long, env = "MNEMON_DISABLE_LONG_TERM")]
    disable_long_term: bool,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL (OpenRouter, Azure, ...)
    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Run the backlog extraction sweep on startup
    #[arg(long, env = "MNEMON_SWEEP_ON_START")]
    sweep_on_start: bool,
}

fn settings_from(args: &Args) -> Settings {
    Settings {
        window_size: args.window_size,
        generation_model: args.generation_model.clone(),
        embedding_model: args.embedding_model.clone(),
        context_window_max: args.context_window_max,
        max_workers: args.max_workers,
        long_term_enabled: !args.disable_long_term,
        ..Default::default()
    }
}

fn build_model_client(args: &Args, settings: &Settings) -> anyhow::Result<Arc<dyn ModelClient>> {
    let openai = args.openai_api_key.as_ref().map(|key| {
        let mut client = OpenAiClient::new(key.clone())
            .with_embedding_model(settings.embedding_model.clone())
            .with_timeouts(
                Duration::from_secs(settings.llm_timeout_secs),
                Duration::from_secs(settings.embedding_timeout_secs),
            );
        if let Some(base_url) = &args.openai_base_url {
            client = client.with_base_url(base_url.clone());
        }
        client
    });
    let anthropic = args.anthropic_api_key.as_ref().map(|key| {
        AnthropicClient::new(key.clone())
            .with_timeout(Duration::from_secs(settings.llm_timeout_secs))
    });

    if openai.is_none() {
        tracing::warn!("no OpenAI API key configured; embeddings will fail until one is set");
    }

    let registry = ModelRegistry::new(settings, openai, anthropic)
        .context("invalid model configuration")?;
    Ok(Arc::new(registry))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = Arc::new(settings_from(&args));
    let model = build_model_client(&args, &settings)?;

    let (scheduler, task_rx) = task_queue(settings.task_queue_capacity);
    let working = Arc::new(WorkingMemoryStore::new(
        scheduler.clone(),
        Arc::clone(&model),
        Arc::clone(&settings),
    ));
    let adapter = Arc::new(TimeoutAdapter::new(
        InMemoryVectorStore::new(),
        Duration::from_secs(settings.store_timeout_secs),
    ));
    let engine = Arc::new(LongTermMemoryEngine::new(
        adapter,
        Arc::clone(&model),
        scheduler.clone(),
        Arc::clone(&settings),
    ));

    let runner = TaskRunner::start(
        task_rx,
        scheduler.clone(),
        TaskDeps {
            engine: Arc::clone(&engine),
            working: Arc::clone(&working),
            settings: Arc::clone(&settings),
        },
    );

    if args.sweep_on_start {
        if let Err(err) = engine.schedule_unextracted().await {
            tracing::warn!(%err, "backlog extraction sweep failed");
        }
    }

    let state = AppState {
        working,
        engine,
        scheduler,
        settings,
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, version = mnemon::VERSION, "mnemon server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("draining background tasks");
    runner.shutdown(Duration::from_secs(10)).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
