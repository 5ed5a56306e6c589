//! Mnemon tool-call server (JSON-RPC over stdio)
//!
//! Run with: mnemon-mcp

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mnemon::api::AppState;
use mnemon::config::Settings;
use mnemon::llm::{AnthropicClient, ModelClient, ModelRegistry, OpenAiClient};
use mnemon::long_term::LongTermMemoryEngine;
use mnemon::mcp::{McpServer, McpToolHandler};
use mnemon::store::{InMemoryVectorStore, TimeoutAdapter};
use mnemon::tasks::{task_queue, TaskDeps, TaskRunner};
use mnemon::working::WorkingMemoryStore;

#[derive(Parser, Debug)]
#[command(name = "mnemon-mcp")]
#[command(about = "Mnemon memory tools over stdio")]
struct Args {
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

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let settings = Arc::new(Settings {
        window_size: args.window_size,
        generation_model: args.generation_model.clone(),
        embedding_model: args.embedding_model.clone(),
        ..Default::default()
    });

    let openai = args.openai_api_key.as_ref().map(|key| {
        OpenAiClient::new(key.clone())
            .with_embedding_model(settings.embedding_model.clone())
            .with_timeouts(
                Duration::from_secs(settings.llm_timeout_secs),
                Duration::from_secs(settings.embedding_timeout_secs),
            )
    });
    let anthropic = args
        .anthropic_api_key
        .as_ref()
        .map(|key| AnthropicClient::new(key.clone()));
    let model: Arc<dyn ModelClient> = Arc::new(
        ModelRegistry::new(&settings, openai, anthropic)
            .context("invalid model configuration")?,
    );

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

    let state = AppState {
        working,
        engine,
        scheduler,
        settings,
    };

    tracing::info!(version = mnemon::VERSION, "mnemon tool server ready");
    let server = McpServer::new(McpToolHandler::new(state));
    server.run().await?;

    runner.shutdown(Duration::from_secs(10)).await;
    Ok(())
}
