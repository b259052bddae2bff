mod answer;
mod api;
mod assistant;
mod config;
mod db;
mod error;
mod providers;
mod schema;
mod security;
mod server;
mod tools;
mod translator;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::assistant::Assistant;
use crate::config::Config;
use crate::db::ConnectionManager;
use crate::providers::openai::OpenAi;
use crate::security::GatePolicy;
use crate::translator::Translator;

#[derive(Debug, Parser)]
#[command(name = "marketai", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `marketai=trace`. Defaults to RUST_LOG, then `marketai=info`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, env = "MARKETAI_HOST")]
    host: Option<String>,

    #[arg(long, global = true, env = "MARKETAI_PORT")]
    port: Option<u16>,

    /// Origin allowed to call the API from a browser
    #[arg(long, global = true, env = "MARKETAI_ALLOWED_ORIGIN")]
    allowed_origin: Option<String>,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, global = true, env = "OPENAI_MODEL")]
    openai_model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Serve the same operations as MCP tools over stdio
    Mcp,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(origin) = &self.allowed_origin {
            config.server.allowed_origin = origin.clone();
        }
        if let Some(key) = &self.openai_api_key {
            config.completion.api_key = key.clone();
        }
        if let Some(model) = &self.openai_model {
            config.completion.model = model.clone();
        }
        if let Some(endpoint) = &self.openai_base_url {
            config.completion.endpoint = endpoint.clone();
        }
    }
}

fn init_tracing(log_level: Option<&str>, to_stderr: bool) -> Result<()> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("marketai=info")),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // stdout carries the MCP transport
    if to_stderr {
        builder.with_writer(std::io::stderr).with_ansi(false).init();
    } else {
        builder.init();
    }
    Ok(())
}

fn build_assistant(config: &Config) -> Result<Assistant> {
    if config.completion.api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; completion requests will likely be rejected");
    }
    let provider = OpenAi::from_config(&config.completion)
        .context("failed to build completion client")?;
    let translator = Translator::new(Arc::new(provider), config.completion.temperature);

    let policy = GatePolicy::from_strict(config.gate.strict);
    let db = ConnectionManager::new(config.database.clone(), policy);

    Ok(Assistant::new(db, translator, config.history.max_entries))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.as_ref().unwrap_or(&Command::Serve);

    init_tracing(cli.log_level.as_deref(), matches!(command, Command::Mcp))?;

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let assistant = build_assistant(&config)?;

    match command {
        Command::Serve => {
            info!("Starting MarketAI HTTP server");
            api::run(&config.server, assistant).await
        }
        Command::Mcp => {
            info!("Starting MarketAI MCP server");
            server::run(assistant).await
        }
    }
}
