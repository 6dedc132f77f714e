use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_agent_orchestrator::{
    completion::CompletionClient,
    config::{Config, LogFormat},
    server::{AppState, McpServer},
    storage::SqliteStorage,
    tools::ToolRegistry,
    QueryRequest,
};

#[derive(Parser, Debug)]
#[command(name = "mcp-agent-orchestrator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Serve MCP over stdio (default)
    Serve,

    /// Answer one message and print the response as JSON
    Query {
        /// The message to answer
        #[arg(long, short)]
        message: String,

        /// Caller identity used to scope stored knowledge
        #[arg(long)]
        identity: Option<String>,

        /// Session identifier for the conversation log
        #[arg(long)]
        session: Option<String>,

        /// Disable reflection-driven follow-up iterations
        #[arg(long)]
        no_loop: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP agent orchestrator starting..."
    );

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let completion = match CompletionClient::new(&config.completion, config.request.clone()) {
        Ok(c) => {
            info!(
                base_url = %config.completion.base_url,
                model = %config.completion.model,
                "Completion client initialized"
            );
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize completion client");
            return Err(e.into());
        }
    };

    let registry = match ToolRegistry::from_config(&config.tools, &config.request) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Failed to initialize tool registry");
            return Err(e.into());
        }
    };

    let state = Arc::new(AppState::new(config, storage, completion, registry));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server = McpServer::new(state);
            info!("Server ready, waiting for requests on stdin...");

            if let Err(e) = server.run().await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
            info!("Server shutdown complete");
        }
        Command::Query {
            message,
            identity,
            session,
            no_loop,
        } => {
            let mut request = QueryRequest::new(message);
            request.identity = identity;
            request.session_id = session;
            request.loop_enabled = !no_loop;

            let response = state.orchestrator.handle_query(request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
