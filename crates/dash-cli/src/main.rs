//! dash - multi-agent research team over MCP tools

mod config;
mod server;
mod team;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dash_agent::{ProviderTransport, Transport};
use dash_team::ResearchDriver;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::tools::McpToolProvider;

/// dash - research team server
#[derive(Parser, Debug)]
#[command(name = "dash")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Answer a single question, print the JSON answer and exit
    #[arg(short, long)]
    ask: Option<String>,

    /// Address to listen on (overrides server.bind)
    #[arg(short, long)]
    bind: Option<String>,

    /// Config file (default: ~/.config/dash/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "dash=debug" } else { "dash=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout is reserved for --ask output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);

    if args.init_config {
        match Config::init(&config_path) {
            Ok(true) => {
                println!("Config file created at: {}", config_path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Ok(false) => println!("Config file already exists at: {}", config_path.display()),
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    let api_key = config.api_key()?;
    let transport: Arc<dyn Transport> = Arc::new(ProviderTransport::with_api_key(api_key));

    let mcp = McpToolProvider::start(&config.mcp_servers.0).await?;
    let driver = match team::build_driver(&config, transport, &mcp.tool_sets()) {
        Ok(driver) => driver,
        Err(e) => {
            mcp.shutdown().await;
            return Err(e.into());
        }
    };

    let outcome = match args.ask {
        Some(question) => ask(&driver, &question).await,
        None => {
            let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
            server::serve(&bind, driver).await
        }
    };

    mcp.shutdown().await;
    outcome
}

async fn ask(driver: &ResearchDriver, question: &str) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match driver.answer(question, cancel).await {
        Ok(answer) => {
            println!("{}", serde_json::to_string_pretty(&answer)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", json!({ "error": "Error processing request" }));
            Err(e.into())
        }
    }
}
