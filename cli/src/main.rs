// llm-mux - Multi-provider LLM gateway entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use llm_mux_server::AppState;

/// llm-mux - one OpenAI-compatible endpoint over many LLM providers
#[derive(Parser, Debug)]
#[command(name = "llm-mux")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    /// (default: ~/.config/llm-mux/config.yaml)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Listen port override
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Credential directory override
    #[arg(long = "auth-dir")]
    auth_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => llm_mux_config::load_from(path)?,
        None => llm_mux_config::load()?,
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(auth_dir) = cli.auth_dir {
        config.auth_dir = auth_dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(auth_dir = %config.resolved_auth_dir().display(), "starting llm-mux");

    let state = AppState::from_config(config)?;
    llm_mux_server::run(state).await?;
    Ok(())
}
