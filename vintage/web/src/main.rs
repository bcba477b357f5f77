use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use vintage_pipeline::{
    config::{CONFIG_FILE_PATH, PARAMS_FILE_PATH, SCHEMA_FILE_PATH},
    ConfigurationManager,
};
use vintage_web::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "vintage-web", version, about = "Wine-quality prediction form")]
struct Args {
    /// Model artifact; defaults to the configured prediction model.
    #[arg(long)]
    model: Option<PathBuf>,
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value = CONFIG_FILE_PATH)]
    config: PathBuf,
    #[arg(long, default_value = PARAMS_FILE_PATH)]
    params: PathBuf,
    #[arg(long, default_value = SCHEMA_FILE_PATH)]
    schema: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let model = match args.model {
        Some(path) => path,
        None => {
            ConfigurationManager::new(&args.config, &args.params, &args.schema)
                .with_context(|| format!("loading configuration from {}", args.config.display()))?
                .prediction_config()
                .model_path
        }
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, model = %model.display(), "serving prediction form");
    axum::serve(listener, router(AppState::new(model)))
        .await
        .context("server stopped")?;
    Ok(())
}
