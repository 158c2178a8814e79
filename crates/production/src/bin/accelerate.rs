//! Accelerate gateway server.
//!
//! # Usage
//!
//! ```bash
//! # Multi-tenant: clients present tokens minted with the same secret
//! accelerate serve --secret "$ACCELERATE_SECRET"
//!
//! # Single tenant behind an API key
//! accelerate serve --datasource-url postgresql://localhost/app --api-key ABC
//!
//! # Mint a client token
//! accelerate make-key postgresql://localhost/app --secret "$ACCELERATE_SECRET"
//! ```

use accelerate_auth::issue_token;
use accelerate_gateway::Gateway;
use accelerate_production::{
    init_tracing, router, BinaryEngineFactory, EngineDirectory, FileSchemaStore, LogFormat,
    ServerConfig,
};
use accelerate_types::DatasourceUrl;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "accelerate")]
#[command(about = "Query gateway in front of per-schema engine instances")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve(ServeArgs),

    /// Print a signed client token for a datasource
    MakeKey {
        /// Datasource URL the token grants access to
        datasource_url: String,

        /// Signing secret shared with the server
        #[arg(long, env = "ACCELERATE_SECRET")]
        secret: String,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short = 'l', long, env = "ACCELERATE_LISTEN")]
    listen: Option<String>,

    /// Token signing secret (multi-tenant mode)
    #[arg(long, env = "ACCELERATE_SECRET")]
    secret: Option<String>,

    /// Fixed datasource (single-tenant mode)
    #[arg(long, env = "ACCELERATE_DATASOURCE_URL")]
    datasource_url: Option<String>,

    /// API key required with a fixed datasource
    #[arg(long, env = "ACCELERATE_API_KEY")]
    api_key: Option<String>,

    /// Start a fresh engine for every request
    #[arg(long)]
    single_instance: bool,

    /// Directory holding engine executables
    #[arg(long, value_name = "DIR")]
    engines_dir: Option<PathBuf>,

    /// Base URL to download missing engines from
    #[arg(long, env = "ACCELERATE_ENGINE_MIRROR")]
    engine_mirror: Option<String>,

    /// Persist schema snapshots in this directory
    #[arg(long, value_name = "DIR")]
    schema_dir: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl ServeArgs {
    fn load_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(secret) = &self.secret {
            config.secret = Some(secret.clone());
        }
        if let Some(url) = &self.datasource_url {
            config.datasource_url = Some(url.clone());
        }
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if self.single_instance {
            config.single_instance = true;
        }
        if let Some(dir) = &self.engines_dir {
            config.engines_dir = dir.clone();
        }
        if let Some(mirror) = &self.engine_mirror {
            config.engine_mirror = Some(mirror.clone());
        }
        if let Some(dir) = &self.schema_dir {
            config.schema_dir = Some(dir.clone());
        }
        if self.json_logs {
            config.log_format = LogFormat::Json;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::MakeKey {
            datasource_url,
            secret,
        } => {
            let token = issue_token(&DatasourceUrl::new(datasource_url), &secret)?;
            println!("{}", token);
            Ok(())
        }
        Commands::Serve(args) => {
            let config = args.load_config()?;
            if args.print_config {
                print!("{}", config.to_toml()?);
                return Ok(());
            }
            init_tracing(config.log_format, &config.log_level)?;
            serve(config).await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let gateway_config = config.gateway_config()?;

    let mut engines = EngineDirectory::new(&config.engines_dir, &config.engine_platform);
    if let Some(mirror) = &config.engine_mirror {
        engines = engines.with_mirror(mirror);
    }
    let factory = BinaryEngineFactory::new(config.engine_startup_timeout());

    let mut builder = Gateway::builder(gateway_config, Arc::new(engines), Arc::new(factory));
    if let Some(dir) = &config.schema_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create schema dir {}", dir.display()))?;
        builder = builder.schema_store(Arc::new(FileSchemaStore::new(dir)));
    }
    let gateway = Arc::new(builder.build());
    let sweeper = gateway.spawn_sweeper();

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(addr = %config.listen, "Accelerate gateway listening");

    axum::serve(listener, router(Arc::clone(&gateway)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    sweeper.abort();
    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
