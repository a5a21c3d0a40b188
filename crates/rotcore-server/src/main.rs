use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rotcore_server::state::{Config, LogFormat, Overrides};

/// WebRTC SFU relaying UDP media sources to negotiated peers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./rotcore.toml when present)
    #[arg(long, env = "ROTCORE_CONFIG")]
    config: Option<PathBuf>,

    /// File holding the shared RPC signing secret
    #[arg(long)]
    secret: Option<PathBuf>,

    /// Public IP to advertise to peers; repeatable
    #[arg(long = "ip")]
    ips: Vec<String>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rotcore_server=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&Overrides {
        config_file: cli.config,
        secret_path: cli.secret,
        public_ips: cli.ips,
    })?;

    // Initialize tracing
    init_tracing(config.log_format);

    tracing::info!("Starting Rotcore server...");

    let bind_address = config.bind_address.clone();
    let grace = config.shutdown_grace();

    let cancel = CancellationToken::new();
    let app = rotcore_server::create_app(config, cancel.clone()).await?;

    // Start the server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Listening on {}", bind_address);

    let signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        signal.cancel();
    });

    rotcore_server::serve(listener, app.router.clone(), cancel, grace).await?;
    app.shutdown().await;

    tracing::info!("Rotcore server stopped");
    Ok(())
}
