use clap::Parser;
use eyre::Result;
use launchpad_sniper::bootstrap::{init_services, register_webhook};
use launchpad_sniper::ingest::start_server;
use launchpad_sniper::{BotConfig, SniperBot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "launchpad-sniper")]
#[command(about = "Snipe new launchpad tokens through Jito bundles", long_about = None)]
struct Cli {
    /// Override the webhook server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Send real bundles to the block engine
    #[arg(long, conflicts_with = "dry_run")]
    live: bool,

    /// Simulate submissions even if LIVE_EXECUTION is set
    #[arg(long)]
    dry_run: bool,

    /// Skip Helius webhook registration
    #[arg(long)]
    no_register: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("🎯 Starting launchpad sniper");

    let mut config = BotConfig::from_env()?;
    if let Some(port) = cli.port {
        config.webhook_server_port = port;
    }
    if cli.live {
        config.live_execution = true;
    }
    if cli.dry_run {
        config.live_execution = false;
    }
    if config.live_execution {
        warn!("⚠️ LIVE execution enabled: bundles will be sent to the block engine");
    }
    info!("Configuration loaded");

    let services = init_services(&config).await?;
    let bot = SniperBot::new(config.clone(), services);

    let server = start_server(bot.ingress_state(), config.webhook_server_port).await?;

    if cli.no_register {
        info!("Webhook registration skipped");
    } else {
        register_webhook(&config).await;
    }

    tokio::select! {
        result = bot.run() => {
            if let Err(e) = &result {
                error!("Pipeline stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
    }

    server.abort();
    info!("👋 Sniper stopped");
    Ok(())
}
