use eyre::{Result, WrapErr};
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::chain::{ChainClient, ChainStateTracker, RpcChainClient};
use crate::config::BotConfig;
use crate::database::{self, DatabasePool};
use crate::ingest::registration::HELIUS_API_BASE;
use crate::ingest::HeliusWebhookRegistrar;
use crate::relay::{BundleBuilder, DryRunRelay, JitoRelayClient, RelayClient, TransactionBundleBuilder};
use crate::strategy::{FixedSizeDecider, TradeDecider};

const RELAY_STATUS_POLL: Duration = Duration::from_secs(1);

/// Long-lived service handles shared by the pipeline.
pub struct Services {
    pub tracker: Arc<ChainStateTracker>,
    pub relay: Arc<dyn RelayClient>,
    pub builder: Arc<dyn BundleBuilder>,
    pub decider: Arc<dyn TradeDecider>,
    pub journal: Option<DatabasePool>,
    /// Background tasks owned by the services (tracker loop, relay poller)
    pub tasks: Vec<JoinHandle<()>>,
}

/// Connect to the chain, start the tracker and pick the relay. A failing
/// connectivity check or first tracker refresh aborts startup.
pub async fn init_services(config: &BotConfig) -> Result<Services> {
    info!("🔧 Initializing services...");
    for line in config.redacted_summary() {
        info!("   {}", line);
    }

    let rpc_url = Url::parse(&config.rpc_url).wrap_err("invalid RPC_URL")?;
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(rpc_url)?);

    let slot = chain
        .get_slot()
        .await
        .wrap_err("RPC connectivity check failed")?;
    info!("✅ Connected to RPC, current slot {}", slot);

    let tracker = Arc::new(ChainStateTracker::new(chain, config.stale_after_failures));
    let tracker_task = tracker
        .start(config.poll_interval())
        .await
        .wrap_err("chain state tracker could not take its first snapshot")?;
    let mut tasks = vec![tracker_task];

    let relay: Arc<dyn RelayClient> = if config.live_execution {
        let block_engine = Url::parse(&config.jito_block_engine_url)
            .wrap_err("invalid JITO_BLOCK_ENGINE_URL")?;
        let jito = Arc::new(JitoRelayClient::new(block_engine, config.jito_auth_uuid.as_deref())?);
        tasks.push(jito.start_status_poller(RELAY_STATUS_POLL));
        info!("⚡ Live execution via Jito block engine {}", jito.block_engine());
        jito
    } else {
        info!("🧪 Dry-run mode: bundles are simulated and accepted immediately");
        Arc::new(DryRunRelay::new())
    };

    let wallet = load_wallet(config)?;
    info!("👛 Trading wallet {}", wallet.pubkey());
    let builder: Arc<dyn BundleBuilder> = Arc::new(TransactionBundleBuilder::new(
        wallet,
        config.pump_fun_program_id,
        config.jito_tip_account,
    ));

    let decider: Arc<dyn TradeDecider> = Arc::new(FixedSizeDecider {
        buy_lamports: config.buy_lamports(),
        slippage_bps: config.slippage_bps,
        priority_fee_micro_lamports: config.priority_fee_micro_lamports,
        tip_lamports: config.jito_tip_lamports,
        max_hold: config.max_hold(),
    });

    let journal = match database::init_database(&config.database_url).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("⚠️ Audit journal unavailable, continuing without it: {}", e);
            None
        }
    };

    info!("✅ Services initialized");
    Ok(Services {
        tracker,
        relay,
        builder,
        decider,
        journal,
        tasks,
    })
}

/// Wallet that signs every bundle. Live execution needs a keypair file; a
/// dry run falls back to a throwaway key.
fn load_wallet(config: &BotConfig) -> Result<Arc<dyn Signer + Send + Sync>> {
    match &config.trader_keypair_path {
        Some(path) => {
            let keypair = read_keypair_file(path)
                .map_err(|e| eyre::eyre!("could not read TRADER_KEYPAIR_PATH {}: {}", path, e))?;
            Ok(Arc::new(keypair))
        }
        None if config.live_execution => {
            Err(eyre::eyre!("TRADER_KEYPAIR_PATH must be set for live execution"))
        }
        None => {
            warn!("⚠️ TRADER_KEYPAIR_PATH not set, signing dry-run bundles with an ephemeral key");
            Ok(Arc::new(Keypair::new()))
        }
    }
}

/// Point the provider's enhanced webhook at our ingress. Never fatal.
pub async fn register_webhook(config: &BotConfig) {
    let (Some(api_key), Some(webhook_url)) = (&config.helius_api_key, &config.helius_webhook_url)
    else {
        info!("ℹ️ HELIUS_API_KEY or HELIUS_WEBHOOK_URL not set, skipping webhook registration");
        return;
    };

    let api_base = match Url::parse(HELIUS_API_BASE) {
        Ok(url) => url,
        Err(e) => {
            warn!("Invalid Helius API base: {}", e);
            return;
        }
    };

    match HeliusWebhookRegistrar::new(api_base, api_key.as_str()) {
        Ok(registrar) => {
            registrar
                .ensure_or_log(
                    webhook_url,
                    &config.pump_fun_program_id.to_string(),
                    config.webhook_auth_token.as_deref(),
                )
                .await
        }
        Err(e) => warn!("Could not build Helius client: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::write_keypair_file;

    #[test]
    fn test_live_execution_requires_keypair() {
        let config = BotConfig {
            live_execution: true,
            ..BotConfig::default()
        };
        assert!(load_wallet(&config).is_err());
    }

    #[test]
    fn test_dry_run_signs_with_ephemeral_key() {
        let config = BotConfig::default();
        assert!(load_wallet(&config).is_ok());
    }

    #[test]
    fn test_wallet_loaded_from_keypair_file() {
        let keypair = Keypair::new();
        let path = std::env::temp_dir().join(format!("sniper-wallet-{}.json", keypair.pubkey()));
        write_keypair_file(&keypair, &path).unwrap();

        let config = BotConfig {
            live_execution: true,
            trader_keypair_path: Some(path.to_string_lossy().into_owned()),
            ..BotConfig::default()
        };
        let wallet = load_wallet(&config).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
        std::fs::remove_file(path).ok();
    }
}
