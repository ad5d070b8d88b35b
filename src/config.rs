use eyre::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::models::{Pubkey, LAMPORTS_PER_SOL};
use crate::position::TransitionLimits;
use crate::relay::SubmitterConfig;

pub const PUMP_FUN_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";
pub const PUMP_FUN_PROGRAM: Pubkey = solana_sdk::pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
/// Jito tip account used when none is configured.
pub const DEFAULT_TIP_ACCOUNT: Pubkey = solana_sdk::pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5");
pub const DEFAULT_BLOCK_ENGINE_URL: &str = "https://mainnet.block-engine.jito.wtf";

// Configuration struct
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub rpc_url: String,
    pub jito_block_engine_url: String,
    pub jito_auth_uuid: Option<String>,
    pub helius_api_key: Option<String>,
    pub helius_webhook_url: Option<String>,
    pub webhook_server_port: u16,
    pub webhook_auth_token: Option<String>,
    pub pump_fun_program_id: Pubkey,
    /// Keypair file of the trading wallet; required for live execution
    pub trader_keypair_path: Option<String>,
    pub jito_tip_account: Pubkey,
    pub buy_amount_sol: Decimal,
    pub slippage_bps: u64,
    pub priority_fee_micro_lamports: u64,
    pub jito_tip_lamports: u64,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    pub freshness_window_ms: u64,
    pub resolution_timeout_secs: u64,
    pub max_exit_rounds: u32,
    pub max_active_positions: usize,
    pub max_hold_secs: u64,
    pub max_detection_lag_slots: u64,
    pub dedup_capacity: usize,
    pub dedup_ttl_secs: u64,
    pub stale_after_failures: u32,
    pub database_url: String,
    pub live_execution: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            jito_block_engine_url: DEFAULT_BLOCK_ENGINE_URL.to_string(),
            jito_auth_uuid: None,
            helius_api_key: None,
            helius_webhook_url: None,
            webhook_server_port: 8080,
            webhook_auth_token: None,
            pump_fun_program_id: PUMP_FUN_PROGRAM,
            trader_keypair_path: None,
            jito_tip_account: DEFAULT_TIP_ACCOUNT,
            buy_amount_sol: dec!(0.01),
            slippage_bps: 500,
            priority_fee_micro_lamports: 100_000,
            jito_tip_lamports: 10_000,
            max_retries: 3,
            poll_interval_ms: 1000,
            freshness_window_ms: 20_000,
            resolution_timeout_secs: 30,
            max_exit_rounds: 3,
            max_active_positions: 1,
            max_hold_secs: 60,
            max_detection_lag_slots: 150,
            dedup_capacity: 10_000,
            dedup_ttl_secs: 600,
            stale_after_failures: 5,
            database_url: "sqlite:sniper.db".to_string(),
            live_execution: false,
        }
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let rpc_url = std::env::var("RPC_URL")
            .or_else(|_| std::env::var("HELIUS_RPC_URL"))
            .map_err(|_| eyre::eyre!("RPC_URL (or HELIUS_RPC_URL) environment variable not set"))?;
        url::Url::parse(&rpc_url).map_err(|e| eyre::eyre!("Invalid RPC_URL '{}': {}", rpc_url, e))?;

        let jito_block_engine_url = std::env::var("JITO_BLOCK_ENGINE_URL")
            .unwrap_or_else(|_| DEFAULT_BLOCK_ENGINE_URL.to_string());

        let pump_fun_program_id = match std::env::var("PUMP_FUN_PROGRAM_ID") {
            Ok(id) => id
                .parse::<Pubkey>()
                .map_err(|e| eyre::eyre!("Invalid PUMP_FUN_PROGRAM_ID: {}", e))?,
            Err(_) => defaults.pump_fun_program_id,
        };

        let jito_tip_account = env_or("JITO_TIP_ACCOUNT", defaults.jito_tip_account);

        let buy_amount_sol = match std::env::var("BUY_AMOUNT_SOL") {
            Ok(amount_str) => match amount_str.parse::<Decimal>() {
                Ok(amount) if amount > Decimal::ZERO => amount,
                Ok(_) => {
                    warn!("BUY_AMOUNT_SOL must be positive. Using default {}.", defaults.buy_amount_sol);
                    defaults.buy_amount_sol
                }
                Err(e) => {
                    warn!("Invalid BUY_AMOUNT_SOL '{}': {}. Using default {}.", amount_str, e, defaults.buy_amount_sol);
                    defaults.buy_amount_sol
                }
            },
            Err(_) => defaults.buy_amount_sol,
        };

        let jito_auth_uuid = optional_env("JITO_AUTH_UUID").and_then(|raw| match uuid::Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id.to_string()),
            Err(e) => {
                warn!("Invalid JITO_AUTH_UUID: {}. Sending bundles unauthenticated.", e);
                None
            }
        });

        let live_execution = std::env::var("LIVE_EXECUTION")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            rpc_url,
            jito_block_engine_url,
            jito_auth_uuid,
            helius_api_key: optional_env("HELIUS_API_KEY"),
            helius_webhook_url: optional_env("HELIUS_WEBHOOK_URL"),
            webhook_server_port: env_or("WEBHOOK_SERVER_PORT", defaults.webhook_server_port),
            webhook_auth_token: optional_env("WEBHOOK_AUTH_TOKEN"),
            pump_fun_program_id,
            trader_keypair_path: optional_env("TRADER_KEYPAIR_PATH"),
            jito_tip_account,
            buy_amount_sol,
            slippage_bps: env_or("SLIPPAGE_BPS", defaults.slippage_bps).min(10_000),
            priority_fee_micro_lamports: env_or(
                "PRIORITY_FEE_MICRO_LAMPORTS",
                defaults.priority_fee_micro_lamports,
            ),
            jito_tip_lamports: env_or("JITO_TIP_LAMPORTS", defaults.jito_tip_lamports),
            max_retries: nonzero_env_or("MAX_RETRIES", defaults.max_retries),
            poll_interval_ms: nonzero_env_or("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            freshness_window_ms: nonzero_env_or("FRESHNESS_WINDOW_MS", defaults.freshness_window_ms),
            resolution_timeout_secs: nonzero_env_or(
                "RESOLUTION_TIMEOUT_SECS",
                defaults.resolution_timeout_secs,
            ),
            max_exit_rounds: nonzero_env_or("MAX_EXIT_ROUNDS", defaults.max_exit_rounds),
            max_active_positions: nonzero_env_or("MAX_ACTIVE_POSITIONS", defaults.max_active_positions),
            max_hold_secs: env_or("MAX_HOLD_SECS", defaults.max_hold_secs),
            max_detection_lag_slots: env_or("MAX_DETECTION_LAG_SLOTS", defaults.max_detection_lag_slots),
            dedup_capacity: nonzero_env_or("DEDUP_CAPACITY", defaults.dedup_capacity),
            dedup_ttl_secs: nonzero_env_or("DEDUP_TTL_SECS", defaults.dedup_ttl_secs),
            stale_after_failures: nonzero_env_or("STALE_AFTER_FAILURES", defaults.stale_after_failures),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            live_execution,
        })
    }

    pub fn buy_lamports(&self) -> u64 {
        (self.buy_amount_sol * Decimal::from(LAMPORTS_PER_SOL))
            .trunc()
            .to_u64()
            .unwrap_or(0)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.freshness_window_ms as i64)
    }

    pub fn max_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_hold_secs as i64)
    }

    pub fn transition_limits(&self) -> TransitionLimits {
        TransitionLimits {
            max_active_positions: self.max_active_positions,
            max_exit_rounds: self.max_exit_rounds,
            max_detection_lag_slots: self.max_detection_lag_slots,
        }
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            max_attempts: self.max_retries,
            freshness_window: self.freshness_window(),
            resolution_timeout: Duration::from_secs(self.resolution_timeout_secs),
            fresh_blockhash_wait: self.poll_interval() * 5,
            ..SubmitterConfig::default()
        }
    }

    /// Configuration lines safe to log: secrets and API keys are masked.
    pub fn redacted_summary(&self) -> Vec<String> {
        vec![
            format!("RPC: {}", mask_url_secrets(&self.rpc_url)),
            format!("Block engine: {}", self.jito_block_engine_url),
            format!("Jito auth: {}", mask_opt(&self.jito_auth_uuid)),
            format!("Helius API key: {}", mask_opt(&self.helius_api_key)),
            format!(
                "Webhook: {} (port {}, auth {})",
                self.helius_webhook_url.as_deref().unwrap_or("not registered"),
                self.webhook_server_port,
                if self.webhook_auth_token.is_some() { "on" } else { "off" }
            ),
            format!("Program: {}", self.pump_fun_program_id),
            format!(
                "Trader keypair: {}",
                self.trader_keypair_path.as_deref().unwrap_or("not set")
            ),
            format!(
                "Buy: {} SOL, slippage {} bps, priority fee {} µlamports, tip {} lamports",
                self.buy_amount_sol, self.slippage_bps, self.priority_fee_micro_lamports, self.jito_tip_lamports
            ),
            format!(
                "Attempts: {}, exit rounds: {}, max active: {}, hold: {}s",
                self.max_retries, self.max_exit_rounds, self.max_active_positions, self.max_hold_secs
            ),
            format!("Database: {}", mask_url_secrets(&self.database_url)),
            format!("Execution: {}", if self.live_execution { "LIVE" } else { "dry run" }),
        ]
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(value_str) => match value_str.parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid {} '{}': {}. Using default {}.", key, value_str, e, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn nonzero_env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + PartialEq + Default + Copy,
    T::Err: Display,
{
    let value = env_or(key, default);
    if value == T::default() {
        warn!("{} cannot be 0. Using default {}.", key, default);
        default
    } else {
        value
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}

fn mask_opt(secret: &Option<String>) -> String {
    secret.as_deref().map(mask).unwrap_or_else(|| "not set".to_string())
}

/// Mask query values and userinfo passwords, which is where providers put keys.
fn mask_url_secrets(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    if url.password().is_some() {
        let _ = url.set_password(Some("****"));
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), mask(&v)))
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys_match_published_addresses() {
        let defaults = BotConfig::default();
        assert_eq!(defaults.pump_fun_program_id.to_string(), PUMP_FUN_PROGRAM_ID);
        assert_eq!(
            defaults.jito_tip_account.to_string(),
            "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"
        );
    }

    #[test]
    fn test_buy_lamports() {
        let config = BotConfig::default();
        assert_eq!(config.buy_lamports(), 10_000_000);
    }

    #[test]
    fn test_secrets_masked_in_summary() {
        let config = BotConfig {
            rpc_url: "https://mainnet.helius-rpc.com/?api-key=abcdef123456".to_string(),
            helius_api_key: Some("abcdef123456".to_string()),
            ..BotConfig::default()
        };
        let summary = config.redacted_summary().join("\n");
        assert!(!summary.contains("abcdef123456"));
        assert!(summary.contains("abcd****"));
    }

    #[test]
    fn test_submitter_config_follows_retries() {
        let config = BotConfig {
            max_retries: 5,
            ..BotConfig::default()
        };
        assert_eq!(config.submitter_config().max_attempts, 5);
        assert_eq!(config.transition_limits().max_active_positions, 1);
    }
}
