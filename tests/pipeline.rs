use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use launchpad_sniper::bootstrap::Services;
use launchpad_sniper::chain::{ChainClient, ChainStateTracker, RecentBlockhash};
use launchpad_sniper::database::{self, DatabasePool};
use launchpad_sniper::error::UpstreamError;
use launchpad_sniper::ingest::normalizer::CREATE_DISCRIMINATOR;
use launchpad_sniper::ingest::webhook::WEBHOOK_PATH;
use launchpad_sniper::ingest::create_router;
use launchpad_sniper::relay::{RelayClient, TransactionBundleBuilder};
use launchpad_sniper::strategy::FixedSizeDecider;
use launchpad_sniper::{
    BotConfig, BundleOutcome, CoinPosition, Hash, PositionState, Pubkey, RelayOutcome,
    SignedOperation, SniperBot,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use solana_sdk::signature::Keypair;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt; // for `oneshot`

/// Chain that never moves: slot 100 and one blockhash.
struct FixedChain;

#[async_trait]
impl ChainClient for FixedChain {
    async fn get_slot(&self) -> Result<u64, UpstreamError> {
        Ok(100)
    }

    async fn get_latest_blockhash(&self) -> Result<RecentBlockhash, UpstreamError> {
        Ok(RecentBlockhash {
            blockhash: Hash::new_from_array([0xab; 32]),
            last_valid_block_height: 250,
        })
    }
}

/// Chain producing a new slot and blockhash on every refresh.
struct AdvancingChain {
    slot: AtomicU64,
}

#[async_trait]
impl ChainClient for AdvancingChain {
    async fn get_slot(&self) -> Result<u64, UpstreamError> {
        Ok(self.slot.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn get_latest_blockhash(&self) -> Result<RecentBlockhash, UpstreamError> {
        let slot = self.slot.load(Ordering::SeqCst);
        let mut bytes = [7u8; 32];
        bytes[..8].copy_from_slice(&slot.to_le_bytes());
        Ok(RecentBlockhash {
            blockhash: Hash::new_from_array(bytes),
            last_valid_block_height: slot + 150,
        })
    }
}

/// Relay answering every bundle with the same verdict.
struct ScriptedRelay {
    accept: bool,
    submitted: AtomicUsize,
    outcome_tx: mpsc::UnboundedSender<RelayOutcome>,
    outcome_rx: Mutex<Option<mpsc::UnboundedReceiver<RelayOutcome>>>,
}

impl ScriptedRelay {
    fn new(accept: bool) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            accept,
            submitted: AtomicUsize::new(0),
            outcome_tx,
            outcome_rx: Mutex::new(Some(outcome_rx)),
        }
    }
}

#[async_trait]
impl RelayClient for ScriptedRelay {
    async fn submit_bundle(&self, operations: &[SignedOperation]) -> Result<String, UpstreamError> {
        assert!(!operations.is_empty());
        let bundle_id = format!("bundle-{}", self.submitted.fetch_add(1, Ordering::SeqCst) + 1);
        let outcome = if self.accept {
            RelayOutcome::accepted(&bundle_id)
        } else {
            RelayOutcome::rejected(&bundle_id, "simulation failed")
        };
        let _ = self.outcome_tx.send(outcome);
        Ok(bundle_id)
    }

    fn subscribe_outcomes(&self) -> Option<mpsc::UnboundedReceiver<RelayOutcome>> {
        self.outcome_rx.lock().take()
    }
}

fn key(byte: u8) -> Pubkey {
    Pubkey::new_from_array([byte; 32])
}

/// Enhanced-webhook record for a create instruction of mint `byte`
/// (curve `byte + 1`, creator `byte + 2`).
fn create_record(signature: &str, byte: u8, slot: u64) -> Value {
    let accounts: Vec<String> = (0..14u8)
        .map(|i| match i {
            0 => key(byte).to_string(),
            2 => key(byte + 1).to_string(),
            7 => key(byte + 2).to_string(),
            other => key(100 + other).to_string(),
        })
        .collect();
    json!({
        "signature": signature,
        "type": "CREATE",
        "slot": slot,
        "timestamp": 1_700_000_000,
        "feePayer": key(byte + 2).to_string(),
        "transactionError": null,
        "instructions": [{
            "programId": launchpad_sniper::config::PUMP_FUN_PROGRAM_ID,
            "accounts": accounts,
            "data": bs58::encode(CREATE_DISCRIMINATOR).into_string(),
            "innerInstructions": []
        }]
    })
}

async fn start_bot(
    chain: Arc<dyn ChainClient>,
    relay: Arc<dyn RelayClient>,
    journal: Option<DatabasePool>,
) -> Arc<SniperBot> {
    let tracker = Arc::new(ChainStateTracker::new(chain, 3));
    let tracker_task = tracker.start(Duration::from_millis(10)).await.unwrap();

    let config = BotConfig {
        max_retries: 3,
        ..BotConfig::default()
    };
    let services = Services {
        tracker,
        relay,
        builder: Arc::new(TransactionBundleBuilder::new(
            Arc::new(Keypair::new()),
            config.pump_fun_program_id,
            key(51),
        )),
        decider: Arc::new(FixedSizeDecider {
            buy_lamports: 10_000_000,
            slippage_bps: 500,
            priority_fee_micro_lamports: 100_000,
            tip_lamports: 10_000,
            max_hold: chrono::Duration::hours(1),
        }),
        journal,
        tasks: vec![tracker_task],
    };

    let bot = Arc::new(SniperBot::new(config, services));
    let runner = Arc::clone(&bot);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    bot
}

async fn deliver(bot: &SniperBot, body: String) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = create_router(bot.ingress_state()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

async fn wait_for_state(bot: &SniperBot, mint: &Pubkey, state: PositionState) -> Option<CoinPosition> {
    for _ in 0..400 {
        if let Some(position) = bot.book().get(mint).await {
            if position.state == state {
                return Some(position);
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    None
}

#[tokio::test]
async fn test_new_launch_reaches_holding() {
    let bot = start_bot(Arc::new(FixedChain), Arc::new(ScriptedRelay::new(true)), None).await;
    assert_eq!(bot.tracker().current_slot(), Some(100));

    let (status, body) = deliver(&bot, json!([create_record("launch1", 1, 100)]).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let position = wait_for_state(&bot, &key(1), PositionState::Holding)
        .await
        .expect("position should reach Holding");
    assert!(position.tokens_held > 0);
    assert!(position.entry_tx_signature.is_some());
    assert!(position.entry_timestamp.is_some());
    assert_eq!(position.creator, key(3));

    let submissions = bot.submitter().submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].snapshot_used.slot, 100);
    assert_eq!(submissions[0].snapshot_used.blockhash, Hash::new_from_array([0xab; 32]));
    assert_eq!(submissions[0].outcome, BundleOutcome::Accepted);
}

#[tokio::test]
async fn test_duplicate_resolution_changes_nothing() {
    let bot = start_bot(Arc::new(FixedChain), Arc::new(ScriptedRelay::new(true)), None).await;
    deliver(&bot, json!([create_record("launch1", 1, 100)]).to_string()).await;
    let before = wait_for_state(&bot, &key(1), PositionState::Holding).await.unwrap();

    let bundle_id = bot.submitter().submissions()[0].bundle_id.clone();
    bot.submitter().handle_outcome(RelayOutcome::rejected(&bundle_id, "late"));
    bot.submitter().handle_outcome(RelayOutcome::accepted(&bundle_id));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = bot.book().get(&key(1)).await.unwrap();
    assert_eq!(after.state, PositionState::Holding);
    assert_eq!(after.tokens_held, before.tokens_held);
    assert_eq!(bot.submitter().submissions().len(), 1);
    assert_eq!(bot.submitter().submissions()[0].outcome, BundleOutcome::Accepted);
}

#[tokio::test]
async fn test_rejections_exhaust_budget_with_distinct_blockhashes() {
    let journal = database::init_database("sqlite::memory:").await.unwrap();
    let chain = Arc::new(AdvancingChain {
        slot: AtomicU64::new(500),
    });
    let bot = start_bot(chain, Arc::new(ScriptedRelay::new(false)), Some(journal.clone())).await;

    let slot = bot.tracker().current_slot().unwrap();
    deliver(&bot, json!([create_record("launch1", 1, slot)]).to_string()).await;

    let position = wait_for_state(&bot, &key(1), PositionState::Failed)
        .await
        .expect("position should fail after the retry budget");
    assert_eq!(position.tokens_held, 0);
    assert_eq!(bot.book().active_count(), 0);

    let submissions = bot.submitter().submissions();
    assert_eq!(submissions.len(), 3);
    let attempts: Vec<u32> = submissions.iter().map(|s| s.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    let hashes: HashSet<Hash> = submissions.iter().map(|s| s.snapshot_used.blockhash).collect();
    assert_eq!(hashes.len(), 3);
    assert!(submissions
        .iter()
        .all(|s| matches!(s.outcome, BundleOutcome::Rejected(_))));

    let mut journaled = Vec::new();
    for _ in 0..100 {
        journaled = database::transitions_for(&journal, &key(1)).await.unwrap();
        if journaled.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let states: Vec<(&str, &str)> = journaled
        .iter()
        .map(|r| (r.from_state.as_str(), r.to_state.as_str()))
        .collect();
    assert_eq!(states, vec![("monitoring", "buying"), ("buying", "failed")]);
}

#[tokio::test]
async fn test_malformed_delivery_acknowledged_without_events() {
    let bot = start_bot(Arc::new(FixedChain), Arc::new(ScriptedRelay::new(true)), None).await;

    let (status, _) = deliver(&bot, r#"{"signature":"not-an-array"}"#.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = deliver(&bot, "[1, \"two\", {\"type\": 3}]".to_string()).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bot.book().is_empty());
    assert!(bot.submitter().submissions().is_empty());
}

#[tokio::test]
async fn test_duplicate_delivery_opens_one_position() {
    let bot = start_bot(Arc::new(FixedChain), Arc::new(ScriptedRelay::new(true)), None).await;
    let body = json!([create_record("launch1", 1, 100)]).to_string();

    deliver(&bot, body.clone()).await;
    deliver(&bot, body).await;

    wait_for_state(&bot, &key(1), PositionState::Holding).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bot.book().len(), 1);
    assert_eq!(bot.submitter().submissions().len(), 1);
}
