use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::UpstreamError;
use crate::models::{RelayOutcome, SignedOperation};
use crate::rpc::{header_map, JsonRpcClient};

/// Block-construction relay accepting atomic bundles.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Hand a bundle to the relay, returning its bundle id.
    async fn submit_bundle(&self, operations: &[SignedOperation]) -> Result<String, UpstreamError>;

    /// Stream of outcome notifications. Only the first caller gets it.
    fn subscribe_outcomes(&self) -> Option<mpsc::UnboundedReceiver<RelayOutcome>>;
}

// getInflightBundleStatuses accepts at most five ids per request
const MAX_STATUS_BATCH: usize = 5;

#[derive(Debug, Deserialize)]
struct InflightStatuses {
    value: Vec<InflightStatus>,
}

#[derive(Debug, Deserialize)]
struct InflightStatus {
    bundle_id: String,
    status: String,
    #[serde(default)]
    landed_slot: Option<u64>,
}

/// Jito block engine over JSON-RPC. Outcomes are obtained by polling the
/// in-flight status endpoint for every bundle still pending.
pub struct JitoRelayClient {
    rpc: JsonRpcClient,
    bundles_url: Url,
    statuses_url: Url,
    pending: Mutex<HashMap<String, Instant>>,
    /// How long an unknown ("Invalid") bundle is given before it counts as rejected
    invalid_grace: Duration,
    outcome_tx: mpsc::UnboundedSender<RelayOutcome>,
    outcome_rx: Mutex<Option<mpsc::UnboundedReceiver<RelayOutcome>>>,
}

impl JitoRelayClient {
    pub fn new(block_engine_url: Url, auth_uuid: Option<&str>) -> Result<Self, UpstreamError> {
        let headers = match auth_uuid {
            Some(uuid) => header_map(&[("x-jito-auth", uuid)]),
            None => header_map(&[]),
        };

        let join = |path: &str| {
            block_engine_url.join(path).map_err(|e| UpstreamError::Decode {
                method: "url".to_string(),
                reason: e.to_string(),
            })
        };
        let bundles_url = join("/api/v1/bundles")?;
        let statuses_url = join("/api/v1/getInflightBundleStatuses")?;

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Ok(Self {
            rpc: JsonRpcClient::with_headers(bundles_url.clone(), Duration::from_secs(10), headers)?,
            bundles_url,
            statuses_url,
            pending: Mutex::new(HashMap::new()),
            invalid_grace: Duration::from_secs(5),
            outcome_tx,
            outcome_rx: Mutex::new(Some(outcome_rx)),
        })
    }

    pub fn block_engine(&self) -> &Url {
        &self.bundles_url
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Spawn the in-flight status poller.
    pub fn start_status_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            info!("📡 Polling bundle statuses every {}ms", interval.as_millis());
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = relay.poll_once().await {
                    warn!("Bundle status poll failed: {}", e);
                }
            }
        })
    }

    async fn poll_once(&self) -> Result<(), UpstreamError> {
        let ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        if ids.is_empty() {
            return Ok(());
        }

        for batch in ids.chunks(MAX_STATUS_BATCH) {
            let statuses: InflightStatuses = self
                .rpc
                .call_at(&self.statuses_url, "getInflightBundleStatuses", [batch])
                .await?;

            for status in statuses.value {
                if let Some(outcome) = self.interpret(&status) {
                    self.pending.lock().remove(&status.bundle_id);
                    if self.outcome_tx.send(outcome).is_err() {
                        debug!("Outcome receiver dropped");
                    }
                }
            }
        }
        Ok(())
    }

    fn interpret(&self, status: &InflightStatus) -> Option<RelayOutcome> {
        match status.status.as_str() {
            "Landed" => {
                debug!(
                    "Bundle {} landed in slot {:?}",
                    status.bundle_id, status.landed_slot
                );
                Some(RelayOutcome::accepted(&status.bundle_id))
            }
            "Failed" => Some(RelayOutcome::rejected(&status.bundle_id, "bundle failed")),
            "Invalid" => {
                let submitted = self.pending.lock().get(&status.bundle_id).copied()?;
                (submitted.elapsed() >= self.invalid_grace)
                    .then(|| RelayOutcome::rejected(&status.bundle_id, "bundle unknown to block engine"))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl RelayClient for JitoRelayClient {
    async fn submit_bundle(&self, operations: &[SignedOperation]) -> Result<String, UpstreamError> {
        let bundle_id: String = self
            .rpc
            .call("sendBundle", send_bundle_params(operations))
            .await?;

        self.pending.lock().insert(bundle_id.clone(), Instant::now());
        Ok(bundle_id)
    }

    fn subscribe_outcomes(&self) -> Option<mpsc::UnboundedReceiver<RelayOutcome>> {
        self.outcome_rx.lock().take()
    }
}

/// Simulation relay: deterministic mock bundle ids and immediate acceptance.
pub struct DryRunRelay {
    outcome_tx: mpsc::UnboundedSender<RelayOutcome>,
    outcome_rx: Mutex<Option<mpsc::UnboundedReceiver<RelayOutcome>>>,
}

impl Default for DryRunRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunRelay {
    pub fn new() -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            outcome_tx,
            outcome_rx: Mutex::new(Some(outcome_rx)),
        }
    }
}

#[async_trait]
impl RelayClient for DryRunRelay {
    async fn submit_bundle(&self, operations: &[SignedOperation]) -> Result<String, UpstreamError> {
        info!("🎭 DRY RUN: bundle with {} operations not sent", operations.len());

        let mut hasher = DefaultHasher::new();
        for op in operations {
            hasher.write(op.payload.as_bytes());
        }
        let bundle_id = format!("dryrun-{:016x}", hasher.finish());

        let _ = self.outcome_tx.send(RelayOutcome::accepted(&bundle_id));
        Ok(bundle_id)
    }

    fn subscribe_outcomes(&self) -> Option<mpsc::UnboundedReceiver<RelayOutcome>> {
        self.outcome_rx.lock().take()
    }
}

/// Jito JSON-RPC params for sendBundle.
pub fn send_bundle_params(operations: &[SignedOperation]) -> serde_json::Value {
    let payloads: Vec<&str> = operations.iter().map(|op| op.payload.as_str()).collect();
    json!([payloads])
}
