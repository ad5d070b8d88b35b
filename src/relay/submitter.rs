use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::builder::BundleBuilder;
use super::client::RelayClient;
use crate::chain::ChainStateTracker;
use crate::error::{PipelineError, SubmissionError};
use crate::events::BotEvent;
use crate::models::{
    BundleOutcome, BundleSubmission, ChainSnapshot, Hash, Leg, OrderRequest, Pubkey,
    RelayOutcome, SignedOperation,
};

const RESOLVED_CAPACITY: usize = 4096;
const PARKED_CAPACITY: usize = 1024;
const RESOLUTION_TIMEOUT_REASON: &str = "resolution timeout";

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Total attempts per on-chain action, first one included
    pub max_attempts: u32,
    pub freshness_window: chrono::Duration,
    pub resolution_timeout: Duration,
    /// How long a retry waits for a blockhash it has not used yet
    pub fresh_blockhash_wait: Duration,
    pub history_limit: usize,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            freshness_window: chrono::Duration::seconds(20),
            resolution_timeout: Duration::from_secs(30),
            fresh_blockhash_wait: Duration::from_secs(5),
            history_limit: 1000,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    mint: Pubkey,
    order: OrderRequest,
    attempt: u32,
    used_blockhashes: Vec<Hash>,
    /// Fires the resolution timeout; aborted once the bundle resolves
    timeout: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Correlation {
    in_flight: HashMap<String, InFlight>,
    resolved: HashSet<String>,
    resolved_order: VecDeque<String>,
    /// Outcomes that arrived before their bundle was registered
    parked: HashMap<String, (RelayOutcome, DateTime<Utc>)>,
    history: VecDeque<BundleSubmission>,
}

impl Correlation {
    fn mark_resolved(&mut self, bundle_id: &str) {
        if self.resolved.insert(bundle_id.to_string()) {
            self.resolved_order.push_back(bundle_id.to_string());
            while self.resolved_order.len() > RESOLVED_CAPACITY {
                if let Some(oldest) = self.resolved_order.pop_front() {
                    self.resolved.remove(&oldest);
                }
            }
        }
    }

    /// Hold an outcome for a bundle id not registered yet. Expired entries
    /// go first, then the oldest ones beyond capacity.
    fn park(&mut self, outcome: RelayOutcome, now: DateTime<Utc>, ttl: chrono::Duration) {
        let cutoff = now - ttl;
        self.parked.retain(|_, (_, at)| *at >= cutoff);
        self.parked.insert(outcome.bundle_id.clone(), (outcome, now));
        while self.parked.len() > PARKED_CAPACITY {
            let oldest = self
                .parked
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.parked.remove(&id);
                }
                None => break,
            }
        }
    }

    fn set_outcome(&mut self, bundle_id: &str, outcome: BundleOutcome) {
        if let Some(record) = self.history.iter_mut().rev().find(|s| s.bundle_id == bundle_id) {
            record.outcome = outcome;
        }
    }
}

/// Submits bundles to the relay and correlates asynchronous outcomes back to
/// the action that produced them, retrying rejected attempts with a fresh
/// blockhash.
pub struct BundleSubmitter {
    relay: Arc<dyn RelayClient>,
    builder: Arc<dyn BundleBuilder>,
    tracker: Arc<ChainStateTracker>,
    config: SubmitterConfig,
    event_tx: mpsc::UnboundedSender<BotEvent>,
    state: Mutex<Correlation>,
}

impl BundleSubmitter {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        builder: Arc<dyn BundleBuilder>,
        tracker: Arc<ChainStateTracker>,
        config: SubmitterConfig,
        event_tx: mpsc::UnboundedSender<BotEvent>,
    ) -> Self {
        Self {
            relay,
            builder,
            tracker,
            config,
            event_tx,
            state: Mutex::new(Correlation::default()),
        }
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    fn parking_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.resolution_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }

    /// Validate and hand one bundle to the relay. Creates no record on
    /// failure.
    pub async fn submit(
        &self,
        instructions: &[SignedOperation],
        snapshot: &ChainSnapshot,
    ) -> Result<String, SubmissionError> {
        if instructions.is_empty() {
            return Err(SubmissionError::EmptyBundle);
        }

        let age = snapshot.age(Utc::now());
        if age > self.config.freshness_window {
            return Err(SubmissionError::StaleSnapshot {
                slot: snapshot.slot,
                age_ms: age.num_milliseconds(),
                window_ms: self.config.freshness_window.num_milliseconds(),
            });
        }

        Ok(self.relay.submit_bundle(instructions).await?)
    }

    /// First attempt of an entry or exit. A failure before any bundle id was
    /// assigned is also reported as `BotEvent::SubmissionFailed`.
    pub async fn dispatch(self: &Arc<Self>, order: OrderRequest) -> Result<String, SubmissionError> {
        let mint = order.mint();
        let leg = order.leg();
        info!("📦 Dispatching {} bundle for {}", leg, mint);

        let result = self.attempt_from(order, 1, Vec::new()).await;
        if let Err(e) = &result {
            self.emit(BotEvent::SubmissionFailed {
                mint,
                leg,
                reason: e.to_string(),
            });
        }
        result
    }

    /// Attempts starting at `attempt` until one is accepted by the relay or
    /// the budget is spent.
    async fn attempt_from(
        self: &Arc<Self>,
        order: OrderRequest,
        mut attempt: u32,
        mut used: Vec<Hash>,
    ) -> Result<String, SubmissionError> {
        let mint = order.mint();
        let leg = order.leg();

        loop {
            let snapshot = self.next_snapshot(&used).await?;
            let instructions = self.builder.build(&order, &snapshot)?;

            match self.submit(&instructions, &snapshot).await {
                Ok(bundle_id) => {
                    used.push(snapshot.blockhash);
                    self.register(
                        &bundle_id,
                        InFlight {
                            mint,
                            order: order.clone(),
                            attempt,
                            used_blockhashes: used,
                            timeout: None,
                        },
                        instructions,
                        snapshot,
                    );
                    return Ok(bundle_id);
                }
                Err(SubmissionError::Relay(e)) if attempt < self.config.max_attempts => {
                    warn!(
                        "Relay refused {} bundle for {} (attempt {}/{}): {}",
                        leg,
                        mint,
                        attempt,
                        self.config.max_attempts,
                        PipelineError::TransientUpstream(e)
                    );
                    used.push(snapshot.blockhash);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn next_snapshot(&self, used: &[Hash]) -> Result<ChainSnapshot, SubmissionError> {
        let window = self.config.freshness_window;
        if used.is_empty() {
            return self
                .tracker
                .usable_snapshot(window)
                .ok_or(SubmissionError::NoUsableSnapshot);
        }
        self.tracker
            .wait_for_fresh_blockhash(used, window, self.config.fresh_blockhash_wait)
            .await
            .ok_or(SubmissionError::NoUsableSnapshot)
    }

    fn register(
        self: &Arc<Self>,
        bundle_id: &str,
        in_flight: InFlight,
        instructions: Vec<SignedOperation>,
        snapshot: ChainSnapshot,
    ) {
        let submission = BundleSubmission {
            bundle_id: bundle_id.to_string(),
            asset_id: in_flight.mint,
            leg: in_flight.order.leg(),
            attempt: in_flight.attempt,
            instructions,
            snapshot_used: snapshot,
            submitted_at: Utc::now(),
            outcome: BundleOutcome::Pending,
        };

        info!(
            "🚀 Bundle {} submitted for {} ({} leg, attempt {}, slot {})",
            submission.bundle_id,
            submission.asset_id,
            submission.leg,
            submission.attempt,
            submission.snapshot_used.slot
        );

        let submitter = Arc::clone(self);
        let wait = self.config.resolution_timeout;
        let id = bundle_id.to_string();

        // Emitted under the lock so no outcome event can overtake it. The
        // timer is spawned under it too, so it cannot fire before its handle
        // is stored.
        let parked = {
            let mut state = self.state.lock();
            let mut in_flight = in_flight;
            in_flight.timeout = Some(tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                submitter.resolve(RelayOutcome::rejected(id, RESOLUTION_TIMEOUT_REASON), false);
            }));
            state.in_flight.insert(bundle_id.to_string(), in_flight);
            state.history.push_back(submission.clone());
            self.emit(BotEvent::BundleSubmitted(submission));
            while state.history.len() > self.config.history_limit {
                state.history.pop_front();
            }
            let cutoff = Utc::now() - self.parking_ttl();
            state.parked.retain(|_, (_, at)| *at >= cutoff);
            state.parked.remove(bundle_id).map(|(outcome, _)| outcome)
        };

        if let Some(outcome) = parked {
            debug!("Replaying early outcome for {}", bundle_id);
            self.resolve(outcome, false);
        }
    }

    /// Apply one relay notification. The first resolution of a bundle wins;
    /// later ones are stale and ignored.
    pub fn handle_outcome(self: &Arc<Self>, outcome: RelayOutcome) {
        self.resolve(outcome, true);
    }

    fn resolve(self: &Arc<Self>, outcome: RelayOutcome, park_unknown: bool) {
        let resolved = {
            let mut state = self.state.lock();
            match state.in_flight.remove(&outcome.bundle_id) {
                Some(mut in_flight) => {
                    if let Some(timer) = in_flight.timeout.take() {
                        timer.abort();
                    }
                    state.mark_resolved(&outcome.bundle_id);
                    let recorded = if outcome.accepted {
                        BundleOutcome::Accepted
                    } else {
                        BundleOutcome::Rejected(rejection_reason(&outcome))
                    };
                    state.set_outcome(&outcome.bundle_id, recorded);
                    Some(in_flight)
                }
                None if state.resolved.contains(&outcome.bundle_id) => {
                    debug!("Stale outcome for already resolved bundle {}", outcome.bundle_id);
                    None
                }
                None if park_unknown => {
                    debug!("Parking outcome for unregistered bundle {}", outcome.bundle_id);
                    state.park(outcome.clone(), Utc::now(), self.parking_ttl());
                    None
                }
                None => None,
            }
        };

        let Some(in_flight) = resolved else {
            return;
        };

        let leg = in_flight.order.leg();
        if outcome.accepted {
            info!("🎉 Bundle {} landed ({} leg for {})", outcome.bundle_id, leg, in_flight.mint);
            self.emit(BotEvent::BundleLanded {
                bundle_id: outcome.bundle_id,
                mint: in_flight.mint,
                order: in_flight.order,
            });
            return;
        }

        let reason = rejection_reason(&outcome);
        let rejection = PipelineError::SubmissionRejected {
            bundle_id: outcome.bundle_id.clone(),
            leg,
            reason: reason.clone(),
        };

        if in_flight.attempt >= self.config.max_attempts {
            error!(
                "❌ {} after {} attempts, giving up",
                rejection, in_flight.attempt
            );
            self.emit(BotEvent::BundleExhausted {
                bundle_id: outcome.bundle_id,
                mint: in_flight.mint,
                leg,
                reason,
            });
            return;
        }

        warn!(
            "🔁 {} (attempt {}/{}), retrying with a fresh blockhash",
            rejection, in_flight.attempt, self.config.max_attempts
        );
        self.emit(BotEvent::BundleRetrying {
            bundle_id: outcome.bundle_id.clone(),
            mint: in_flight.mint,
            leg,
            reason: reason.clone(),
        });

        let submitter = Arc::clone(self);
        let last_bundle = outcome.bundle_id;
        tokio::spawn(async move {
            let mint = in_flight.mint;
            let next = submitter
                .attempt_from(in_flight.order, in_flight.attempt + 1, in_flight.used_blockhashes)
                .await;
            if let Err(e) = next {
                warn!("Retry after {} could not be submitted: {}", last_bundle, e);
                submitter.emit(BotEvent::SubmissionFailed {
                    mint,
                    leg,
                    reason: format!("{} (after rejection: {})", e, reason),
                });
            }
        });
    }

    /// Consume the relay's outcome stream until it closes.
    pub async fn run_outcome_loop(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<RelayOutcome>) {
        info!("📬 Listening for bundle outcomes");
        while let Some(outcome) = rx.recv().await {
            self.handle_outcome(outcome);
        }
        warn!("Relay outcome stream closed");
    }

    /// Submission records, oldest first.
    pub fn submissions(&self) -> Vec<BundleSubmission> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn outstanding_for(&self, mint: &Pubkey, leg: Leg) -> Option<String> {
        self.state
            .lock()
            .in_flight
            .iter()
            .find(|(_, f)| f.mint == *mint && f.order.leg() == leg)
            .map(|(id, _)| id.clone())
    }

    fn emit(&self, event: BotEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event channel closed, dropping submitter event");
        }
    }
}

fn rejection_reason(outcome: &RelayOutcome) -> String {
    outcome
        .rejection_reason
        .clone()
        .unwrap_or_else(|| "rejected by relay".to_string())
}
