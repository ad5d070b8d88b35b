use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bootstrap::Services;
use crate::chain::ChainStateTracker;
use crate::config::BotConfig;
use crate::database::{self, DatabasePool};
use crate::error::TransitionError;
use crate::events::BotEvent;
use crate::ingest::{EventNormalizer, IngressState, SignatureCache};
use crate::models::{
    AssetDetails, BundleOutcome, EventKind, OrderRequest, PositionState, Pubkey, RelayOutcome,
    TrackedEvent, TradeDetails,
};
use crate::position::{AppliedTransition, PositionBook};
use crate::relay::{BundleSubmitter, RelayClient};
use crate::strategy::TradeDecider;

const HOLD_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(60);
const TERMINAL_RETENTION_MINUTES: i64 = 10;

// Main bot struct wiring ingress, lifecycle and submission together
pub struct SniperBot {
    pub config: BotConfig,
    tracker: Arc<ChainStateTracker>,
    relay: Arc<dyn RelayClient>,
    decider: Arc<dyn TradeDecider>,
    journal: Option<DatabasePool>,
    book: Arc<PositionBook>,
    normalizer: Arc<EventNormalizer>,
    submitter: Arc<BundleSubmitter>,
    event_tx: mpsc::UnboundedSender<BotEvent>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<BotEvent>>>,
    _tasks: Vec<JoinHandle<()>>,
}

impl SniperBot {
    pub fn new(config: BotConfig, services: Services) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let seen = SignatureCache::new(
            config.dedup_capacity,
            chrono::Duration::seconds(config.dedup_ttl_secs as i64),
        );
        let normalizer = Arc::new(EventNormalizer::new(config.pump_fun_program_id, seen));
        let book = Arc::new(PositionBook::new(config.transition_limits()));
        let submitter = Arc::new(BundleSubmitter::new(
            Arc::clone(&services.relay),
            services.builder,
            Arc::clone(&services.tracker),
            config.submitter_config(),
            event_tx.clone(),
        ));

        info!(
            "🤖 Sniper initialized (program {}, max {} active positions)",
            config.pump_fun_program_id,
            book.limits().max_active_positions
        );

        Self {
            config,
            tracker: services.tracker,
            relay: services.relay,
            decider: services.decider,
            journal: services.journal,
            book,
            normalizer,
            submitter,
            event_tx,
            event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
            _tasks: services.tasks,
        }
    }

    /// State handed to the webhook ingress router.
    pub fn ingress_state(&self) -> IngressState {
        IngressState {
            normalizer: Arc::clone(&self.normalizer),
            event_tx: self.event_tx.clone(),
            auth_token: self.config.webhook_auth_token.clone(),
            tracker: Arc::clone(&self.tracker),
            book: Arc::clone(&self.book),
        }
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    pub fn submitter(&self) -> &Arc<BundleSubmitter> {
        &self.submitter
    }

    pub fn tracker(&self) -> &Arc<ChainStateTracker> {
        &self.tracker
    }

    pub async fn run(&self) -> Result<()> {
        info!("🚀 Starting launchpad sniper pipeline");

        let outcomes = self.relay.subscribe_outcomes();

        tokio::try_join!(
            self.run_event_processor(),
            self.run_outcome_processor(outcomes),
            self.run_hold_sweeper(),
            self.run_status_reporter(),
        )?;

        Ok(())
    }

    async fn run_event_processor(&self) -> Result<()> {
        info!("Starting event processor...");

        let mut event_rx = self.event_rx.lock().await;
        while let Some(event) = event_rx.recv().await {
            self.handle_event(event).await;
        }

        warn!("Event channel closed, event processor stopping");
        Ok(())
    }

    async fn run_outcome_processor(
        &self,
        outcomes: Option<mpsc::UnboundedReceiver<RelayOutcome>>,
    ) -> Result<()> {
        match outcomes {
            Some(rx) => self.submitter.run_outcome_loop(rx).await,
            None => error!("Relay outcome stream already taken, bundles resolve by timeout only"),
        }
        Ok(())
    }

    /// Exit positions whose hold period ran out and prune finished ones.
    async fn run_hold_sweeper(&self) -> Result<()> {
        let mut interval = tokio::time::interval(HOLD_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let now = chrono::Utc::now();
            for position in self.book.holding_positions().await {
                if self.decider.exit_due(&position, now) {
                    info!("⏰ Hold period over for {}", position.asset_id);
                    self.trigger_exit(&position.asset_id).await;
                }
            }

            let pruned = self
                .book
                .prune_terminal(chrono::Duration::minutes(TERMINAL_RETENTION_MINUTES));
            if pruned > 0 {
                debug!("🧹 Pruned {} finished positions", pruned);
            }
        }
    }

    async fn run_status_reporter(&self) -> Result<()> {
        let mut interval = tokio::time::interval(STATUS_REPORT_INTERVAL);

        loop {
            interval.tick().await;
            let slot = self
                .tracker
                .current_slot()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            info!(
                "📊 Status: slot {} ({:?}), {} positions tracked, {} active, {} bundles in flight",
                slot,
                self.tracker.health(),
                self.book.len(),
                self.book.active_count(),
                self.submitter.in_flight_count()
            );
        }
    }

    /// Apply one pipeline event. Bundle events are handled in channel order so
    /// a submission is always bound before its outcome.
    pub async fn handle_event(&self, event: BotEvent) {
        match event {
            BotEvent::Tracked(tracked) => self.handle_tracked(tracked).await,
            BotEvent::BundleSubmitted(submission) => {
                let lead_signature = submission.instructions.first().map(|op| op.id.clone());
                self.book
                    .record_submission(
                        &submission.asset_id,
                        submission.leg,
                        &submission.bundle_id,
                        lead_signature,
                    )
                    .await;
                database::journal_submission(self.journal.as_ref(), &submission).await;
            }
            BotEvent::BundleLanded { bundle_id, mint, order } => {
                debug!("Bundle {} landed for {} ({} leg)", bundle_id, mint, order.leg());
                database::journal_outcome(self.journal.as_ref(), &bundle_id, &BundleOutcome::Accepted)
                    .await;
                if let Some(applied) = self.book.on_fill_confirmed(&bundle_id).await {
                    self.journal_applied(&applied).await;
                }
            }
            BotEvent::BundleRetrying { bundle_id, mint, leg, reason } => {
                debug!("Bundle {} for {} ({} leg) rejected, retry pending", bundle_id, mint, leg);
                database::journal_outcome(
                    self.journal.as_ref(),
                    &bundle_id,
                    &BundleOutcome::Rejected(reason),
                )
                .await;
            }
            BotEvent::BundleExhausted { bundle_id, mint, leg, reason } => {
                database::journal_outcome(
                    self.journal.as_ref(),
                    &bundle_id,
                    &BundleOutcome::Rejected(reason.clone()),
                )
                .await;
                match self.book.on_rejected(&bundle_id, &reason).await {
                    Some(applied) => self.journal_applied(&applied).await,
                    None => debug!("Exhausted {} bundle {} for {} matched no position", leg, bundle_id, mint),
                }
            }
            BotEvent::SubmissionFailed { mint, leg, reason } => {
                warn!("❌ {} submission for {} failed: {}", leg, mint, reason);
                if let Some(applied) = self.book.on_submission_error(&mint, leg, &reason).await {
                    self.journal_applied(&applied).await;
                }
            }
        }
    }

    async fn handle_tracked(&self, event: TrackedEvent) {
        match &event.kind {
            EventKind::AssetCreated(details) => self.on_asset_created(&event, details).await,
            EventKind::TradeOccurred(trade) => self.on_trade(&event, trade).await,
            EventKind::Unrecognized => debug!("Ignoring unrecognized event {}", event.signature),
        }
    }

    async fn on_asset_created(&self, event: &TrackedEvent, details: &AssetDetails) {
        info!("🆕 New launch {} detected in {}", details.mint, event.signature);

        if let Err(e) = self
            .book
            .on_detect(details, event.slot, self.tracker.current_slot())
        {
            match e {
                TransitionError::CapacityReached { .. } | TransitionError::OutOfScope { .. } => {
                    info!("⏭️ Skipping {}: {}", details.mint, e)
                }
                _ => debug!("Skipping {}: {}", details.mint, e),
            }
            return;
        }

        let Some(order) = self.decider.on_created(details) else {
            info!("Decider passed on {}", details.mint);
            self.abandon(&details.mint, "entry declined").await;
            return;
        };

        let snapshot_available = self
            .tracker
            .usable_snapshot(self.submitter.config().freshness_window)
            .is_some();

        match self.book.begin_entry(&details.mint, order, snapshot_available).await {
            Ok(order) => {
                database::journal_transition(
                    self.journal.as_ref(),
                    &details.mint,
                    PositionState::Monitoring,
                    PositionState::Buying,
                    None,
                )
                .await;
                self.dispatch(OrderRequest::Entry(order));
            }
            Err(e) => {
                warn!("⚠️ Entry for {} not submitted: {}", details.mint, e);
                self.abandon(&details.mint, &e.to_string()).await;
            }
        }
    }

    async fn on_trade(&self, event: &TrackedEvent, trade: &TradeDetails) {
        let Some(position) = self.book.get(&trade.mint).await else {
            return;
        };
        if position.state != PositionState::Holding {
            return;
        }

        if self.decider.exit_on_trade(&position, trade) {
            info!(
                "🚨 Exit signal for {} from {:?} by {} in {}",
                trade.mint, trade.side, trade.trader, event.signature
            );
            self.trigger_exit(&trade.mint).await;
        }
    }

    /// Holding -> Selling and hand the exit bundle to the submitter.
    pub async fn trigger_exit(&self, mint: &Pubkey) {
        let snapshot_available = self
            .tracker
            .usable_snapshot(self.submitter.config().freshness_window)
            .is_some();
        let decider = Arc::clone(&self.decider);

        match self
            .book
            .begin_exit(mint, snapshot_available, |position| decider.exit_order(position))
            .await
        {
            Ok(order) => {
                database::journal_transition(
                    self.journal.as_ref(),
                    mint,
                    PositionState::Holding,
                    PositionState::Selling,
                    None,
                )
                .await;
                self.dispatch(OrderRequest::Exit(order));
            }
            Err(e) => debug!("Exit for {} not started: {}", mint, e),
        }
    }

    fn dispatch(&self, order: OrderRequest) {
        let submitter = Arc::clone(&self.submitter);
        tokio::spawn(async move {
            let mint = order.mint();
            let leg = order.leg();
            if let Err(e) = submitter.dispatch(order).await {
                debug!("{} dispatch for {} ended without a bundle: {}", leg, mint, e);
            }
        });
    }

    async fn abandon(&self, mint: &Pubkey, reason: &str) {
        if let Some(applied) = self.book.abandon(mint, reason).await {
            self.journal_applied(&applied).await;
        }
    }

    async fn journal_applied(&self, applied: &AppliedTransition) {
        database::journal_transition(
            self.journal.as_ref(),
            &applied.mint,
            applied.transition.from,
            applied.transition.to,
            applied.reason.as_deref(),
        )
        .await;
    }
}
