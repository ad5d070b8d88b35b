use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::state_machine::{admit, transition, PositionEvent, SideEffect, Transition, TransitionLimits};
use crate::error::{PipelineError, TransitionError};
use crate::models::{
    AssetDetails, CoinPosition, EntryOrder, ExitOrder, Leg, OrderRequest, PositionState, Pubkey,
};

/// A committed transition together with the asset it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransition {
    pub mint: Pubkey,
    pub transition: Transition,
    pub reason: Option<String>,
}

#[derive(Debug)]
struct PositionSlot {
    position: CoinPosition,
    /// Order behind the bundle currently in flight
    pending_order: Option<OrderRequest>,
    /// First operation id of the in-flight bundle
    pending_signature: Option<String>,
}

/// Keyed set of positions. Transitions on one asset are serialized through a
/// per-asset async mutex; different assets proceed in parallel.
pub struct PositionBook {
    positions: DashMap<Pubkey, Arc<Mutex<PositionSlot>>>,
    /// bundle id -> (asset, leg) for outcome callbacks
    bundles: DashMap<String, (Pubkey, Leg)>,
    admission: parking_lot::Mutex<()>,
    active: AtomicUsize,
    limits: TransitionLimits,
}

impl PositionBook {
    pub fn new(limits: TransitionLimits) -> Self {
        Self {
            positions: DashMap::new(),
            bundles: DashMap::new(),
            admission: parking_lot::Mutex::new(()),
            active: AtomicUsize::new(0),
            limits,
        }
    }

    pub fn limits(&self) -> &TransitionLimits {
        &self.limits
    }

    /// Start monitoring a newly created asset.
    pub fn on_detect(
        &self,
        details: &AssetDetails,
        event_slot: Option<u64>,
        current_slot: Option<u64>,
    ) -> Result<CoinPosition, TransitionError> {
        let _admission = self.admission.lock();

        admit(
            self.positions.contains_key(&details.mint),
            self.active.load(Ordering::Acquire),
            event_slot,
            current_slot,
            &self.limits,
            &details.mint.to_string(),
        )?;

        let position = CoinPosition::new(details, Utc::now());
        self.positions.insert(
            details.mint,
            Arc::new(Mutex::new(PositionSlot {
                position: position.clone(),
                pending_order: None,
                pending_signature: None,
            })),
        );
        self.active.fetch_add(1, Ordering::AcqRel);

        info!("👀 Monitoring new asset {} (curve {})", details.mint, details.bonding_curve);
        Ok(position)
    }

    /// Monitoring -> Buying. Returns the entry order to submit.
    pub async fn begin_entry(
        &self,
        mint: &Pubkey,
        order: EntryOrder,
        snapshot_available: bool,
    ) -> Result<EntryOrder, TransitionError> {
        let slot = self.slot(mint)?;
        let mut slot = slot.lock().await;

        let applied = self.apply(
            &mut slot,
            PositionEvent::EntryDecided {
                order,
                snapshot_available,
            },
        )?;

        match applied.transition.effect {
            SideEffect::SubmitEntry(order) => Ok(order),
            _ => Err(TransitionError::InvalidTransition {
                from: applied.transition.from,
                event: "EntryDecided",
            }),
        }
    }

    /// Holding -> Selling. The order is built from the position as it stands
    /// under the lock.
    pub async fn begin_exit<F>(
        &self,
        mint: &Pubkey,
        snapshot_available: bool,
        make_order: F,
    ) -> Result<ExitOrder, TransitionError>
    where
        F: FnOnce(&CoinPosition) -> ExitOrder,
    {
        let slot = self.slot(mint)?;
        let mut slot = slot.lock().await;

        if slot.position.state != PositionState::Holding {
            return Err(TransitionError::InvalidTransition {
                from: slot.position.state,
                event: "ExitTriggered",
            });
        }

        let order = make_order(&slot.position);
        let applied = self.apply(
            &mut slot,
            PositionEvent::ExitTriggered {
                order,
                snapshot_available,
            },
        )?;

        match applied.transition.effect {
            SideEffect::SubmitExit(order) => Ok(order),
            _ => Err(TransitionError::InvalidTransition {
                from: applied.transition.from,
                event: "ExitTriggered",
            }),
        }
    }

    /// Bind a relay bundle id to the position's in-flight leg. A retry
    /// replaces the previous attempt's id.
    pub async fn record_submission(
        &self,
        mint: &Pubkey,
        leg: Leg,
        bundle_id: &str,
        lead_signature: Option<String>,
    ) -> bool {
        let Ok(slot) = self.slot(mint) else {
            warn!("Submission {} for untracked asset {}", bundle_id, mint);
            return false;
        };
        let mut slot = slot.lock().await;

        if slot.position.state != leg.in_flight_state() {
            warn!(
                "{}",
                PipelineError::InvariantViolation(format!(
                    "bundle {} for {} leg of {} arrived in state {}",
                    bundle_id, leg, mint, slot.position.state
                ))
            );
            return false;
        }

        if let Some(previous) = slot.position.pending_bundle.replace(bundle_id.to_string()) {
            self.bundles.remove(&previous);
        }
        slot.pending_signature = lead_signature;
        slot.position.updated_at = Utc::now();
        self.bundles.insert(bundle_id.to_string(), (*mint, leg));
        true
    }

    /// Relay confirmed the bundle landed.
    pub async fn on_fill_confirmed(&self, bundle_id: &str) -> Option<AppliedTransition> {
        let (slot, _) = self.resolve_bundle(bundle_id).await?;
        let mut slot = slot.lock().await;

        if slot.position.pending_bundle.as_deref() != Some(bundle_id) {
            debug!("Ignoring stale fill for bundle {}", bundle_id);
            return None;
        }

        self.apply_logged(&mut slot, PositionEvent::FillConfirmed)
    }

    /// Relay rejected the bundle after the submitter spent its attempts, or
    /// the outcome never arrived.
    pub async fn on_rejected(&self, bundle_id: &str, reason: &str) -> Option<AppliedTransition> {
        let (slot, _) = self.resolve_bundle(bundle_id).await?;
        let mut slot = slot.lock().await;

        if slot.position.pending_bundle.as_deref() != Some(bundle_id) {
            debug!("Ignoring stale rejection for bundle {}", bundle_id);
            return None;
        }

        self.apply_logged(
            &mut slot,
            PositionEvent::Rejected {
                reason: reason.to_string(),
            },
        )
    }

    /// Failure with no bundle id ever assigned, handled like a rejection.
    pub async fn on_submission_error(
        &self,
        mint: &Pubkey,
        leg: Leg,
        reason: &str,
    ) -> Option<AppliedTransition> {
        let Ok(slot) = self.slot(mint) else {
            debug!("Submission error for untracked asset {}", mint);
            return None;
        };
        let mut slot = slot.lock().await;

        if slot.position.state != leg.in_flight_state() {
            debug!(
                "Ignoring {} submission error for {} in state {}",
                leg, mint, slot.position.state
            );
            return None;
        }

        self.apply_logged(
            &mut slot,
            PositionEvent::Rejected {
                reason: reason.to_string(),
            },
        )
    }

    /// Monitoring -> Failed when no entry will be submitted, releasing the
    /// active slot.
    pub async fn abandon(&self, mint: &Pubkey, reason: &str) -> Option<AppliedTransition> {
        let slot = self.slot(mint).ok()?;
        let mut slot = slot.lock().await;
        self.apply_logged(
            &mut slot,
            PositionEvent::EntryAbandoned {
                reason: reason.to_string(),
            },
        )
    }

    pub async fn get(&self, mint: &Pubkey) -> Option<CoinPosition> {
        let slot = self.slot(mint).ok()?;
        let slot = slot.lock().await;
        Some(slot.position.clone())
    }

    pub async fn list(&self) -> Vec<CoinPosition> {
        let slots: Vec<_> = self.positions.iter().map(|e| e.value().clone()).collect();
        let mut positions = Vec::with_capacity(slots.len());
        for slot in slots {
            positions.push(slot.lock().await.position.clone());
        }
        positions.sort_by_key(|p| p.detected_at);
        positions
    }

    pub async fn holding_positions(&self) -> Vec<CoinPosition> {
        self.list()
            .await
            .into_iter()
            .filter(|p| p.state == PositionState::Holding)
            .collect()
    }

    /// Positions not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Drop terminal positions last updated before `retention` ago.
    pub fn prune_terminal(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let before = self.positions.len();
        self.positions.retain(|_, slot| match slot.try_lock() {
            Ok(slot) => !(slot.position.state.is_terminal() && slot.position.updated_at < cutoff),
            Err(_) => true,
        });
        before - self.positions.len()
    }

    fn slot(&self, mint: &Pubkey) -> Result<Arc<Mutex<PositionSlot>>, TransitionError> {
        self.positions
            .get(mint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransitionError::UnknownAsset(mint.to_string()))
    }

    async fn resolve_bundle(&self, bundle_id: &str) -> Option<(Arc<Mutex<PositionSlot>>, Leg)> {
        let Some((_, (mint, leg))) = self.bundles.remove(bundle_id) else {
            debug!("No position waiting on bundle {}", bundle_id);
            return None;
        };
        match self.slot(&mint) {
            Ok(slot) => Some((slot, leg)),
            Err(e) => {
                warn!("{}", PipelineError::from(e));
                None
            }
        }
    }

    fn apply_logged(&self, slot: &mut PositionSlot, event: PositionEvent) -> Option<AppliedTransition> {
        match self.apply(slot, event) {
            Ok(applied) => Some(applied),
            Err(e) => {
                warn!("{}", PipelineError::from(e));
                None
            }
        }
    }

    /// Run the pure transition and commit its result to the slot.
    fn apply(&self, slot: &mut PositionSlot, event: PositionEvent) -> Result<AppliedTransition, TransitionError> {
        let t = transition(&slot.position, &event, &self.limits)?;
        let now = Utc::now();
        let position = &mut slot.position;
        let mut reason = None;

        match (&event, &t.effect) {
            (_, SideEffect::SubmitEntry(order)) => {
                slot.pending_order = Some(OrderRequest::Entry(order.clone()));
            }
            (_, SideEffect::SubmitExit(order)) => {
                slot.pending_order = Some(OrderRequest::Exit(order.clone()));
            }
            (PositionEvent::FillConfirmed, _) => {
                match slot.pending_order.take() {
                    Some(OrderRequest::Entry(order)) => {
                        // The buy requests exactly min_tokens_out, so that is what landed
                        position.tokens_held = order.min_tokens_out;
                        position.entry_cost = order.cost_sol();
                        position.entry_tx_signature = slot.pending_signature.take();
                        position.entry_timestamp = Some(now);
                    }
                    Some(OrderRequest::Exit(_)) => {
                        position.tokens_held = 0;
                    }
                    None => {}
                }
                position.pending_bundle = None;
                position.last_error = None;
            }
            (PositionEvent::Rejected { reason: why } | PositionEvent::EntryAbandoned { reason: why }, _) => {
                slot.pending_order = None;
                slot.pending_signature = None;
                if let Some(bundle) = position.pending_bundle.take() {
                    self.bundles.remove(&bundle);
                }
                position.last_error = Some(why.clone());
                reason = Some(why.clone());
            }
            _ => {}
        }

        if t.exit_round_closed {
            position.exit_rounds += 1;
        }
        position.state = t.to;
        position.updated_at = now;

        if t.to.is_terminal() && !t.from.is_terminal() {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }

        match t.to {
            PositionState::Holding if t.from == PositionState::Buying => info!(
                "✅ Entered {}: {} tokens for {} SOL",
                position.asset_id, position.tokens_held, position.entry_cost
            ),
            PositionState::Sold => info!("💰 Exited {}", position.asset_id),
            PositionState::Failed => warn!(
                "❌ Position {} failed from {}: {}",
                position.asset_id,
                t.from,
                position.last_error.as_deref().unwrap_or("unknown")
            ),
            _ => debug!("{}: {} -> {}", position.asset_id, t.from, t.to),
        }

        Ok(AppliedTransition {
            mint: position.asset_id,
            transition: t,
            reason,
        })
    }
}
