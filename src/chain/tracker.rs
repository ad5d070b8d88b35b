use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::client::ChainClient;
use crate::error::{PipelineError, TrackerError, UpstreamError};
use crate::models::{ChainSnapshot, Hash};

/// Health of the tracked chain state, modelled on a circuit breaker: after too
/// many consecutive failed refreshes the snapshot is considered stale and must
/// not be used for submissions until a refresh succeeds again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackerHealth {
    Fresh,
    Stale,
}

/// Outcome of a single refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// Candidate carried a lower slot than the one already held
    Discarded,
    /// Another refresh was already running
    Skipped,
    Failed,
}

/// Holds the refresh flag for the lifetime of one refresh. Dropping it clears
/// the flag, including when the refresh future is cancelled or panics.
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps a rolling view of the current slot and a fresh blockhash.
///
/// Single writer (the refresh loop), many readers. Readers never block on a
/// refresh in progress.
pub struct ChainStateTracker {
    client: Arc<dyn ChainClient>,
    snapshot: RwLock<Option<ChainSnapshot>>,
    refreshing: AtomicBool,
    consecutive_failures: AtomicU32,
    stale_after_failures: u32,
    updated: Notify,
}

impl ChainStateTracker {
    pub fn new(client: Arc<dyn ChainClient>, stale_after_failures: u32) -> Self {
        Self {
            client,
            snapshot: RwLock::new(None),
            refreshing: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            stale_after_failures: stale_after_failures.max(1),
            updated: Notify::new(),
        }
    }

    /// Run the first refresh inline and, if it succeeds, spawn the periodic
    /// refresh loop. There is no baseline to fall back on yet, so a failing
    /// first fetch is returned to the caller.
    pub async fn start(self: &Arc<Self>, interval: Duration) -> Result<JoinHandle<()>, TrackerError> {
        let (slot, recent) = self.fetch().await.map_err(TrackerError::InitialRefresh)?;
        self.apply(ChainSnapshot {
            slot,
            blockhash: recent.blockhash,
            last_valid_block_height: recent.last_valid_block_height,
            observed_at: Utc::now(),
        });

        info!(
            "⛓️ Chain state tracker started at slot {} (refresh every {}ms)",
            slot,
            interval.as_millis()
        );

        let tracker = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately and the baseline is already in place
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let tracker = Arc::clone(&tracker);
                // Refreshes run detached so a slow upstream call makes the next
                // tick find the guard taken and skip instead of queueing.
                tokio::spawn(async move {
                    tracker.refresh().await;
                });
            }
        }))
    }

    /// Latest snapshot, if any refresh has ever succeeded.
    pub fn snapshot(&self) -> Option<ChainSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn current_slot(&self) -> Option<u64> {
        self.snapshot.read().as_ref().map(|s| s.slot)
    }

    pub fn health(&self) -> TrackerHealth {
        if self.consecutive_failures.load(Ordering::Acquire) >= self.stale_after_failures {
            TrackerHealth::Stale
        } else {
            TrackerHealth::Fresh
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Snapshot suitable for a trade submission: tracker healthy and the
    /// snapshot observed within `freshness`.
    pub fn usable_snapshot(&self, freshness: chrono::Duration) -> Option<ChainSnapshot> {
        if self.health() == TrackerHealth::Stale {
            return None;
        }
        self.snapshot()
            .filter(|snapshot| snapshot.is_fresh(freshness, Utc::now()))
    }

    /// Wait until a usable snapshot carries a blockhash not in `used`, or give
    /// up after `timeout`.
    pub async fn wait_for_fresh_blockhash(
        &self,
        used: &[Hash],
        freshness: chrono::Duration,
        timeout: Duration,
    ) -> Option<ChainSnapshot> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(snapshot) = self.usable_snapshot(freshness) {
                if !used.contains(&snapshot.blockhash) {
                    return Some(snapshot);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("Timed out waiting for a blockhash not used before");
                return None;
            }
        }
    }

    /// One refresh cycle guarded against concurrent execution.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_guard) = RefreshGuard::acquire(&self.refreshing) else {
            debug!("Previous slot/blockhash refresh still in flight, skipping tick");
            return RefreshOutcome::Skipped;
        };

        match self.fetch().await {
            Ok((slot, recent)) => {
                let candidate = ChainSnapshot {
                    slot,
                    blockhash: recent.blockhash,
                    last_valid_block_height: recent.last_valid_block_height,
                    observed_at: Utc::now(),
                };
                self.record_success();
                if self.apply(candidate) {
                    RefreshOutcome::Updated
                } else {
                    RefreshOutcome::Discarded
                }
            }
            Err(e) => {
                self.record_failure(PipelineError::TransientUpstream(e));
                RefreshOutcome::Failed
            }
        }
    }

    async fn fetch(&self) -> Result<(u64, super::client::RecentBlockhash), UpstreamError> {
        tokio::try_join!(self.client.get_slot(), self.client.get_latest_blockhash())
    }

    /// Replace the held snapshot unless the candidate's slot is lower.
    /// Returns whether the candidate was installed.
    pub(crate) fn apply(&self, candidate: ChainSnapshot) -> bool {
        {
            let mut current = self.snapshot.write();
            if let Some(held) = current.as_ref() {
                if candidate.slot < held.slot {
                    debug!(
                        "Discarding snapshot for slot {} (holding slot {})",
                        candidate.slot, held.slot
                    );
                    return false;
                }
            }
            *current = Some(candidate);
        }
        self.updated.notify_waiters();
        true
    }

    fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if previous >= self.stale_after_failures {
            info!(
                "✅ Chain state recovered after {} consecutive failed refreshes",
                previous
            );
        }
    }

    fn record_failure(&self, err: PipelineError) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        warn!("Failed to refresh slot/blockhash ({} in a row): {}", failures, err);

        if failures == self.stale_after_failures {
            error!(
                "🚨 Chain state marked stale after {} consecutive failures; submissions blocked until recovery",
                failures
            );
        }
    }
}
