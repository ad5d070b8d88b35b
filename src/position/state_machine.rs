use serde::Serialize;

use crate::error::TransitionError;
use crate::models::{CoinPosition, EntryOrder, ExitOrder, PositionState};

/// Bounds applied by the position lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionLimits {
    pub max_active_positions: usize,
    pub max_exit_rounds: u32,
    /// How far behind the tracked slot a creation may be and still be traded
    pub max_detection_lag_slots: u64,
}

impl Default for TransitionLimits {
    fn default() -> Self {
        Self {
            max_active_positions: 1,
            max_exit_rounds: 3,
            max_detection_lag_slots: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    EntryDecided {
        order: EntryOrder,
        snapshot_available: bool,
    },
    /// Monitoring ended without an entry being submitted
    EntryAbandoned { reason: String },
    FillConfirmed,
    /// Relay rejection, resolution timeout or a failure before submission
    Rejected { reason: String },
    ExitTriggered {
        order: ExitOrder,
        snapshot_available: bool,
    },
}

impl PositionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PositionEvent::EntryDecided { .. } => "EntryDecided",
            PositionEvent::EntryAbandoned { .. } => "EntryAbandoned",
            PositionEvent::FillConfirmed => "FillConfirmed",
            PositionEvent::Rejected { .. } => "Rejected",
            PositionEvent::ExitTriggered { .. } => "ExitTriggered",
        }
    }
}

/// Work the caller must perform after committing a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    None,
    SubmitEntry(EntryOrder),
    SubmitExit(ExitOrder),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: PositionState,
    pub to: PositionState,
    #[serde(skip)]
    pub effect: SideEffect,
    /// Whether the transition closes an exit round
    pub exit_round_closed: bool,
}

impl Transition {
    fn to(from: PositionState, to: PositionState) -> Self {
        Self {
            from,
            to,
            effect: SideEffect::None,
            exit_round_closed: false,
        }
    }
}

/// Admission check for a newly detected asset.
pub fn admit(
    already_tracked: bool,
    active: usize,
    event_slot: Option<u64>,
    current_slot: Option<u64>,
    limits: &TransitionLimits,
    asset: &str,
) -> Result<(), TransitionError> {
    if already_tracked {
        return Err(TransitionError::AlreadyTracked(asset.to_string()));
    }

    if active >= limits.max_active_positions {
        return Err(TransitionError::CapacityReached {
            active,
            limit: limits.max_active_positions,
        });
    }

    if let (Some(event_slot), Some(current_slot)) = (event_slot, current_slot) {
        let lag = current_slot.saturating_sub(event_slot);
        if lag > limits.max_detection_lag_slots {
            return Err(TransitionError::OutOfScope { event_slot, lag });
        }
    }

    Ok(())
}

/// Pure lifecycle transition. Never performs the side effect it returns.
pub fn transition(
    position: &CoinPosition,
    event: &PositionEvent,
    limits: &TransitionLimits,
) -> Result<Transition, TransitionError> {
    use PositionState::*;

    let from = position.state;
    match (from, event) {
        (Monitoring, PositionEvent::EntryDecided { order, snapshot_available }) => {
            if !snapshot_available {
                return Err(TransitionError::GuardFailed {
                    state: from,
                    event: event.name(),
                    reason: "no valid chain snapshot",
                });
            }
            Ok(Transition {
                effect: SideEffect::SubmitEntry(order.clone()),
                ..Transition::to(from, Buying)
            })
        }
        (Monitoring, PositionEvent::EntryAbandoned { .. }) => Ok(Transition::to(from, Failed)),
        (Buying, PositionEvent::FillConfirmed) => Ok(Transition::to(from, Holding)),
        (Buying, PositionEvent::Rejected { .. }) => Ok(Transition::to(from, Failed)),
        (Holding, PositionEvent::ExitTriggered { order, snapshot_available }) => {
            if !snapshot_available {
                return Err(TransitionError::GuardFailed {
                    state: from,
                    event: event.name(),
                    reason: "no valid chain snapshot",
                });
            }
            if position.tokens_held == 0 {
                return Err(TransitionError::GuardFailed {
                    state: from,
                    event: event.name(),
                    reason: "nothing to sell",
                });
            }
            Ok(Transition {
                effect: SideEffect::SubmitExit(order.clone()),
                ..Transition::to(from, Selling)
            })
        }
        (Selling, PositionEvent::FillConfirmed) => Ok(Transition::to(from, Sold)),
        (Selling, PositionEvent::Rejected { .. }) => {
            let rounds = position.exit_rounds + 1;
            let to = if rounds < limits.max_exit_rounds {
                Holding
            } else {
                Failed
            };
            Ok(Transition {
                exit_round_closed: true,
                ..Transition::to(from, to)
            })
        }
        (from, event) => Err(TransitionError::InvalidTransition {
            from,
            event: event.name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetDetails, Pubkey};
    use chrono::Utc;

    fn position(state: PositionState) -> CoinPosition {
        let mut position = CoinPosition::new(
            &AssetDetails {
                mint: Pubkey::new_from_array([1; 32]),
                bonding_curve: Pubkey::new_from_array([2; 32]),
                creator: Pubkey::new_from_array([3; 32]),
            },
            Utc::now(),
        );
        position.state = state;
        position
    }

    fn entry_order() -> EntryOrder {
        EntryOrder {
            mint: Pubkey::new_from_array([1; 32]),
            bonding_curve: Pubkey::new_from_array([2; 32]),
            creator: Pubkey::new_from_array([3; 32]),
            lamports_in: 10_000_000,
            expected_tokens: 350_000_000_000,
            min_tokens_out: 332_500_000_000,
            priority_fee_micro_lamports: 100_000,
            tip_lamports: 10_000,
        }
    }

    fn exit_order() -> ExitOrder {
        ExitOrder {
            mint: Pubkey::new_from_array([1; 32]),
            bonding_curve: Pubkey::new_from_array([2; 32]),
            creator: Pubkey::new_from_array([3; 32]),
            tokens_in: 350_000_000_000,
            min_lamports_out: 0,
            priority_fee_micro_lamports: 100_000,
            tip_lamports: 10_000,
        }
    }

    fn rejected() -> PositionEvent {
        PositionEvent::Rejected {
            reason: "bundle failed".to_string(),
        }
    }

    #[test]
    fn test_entry_requires_snapshot() {
        let limits = TransitionLimits::default();
        let monitoring = position(PositionState::Monitoring);

        let err = transition(
            &monitoring,
            &PositionEvent::EntryDecided {
                order: entry_order(),
                snapshot_available: false,
            },
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::GuardFailed { .. }));

        let ok = transition(
            &monitoring,
            &PositionEvent::EntryDecided {
                order: entry_order(),
                snapshot_available: true,
            },
            &limits,
        )
        .unwrap();
        assert_eq!(ok.to, PositionState::Buying);
        assert_eq!(ok.effect, SideEffect::SubmitEntry(entry_order()));
    }

    #[test]
    fn test_entry_lifecycle() {
        let limits = TransitionLimits::default();
        let t = transition(&position(PositionState::Buying), &PositionEvent::FillConfirmed, &limits).unwrap();
        assert_eq!(t.to, PositionState::Holding);
        assert_eq!(t.effect, SideEffect::None);

        let t = transition(&position(PositionState::Buying), &rejected(), &limits).unwrap();
        assert_eq!(t.to, PositionState::Failed);

        let abandoned = PositionEvent::EntryAbandoned {
            reason: "no snapshot".to_string(),
        };
        let t = transition(&position(PositionState::Monitoring), &abandoned, &limits).unwrap();
        assert_eq!(t.to, PositionState::Failed);
        assert!(transition(&position(PositionState::Buying), &abandoned, &limits).is_err());
    }

    #[test]
    fn test_exit_rejection_returns_to_holding_until_rounds_spent() {
        let limits = TransitionLimits {
            max_exit_rounds: 2,
            ..TransitionLimits::default()
        };
        let mut selling = position(PositionState::Selling);

        let t = transition(&selling, &rejected(), &limits).unwrap();
        assert_eq!(t.to, PositionState::Holding);
        assert!(t.exit_round_closed);

        selling.exit_rounds = 1;
        let t = transition(&selling, &rejected(), &limits).unwrap();
        assert_eq!(t.to, PositionState::Failed);
    }

    #[test]
    fn test_exit_requires_tokens() {
        let limits = TransitionLimits::default();
        let mut holding = position(PositionState::Holding);
        let event = PositionEvent::ExitTriggered {
            order: exit_order(),
            snapshot_available: true,
        };

        assert!(transition(&holding, &event, &limits).is_err());

        holding.tokens_held = 1;
        let t = transition(&holding, &event, &limits).unwrap();
        assert_eq!(t.to, PositionState::Selling);
        assert_eq!(t.effect, SideEffect::SubmitExit(exit_order()));

        let t = transition(&position(PositionState::Selling), &PositionEvent::FillConfirmed, &limits).unwrap();
        assert_eq!(t.to, PositionState::Sold);
    }

    #[test]
    fn test_invalid_transitions() {
        let limits = TransitionLimits::default();
        for state in [PositionState::Sold, PositionState::Failed, PositionState::Monitoring] {
            let err = transition(&position(state), &PositionEvent::FillConfirmed, &limits).unwrap_err();
            assert_eq!(
                err,
                TransitionError::InvalidTransition {
                    from: state,
                    event: "FillConfirmed"
                }
            );
        }
        let err = transition(
            &position(PositionState::Buying),
            &PositionEvent::EntryDecided {
                order: entry_order(),
                snapshot_available: true,
            },
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_admission() {
        let limits = TransitionLimits::default();
        assert!(admit(false, 0, Some(100), Some(120), &limits, "m").is_ok());
        assert!(admit(false, 0, None, Some(120), &limits, "m").is_ok());
        assert_eq!(
            admit(true, 0, None, None, &limits, "m").unwrap_err(),
            TransitionError::AlreadyTracked("m".to_string())
        );
        assert_eq!(
            admit(false, 1, None, None, &limits, "m").unwrap_err(),
            TransitionError::CapacityReached { active: 1, limit: 1 }
        );
        assert_eq!(
            admit(false, 0, Some(100), Some(251), &limits, "m").unwrap_err(),
            TransitionError::OutOfScope {
                event_slot: 100,
                lag: 151
            }
        );
    }
}
