use chrono::{DateTime, Duration, Utc};

use crate::curve::{apply_slippage_floor, CurveReserves, DEFAULT_FEE_BPS};
use crate::models::{AssetDetails, CoinPosition, EntryOrder, ExitOrder, TradeDetails, TradeSide};

/// Entry and exit decisions. Plugged into the pipeline so trading logic can
/// change without touching the lifecycle.
pub trait TradeDecider: Send + Sync {
    /// Order to enter a freshly detected asset, or None to stay out.
    fn on_created(&self, details: &AssetDetails) -> Option<EntryOrder>;

    /// Whether a trade by someone else should trigger our exit.
    fn exit_on_trade(&self, position: &CoinPosition, trade: &TradeDetails) -> bool;

    /// Whether a held position is due for exit at `now`.
    fn exit_due(&self, position: &CoinPosition, now: DateTime<Utc>) -> bool;

    fn exit_order(&self, position: &CoinPosition) -> ExitOrder;
}

/// Fixed-size entries on every launch; exit after a hold period or as soon as
/// the creator sells.
#[derive(Debug, Clone)]
pub struct FixedSizeDecider {
    pub buy_lamports: u64,
    pub slippage_bps: u64,
    pub priority_fee_micro_lamports: u64,
    pub tip_lamports: u64,
    pub max_hold: Duration,
}

impl TradeDecider for FixedSizeDecider {
    fn on_created(&self, details: &AssetDetails) -> Option<EntryOrder> {
        if self.buy_lamports == 0 {
            return None;
        }
        let expected_tokens = CurveReserves::initial().quote_buy(self.buy_lamports, DEFAULT_FEE_BPS);
        Some(EntryOrder {
            mint: details.mint,
            bonding_curve: details.bonding_curve,
            creator: details.creator,
            lamports_in: self.buy_lamports,
            expected_tokens,
            min_tokens_out: apply_slippage_floor(expected_tokens, self.slippage_bps),
            priority_fee_micro_lamports: self.priority_fee_micro_lamports,
            tip_lamports: self.tip_lamports,
        })
    }

    fn exit_on_trade(&self, position: &CoinPosition, trade: &TradeDetails) -> bool {
        trade.mint == position.asset_id
            && trade.side == TradeSide::Sell
            && trade.trader == position.creator
    }

    fn exit_due(&self, position: &CoinPosition, now: DateTime<Utc>) -> bool {
        position
            .entry_timestamp
            .is_some_and(|entered| now - entered >= self.max_hold)
    }

    fn exit_order(&self, position: &CoinPosition) -> ExitOrder {
        ExitOrder {
            mint: position.asset_id,
            bonding_curve: position.curve_id,
            creator: position.creator,
            tokens_in: position.tokens_held,
            // Live curve reserves are not tracked, so no floor is enforced
            min_lamports_out: 0,
            priority_fee_micro_lamports: self.priority_fee_micro_lamports,
            tip_lamports: self.tip_lamports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionState, Pubkey};

    fn decider() -> FixedSizeDecider {
        FixedSizeDecider {
            buy_lamports: 10_000_000,
            slippage_bps: 500,
            priority_fee_micro_lamports: 100_000,
            tip_lamports: 10_000,
            max_hold: Duration::seconds(60),
        }
    }

    fn details() -> AssetDetails {
        AssetDetails {
            mint: Pubkey::new_from_array([1; 32]),
            bonding_curve: Pubkey::new_from_array([2; 32]),
            creator: Pubkey::new_from_array([3; 32]),
        }
    }

    #[test]
    fn test_entry_sized_from_initial_curve() {
        let order = decider().on_created(&details()).unwrap();
        assert_eq!(order.lamports_in, 10_000_000);
        assert!(order.expected_tokens > 0);
        assert_eq!(order.min_tokens_out, order.expected_tokens * 95 / 100);
    }

    #[test]
    fn test_exit_triggers() {
        let d = decider();
        let now = Utc::now();
        let mut position = CoinPosition::new(&details(), now);
        position.state = PositionState::Holding;
        position.tokens_held = 42;

        assert!(!d.exit_due(&position, now));
        position.entry_timestamp = Some(now - Duration::seconds(61));
        assert!(d.exit_due(&position, now));

        let mut trade = TradeDetails {
            mint: position.asset_id,
            bonding_curve: position.curve_id,
            trader: position.creator,
            side: TradeSide::Sell,
            token_amount: 1,
            sol_limit: 0,
        };
        assert!(d.exit_on_trade(&position, &trade));
        trade.side = TradeSide::Buy;
        assert!(!d.exit_on_trade(&position, &trade));

        assert_eq!(d.exit_order(&position).tokens_in, 42);
    }
}
