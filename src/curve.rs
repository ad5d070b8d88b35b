//! Constant-product bonding curve quotes for freshly launched assets.

/// Virtual reserves right after the create instruction.
pub const INITIAL_VIRTUAL_SOL_RESERVES: u64 = 30_000_000_000;
pub const INITIAL_VIRTUAL_TOKEN_RESERVES: u64 = 1_073_000_000_000_000;
pub const INITIAL_REAL_TOKEN_RESERVES: u64 = 793_100_000_000_000;

/// Protocol fee charged on both sides of a trade, in basis points.
pub const DEFAULT_FEE_BPS: u64 = 100;

const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveReserves {
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_token_reserves: u64,
}

impl Default for CurveReserves {
    fn default() -> Self {
        Self::initial()
    }
}

impl CurveReserves {
    pub const fn initial() -> Self {
        Self {
            virtual_sol_reserves: INITIAL_VIRTUAL_SOL_RESERVES,
            virtual_token_reserves: INITIAL_VIRTUAL_TOKEN_RESERVES,
            real_token_reserves: INITIAL_REAL_TOKEN_RESERVES,
        }
    }

    /// Tokens received for spending `lamports_in` in total, fee included.
    pub fn quote_buy(&self, lamports_in: u64, fee_bps: u64) -> u64 {
        if lamports_in == 0 {
            return 0;
        }
        let net = lamports_in as u128 * BPS_DENOMINATOR / (BPS_DENOMINATOR + fee_bps as u128);
        let vs = self.virtual_sol_reserves as u128;
        let vt = self.virtual_token_reserves as u128;

        let k = vs * vt;
        let new_vt = k / (vs + net) + 1;
        let out = vt.saturating_sub(new_vt);

        out.min(self.real_token_reserves as u128) as u64
    }

    /// Lamports received for selling `tokens_in`, net of the fee.
    pub fn quote_sell(&self, tokens_in: u64, fee_bps: u64) -> u64 {
        if tokens_in == 0 {
            return 0;
        }
        let vs = self.virtual_sol_reserves as u128;
        let vt = self.virtual_token_reserves as u128;

        let gross = tokens_in as u128 * vs / (vt + tokens_in as u128);
        let fee = gross * fee_bps as u128 / BPS_DENOMINATOR;

        gross.saturating_sub(fee) as u64
    }
}

/// Lower bound for an output amount after `slippage_bps` tolerance.
pub fn apply_slippage_floor(amount: u64, slippage_bps: u64) -> u64 {
    let bps = (slippage_bps as u128).min(BPS_DENOMINATOR);
    (amount as u128 * (BPS_DENOMINATOR - bps) / BPS_DENOMINATOR) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_quote_on_fresh_curve() {
        let curve = CurveReserves::initial();
        // 0.01 SOL with no fee buys roughly 357k tokens (6 decimals)
        let tokens = curve.quote_buy(10_000_000, 0);
        assert!(tokens > 357_000_000_000 && tokens < 358_000_000_000, "{}", tokens);

        let with_fee = curve.quote_buy(10_000_000, DEFAULT_FEE_BPS);
        assert!(with_fee < tokens);
    }

    #[test]
    fn test_buy_quote_capped_by_real_reserves() {
        let curve = CurveReserves::initial();
        let tokens = curve.quote_buy(1_000_000_000_000, 0);
        assert_eq!(tokens, INITIAL_REAL_TOKEN_RESERVES);
    }

    #[test]
    fn test_sell_quote_never_exceeds_sol_reserves() {
        let curve = CurveReserves::initial();
        let lamports = curve.quote_sell(u64::MAX / 2, 0);
        assert!(lamports < INITIAL_VIRTUAL_SOL_RESERVES);
        assert_eq!(curve.quote_sell(0, 100), 0);
    }

    #[test]
    fn test_slippage_floor() {
        assert_eq!(apply_slippage_floor(10_000, 500), 9_500);
        assert_eq!(apply_slippage_floor(10_000, 0), 10_000);
        assert_eq!(apply_slippage_floor(10_000, 20_000), 0);
    }
}
