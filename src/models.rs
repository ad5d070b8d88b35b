use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use solana_sdk::hash::Hash;
pub use solana_sdk::pubkey::Pubkey;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = solana_sdk::native_token::LAMPORTS_PER_SOL;

/// Latest confirmed slot and a blockhash to embed in outgoing transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub slot: u64,
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
    pub observed_at: DateTime<Utc>,
}

impl ChainSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.observed_at
    }

    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) <= window
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A newly launched asset as described by the launchpad's create instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDetails {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub creator: Pubkey,
}

/// A buy or sell against a bonding curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDetails {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub trader: Pubkey,
    pub side: TradeSide,
    /// Token amount in base units (0 when the instruction data was unavailable)
    pub token_amount: u64,
    /// Max SOL cost for buys, min SOL output for sells, in lamports
    pub sol_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    AssetCreated(AssetDetails),
    TradeOccurred(TradeDetails),
    Unrecognized,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::AssetCreated(_) => "AssetCreated",
            EventKind::TradeOccurred(_) => "TradeOccurred",
            EventKind::Unrecognized => "Unrecognized",
        }
    }
}

/// A provider transaction record classified against the launchpad program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEvent {
    pub signature: String,
    pub kind: EventKind,
    pub slot: Option<u64>,
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionState {
    Monitoring,
    Buying,
    Holding,
    Selling,
    Sold,
    Failed,
}

impl PositionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Sold | PositionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Monitoring => "monitoring",
            PositionState::Buying => "buying",
            PositionState::Holding => "holding",
            PositionState::Selling => "selling",
            PositionState::Sold => "sold",
            PositionState::Failed => "failed",
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle record of one tracked asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinPosition {
    pub asset_id: Pubkey,
    pub curve_id: Pubkey,
    pub creator: Pubkey,
    pub state: PositionState,
    pub tokens_held: u64,
    /// SOL spent on entry
    pub entry_cost: Decimal,
    pub entry_tx_signature: Option<String>,
    pub entry_timestamp: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Exit rounds that ended rejected
    pub exit_rounds: u32,
    pub pending_bundle: Option<String>,
    pub last_error: Option<String>,
}

impl CoinPosition {
    pub fn new(details: &AssetDetails, now: DateTime<Utc>) -> Self {
        Self {
            asset_id: details.mint,
            curve_id: details.bonding_curve,
            creator: details.creator,
            state: PositionState::Monitoring,
            tokens_held: 0,
            entry_cost: Decimal::ZERO,
            entry_tx_signature: None,
            entry_timestamp: None,
            detected_at: now,
            updated_at: now,
            exit_rounds: 0,
            pending_bundle: None,
            last_error: None,
        }
    }
}

/// Which on-chain action a bundle performs for its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    Entry,
    Exit,
}

impl Leg {
    /// State a position sits in while a bundle for this leg is outstanding.
    pub fn in_flight_state(&self) -> PositionState {
        match self {
            Leg::Entry => PositionState::Buying,
            Leg::Exit => PositionState::Selling,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Entry => "entry",
            Leg::Exit => "exit",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryOrder {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    /// Launch creator; the curve pays creator fees into a vault derived from it
    pub creator: Pubkey,
    /// Most SOL the buy may spend, fee included
    pub lamports_in: u64,
    /// Curve quote for `lamports_in` at detection time
    pub expected_tokens: u64,
    /// Exact token amount the buy requests
    pub min_tokens_out: u64,
    pub priority_fee_micro_lamports: u64,
    pub tip_lamports: u64,
}

impl EntryOrder {
    pub fn cost_sol(&self) -> Decimal {
        lamports_to_sol(self.lamports_in)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitOrder {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub creator: Pubkey,
    pub tokens_in: u64,
    pub min_lamports_out: u64,
    pub priority_fee_micro_lamports: u64,
    pub tip_lamports: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderRequest {
    Entry(EntryOrder),
    Exit(ExitOrder),
}

impl OrderRequest {
    pub fn leg(&self) -> Leg {
        match self {
            OrderRequest::Entry(_) => Leg::Entry,
            OrderRequest::Exit(_) => Leg::Exit,
        }
    }

    pub fn mint(&self) -> Pubkey {
        match self {
            OrderRequest::Entry(order) => order.mint,
            OrderRequest::Exit(order) => order.mint,
        }
    }
}

/// One signed transaction of a bundle, ready for the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedOperation {
    /// First signature of the transaction, base58
    pub id: String,
    /// base58 of the bincode-serialized transaction
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BundleOutcome {
    Pending,
    Accepted,
    Rejected(String),
}

impl BundleOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            BundleOutcome::Pending => "pending",
            BundleOutcome::Accepted => "accepted",
            BundleOutcome::Rejected(_) => "rejected",
        }
    }
}

/// A bundle handed to the relay, one per attempt of an entry or exit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleSubmission {
    pub bundle_id: String,
    pub asset_id: Pubkey,
    pub leg: Leg,
    pub attempt: u32,
    pub instructions: Vec<SignedOperation>,
    pub snapshot_used: ChainSnapshot,
    pub submitted_at: DateTime<Utc>,
    pub outcome: BundleOutcome,
}

/// Outcome notification delivered by the relay for a bundle id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayOutcome {
    pub bundle_id: String,
    pub accepted: bool,
    pub rejection_reason: Option<String>,
}

impl RelayOutcome {
    pub fn accepted(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            accepted: true,
            rejection_reason: None,
        }
    }

    pub fn rejected(bundle_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            accepted: false,
            rejection_reason: Some(reason.into()),
        }
    }
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}
