use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::dedup::SignatureCache;
use crate::error::{MalformedInputError, PipelineError};
use crate::models::{AssetDetails, EventKind, Pubkey, TrackedEvent, TradeDetails, TradeSide};

/// Anchor discriminators of the launchpad program instructions.
pub const CREATE_DISCRIMINATOR: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];
pub const BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
pub const SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

// Account positions in the create instruction
const CREATE_MINT: usize = 0;
const CREATE_BONDING_CURVE: usize = 2;
const CREATE_USER: usize = 7;

// Account positions in buy / sell
const TRADE_MINT: usize = 2;
const TRADE_BONDING_CURVE: usize = 3;
const TRADE_USER: usize = 6;

/// One transaction record of an enhanced webhook delivery. Only the fields the
/// pipeline reads are decoded; everything else stays in the raw payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    pub signature: String,
    #[serde(rename = "type", default)]
    pub tx_type: Option<String>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub fee_payer: Option<String>,
    #[serde(default)]
    pub transaction_error: Option<Value>,
    #[serde(default)]
    pub instructions: Vec<ProviderInstruction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInstruction {
    pub program_id: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub inner_instructions: Vec<ProviderInstruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchpadInstruction {
    Create,
    Buy,
    Sell,
}

impl LaunchpadInstruction {
    fn from_discriminator(data: &[u8]) -> Option<Self> {
        let discriminator: [u8; 8] = data.get(..8)?.try_into().ok()?;
        match discriminator {
            CREATE_DISCRIMINATOR => Some(Self::Create),
            BUY_DISCRIMINATOR => Some(Self::Buy),
            SELL_DISCRIMINATOR => Some(Self::Sell),
            _ => None,
        }
    }

    fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            "CREATE" => Some(Self::Create),
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Turns raw webhook deliveries into de-duplicated, classified events.
pub struct EventNormalizer {
    program_id: Pubkey,
    program_id_str: String,
    seen: Mutex<SignatureCache>,
}

impl EventNormalizer {
    pub fn new(program_id: Pubkey, seen: SignatureCache) -> Self {
        Self {
            program_id,
            program_id_str: program_id.to_string(),
            seen: Mutex::new(seen),
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    /// Normalize one delivery. Never fails: malformed input is logged and
    /// skipped, duplicates and records unrelated to the launchpad are dropped.
    /// Output keeps the arrival order of the records.
    pub fn normalize(&self, payload: &Value) -> Vec<TrackedEvent> {
        let Some(records) = payload.as_array() else {
            warn!(
                "⚠️ Unexpected webhook payload: {}",
                PipelineError::MalformedInput(MalformedInputError::NotAnArray)
            );
            return Vec::new();
        };

        if records.is_empty() {
            debug!("Received empty transaction array from webhook");
            return Vec::new();
        }

        let mut events = Vec::new();
        for (index, raw) in records.iter().enumerate() {
            let record: ProviderRecord = match serde_json::from_value(raw.clone()) {
                Ok(record) => record,
                Err(e) => {
                    let err = MalformedInputError::Record {
                        index,
                        reason: e.to_string(),
                    };
                    warn!("Skipping webhook record: {}", PipelineError::MalformedInput(err));
                    continue;
                }
            };

            // A record that fails to classify does not consume its signature,
            // so a corrected redelivery still goes through
            let kind = match self.classify(&record) {
                Ok(kind) => kind,
                Err(err) => {
                    warn!(
                        "Skipping {}: {}",
                        record.signature,
                        PipelineError::MalformedInput(err)
                    );
                    continue;
                }
            };

            if !self.seen.lock().check_and_insert(&record.signature, Utc::now()) {
                debug!("Dropping duplicate notification for {}", record.signature);
                continue;
            }

            if kind == EventKind::Unrecognized {
                debug!(
                    "Ignoring {} ({}) without launchpad instruction",
                    record.signature,
                    record.tx_type.as_deref().unwrap_or("UNKNOWN")
                );
                continue;
            }

            debug!("Normalized {} as {}", record.signature, kind.label());
            events.push(TrackedEvent {
                signature: record.signature,
                kind,
                slot: record.slot,
                raw_payload: raw.clone(),
            });
        }

        events
    }

    /// Classify a decoded record against the launchpad program.
    pub fn classify(&self, record: &ProviderRecord) -> Result<EventKind, MalformedInputError> {
        if record.transaction_error.as_ref().is_some_and(|e| !e.is_null()) {
            return Ok(EventKind::Unrecognized);
        }

        let Some(instruction) = self.find_launchpad_instruction(&record.instructions) else {
            return Ok(EventKind::Unrecognized);
        };

        let data = bs58::decode(&instruction.data).into_vec().unwrap_or_default();
        let decoded = LaunchpadInstruction::from_discriminator(&data);
        let kind = decoded.or_else(|| {
            record
                .tx_type
                .as_deref()
                .and_then(LaunchpadInstruction::from_type_tag)
        });

        let Some(kind) = kind else {
            return Ok(EventKind::Unrecognized);
        };

        // Amounts are only trusted when the discriminator itself matched
        let args = if decoded.is_some() { Some(data.as_slice()) } else { None };

        match kind {
            LaunchpadInstruction::Create => Ok(EventKind::AssetCreated(AssetDetails {
                mint: account_at(instruction, CREATE_MINT, CREATE_USER + 1)?,
                bonding_curve: account_at(instruction, CREATE_BONDING_CURVE, CREATE_USER + 1)?,
                creator: account_at(instruction, CREATE_USER, CREATE_USER + 1)?,
            })),
            LaunchpadInstruction::Buy | LaunchpadInstruction::Sell => {
                let (token_amount, sol_limit) = match args {
                    Some(data) => trade_args(data)?,
                    None => (0, 0),
                };
                Ok(EventKind::TradeOccurred(TradeDetails {
                    mint: account_at(instruction, TRADE_MINT, TRADE_USER + 1)?,
                    bonding_curve: account_at(instruction, TRADE_BONDING_CURVE, TRADE_USER + 1)?,
                    trader: account_at(instruction, TRADE_USER, TRADE_USER + 1)?,
                    side: if kind == LaunchpadInstruction::Buy {
                        TradeSide::Buy
                    } else {
                        TradeSide::Sell
                    },
                    token_amount,
                    sol_limit,
                }))
            }
        }
    }

    // Top-level instructions first, then their inner instructions, in order
    fn find_launchpad_instruction<'a>(
        &self,
        instructions: &'a [ProviderInstruction],
    ) -> Option<&'a ProviderInstruction> {
        instructions
            .iter()
            .find(|ix| ix.program_id == self.program_id_str)
            .or_else(|| {
                instructions
                    .iter()
                    .find_map(|ix| self.find_launchpad_instruction(&ix.inner_instructions))
            })
    }
}

fn account_at(
    instruction: &ProviderInstruction,
    index: usize,
    expected: usize,
) -> Result<Pubkey, MalformedInputError> {
    let account = instruction
        .accounts
        .get(index)
        .ok_or(MalformedInputError::MissingAccounts {
            expected,
            found: instruction.accounts.len(),
        })?;
    account.parse().map_err(|_| MalformedInputError::InvalidKey {
        kind: "pubkey",
        value: account.clone(),
    })
}

fn trade_args(data: &[u8]) -> Result<(u64, u64), MalformedInputError> {
    if data.len() < 24 {
        return Err(MalformedInputError::ShortData {
            expected: 24,
            found: data.len(),
        });
    }
    let read_u64 = |offset: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    };
    Ok((read_u64(8), read_u64(16)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    pub(crate) const PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

    pub(crate) fn key(byte: u8) -> String {
        Pubkey::new_from_array([byte; 32]).to_string()
    }

    pub(crate) fn normalizer() -> EventNormalizer {
        EventNormalizer::new(
            PROGRAM.parse().unwrap(),
            SignatureCache::new(100, Duration::seconds(600)),
        )
    }

    /// Enhanced-webhook record carrying a create instruction for mint `byte`.
    pub(crate) fn create_record(signature: &str, byte: u8, slot: u64) -> Value {
        let accounts: Vec<String> = (0..14u8)
            .map(|i| match i {
                0 => key(byte),
                2 => key(byte.wrapping_add(1)),
                7 => key(byte.wrapping_add(2)),
                other => key(200 + other),
            })
            .collect();
        json!({
            "signature": signature,
            "type": "CREATE",
            "slot": slot,
            "timestamp": 1_700_000_000,
            "feePayer": key(byte.wrapping_add(2)),
            "transactionError": null,
            "instructions": [
                {
                    "programId": "ComputeBudget111111111111111111111111111111",
                    "accounts": [],
                    "data": "3gJqkocMWaMm",
                    "innerInstructions": []
                },
                {
                    "programId": PROGRAM,
                    "accounts": accounts,
                    "data": bs58::encode(CREATE_DISCRIMINATOR).into_string(),
                    "innerInstructions": []
                }
            ]
        })
    }

    fn trade_record(signature: &str, discriminator: [u8; 8], amount: u64, limit: u64) -> Value {
        let mut data = discriminator.to_vec();
        data.extend_from_slice(&amount.to_le_bytes());
        data.extend_from_slice(&limit.to_le_bytes());
        let accounts: Vec<String> = (0..12u8).map(|i| key(50 + i)).collect();
        json!({
            "signature": signature,
            "type": "SWAP",
            "slot": 10,
            "instructions": [
                {
                    "programId": "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
                    "accounts": [],
                    "data": "",
                    "innerInstructions": [
                        {
                            "programId": PROGRAM,
                            "accounts": accounts,
                            "data": bs58::encode(data).into_string()
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_non_array_payload_yields_nothing() {
        let normalizer = normalizer();
        assert!(normalizer.normalize(&json!({ "signature": "x" })).is_empty());
        assert!(normalizer.normalize(&json!("hello")).is_empty());
        assert!(normalizer.normalize(&json!([])).is_empty());
    }

    #[test]
    fn test_create_instruction_is_decoded() {
        let normalizer = normalizer();
        let events = normalizer.normalize(&json!([create_record("sigA", 1, 100)]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signature, "sigA");
        assert_eq!(events[0].slot, Some(100));
        match &events[0].kind {
            EventKind::AssetCreated(details) => {
                assert_eq!(details.mint, Pubkey::new_from_array([1; 32]));
                assert_eq!(details.bonding_curve, Pubkey::new_from_array([2; 32]));
                assert_eq!(details.creator, Pubkey::new_from_array([3; 32]));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_signature_emits_once() {
        let normalizer = normalizer();
        let record = create_record("sigA", 1, 100);
        let first = normalizer.normalize(&json!([record.clone(), record.clone()]));
        assert_eq!(first.len(), 1);
        let again = normalizer.normalize(&json!([record]));
        assert!(again.is_empty());
    }

    #[test]
    fn test_inner_buy_instruction_is_decoded() {
        let normalizer = normalizer();
        let events = normalizer.normalize(&json!([trade_record(
            "sigB",
            BUY_DISCRIMINATOR,
            1_000_000,
            25_000_000
        )]));
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::TradeOccurred(trade) => {
                assert_eq!(trade.side, TradeSide::Buy);
                assert_eq!(trade.mint, Pubkey::new_from_array([52; 32]));
                assert_eq!(trade.bonding_curve, Pubkey::new_from_array([53; 32]));
                assert_eq!(trade.trader, Pubkey::new_from_array([56; 32]));
                assert_eq!(trade.token_amount, 1_000_000);
                assert_eq!(trade.sol_limit, 25_000_000);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_type_tag_fallback_when_discriminator_unknown() {
        let normalizer = normalizer();
        let mut record = create_record("sigC", 9, 5);
        record["instructions"][1]["data"] = json!("");
        let events = normalizer.normalize(&json!([record]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind.label(), "AssetCreated");
    }

    #[test]
    fn test_unrelated_and_malformed_records_are_skipped_in_order() {
        let normalizer = normalizer();
        let unrelated = json!({
            "signature": "sigU",
            "type": "TRANSFER",
            "instructions": [{ "programId": "11111111111111111111111111111111", "accounts": [], "data": "" }]
        });
        let missing_signature = json!({ "type": "CREATE" });
        let mut short_accounts = create_record("sigS", 4, 5);
        short_accounts["instructions"][1]["accounts"] = json!([key(4)]);

        let events = normalizer.normalize(&json!([
            create_record("sig1", 1, 1),
            unrelated,
            missing_signature,
            short_accounts,
            create_record("sig2", 2, 2),
        ]));

        let signatures: Vec<_> = events.iter().map(|e| e.signature.as_str()).collect();
        assert_eq!(signatures, vec!["sig1", "sig2"]);
    }

    #[test]
    fn test_corrected_redelivery_after_malformed_record() {
        let normalizer = normalizer();
        let mut broken = create_record("sigR", 6, 7);
        broken["instructions"][1]["accounts"] = json!([key(6)]);
        assert!(normalizer.normalize(&json!([broken])).is_empty());

        let events = normalizer.normalize(&json!([create_record("sigR", 6, 7)]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signature, "sigR");

        let replay = normalizer.normalize(&json!([create_record("sigR", 6, 7)]));
        assert!(replay.is_empty());
    }

    #[test]
    fn test_invalid_account_key_is_malformed() {
        let normalizer = normalizer();
        let mut record = create_record("sigK", 1, 1);
        record["instructions"][1]["accounts"][0] = json!("not-a-key");
        let parsed: ProviderRecord = serde_json::from_value(record).unwrap();
        assert!(matches!(
            normalizer.classify(&parsed),
            Err(MalformedInputError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_failed_transaction_is_ignored() {
        let normalizer = normalizer();
        let mut record = create_record("sigF", 1, 1);
        record["transactionError"] = json!({ "InstructionError": [1, "Custom"] });
        assert!(normalizer.normalize(&json!([record])).is_empty());
    }
}
