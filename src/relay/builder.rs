use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::signature::Signer;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use std::sync::Arc;

use super::pump::{self, CurveAccounts};
use crate::error::SubmissionError;
use crate::models::{ChainSnapshot, OrderRequest, Pubkey, SignedOperation};

// Covers the buy, the token account creation and the tip
const COMPUTE_UNIT_LIMIT: u32 = 200_000;

/// Turns an order into the ordered operations of one bundle, embedding the
/// snapshot's blockhash. Key custody lives behind this trait.
pub trait BundleBuilder: Send + Sync {
    fn build(
        &self,
        order: &OrderRequest,
        snapshot: &ChainSnapshot,
    ) -> Result<Vec<SignedOperation>, SubmissionError>;
}

/// Builds one signed transaction per order: compute budget, the curve trade
/// and the relay tip transfer. The wallet's signer is supplied by the caller.
pub struct TransactionBundleBuilder {
    signer: Arc<dyn Signer + Send + Sync>,
    program: Pubkey,
    tip_account: Pubkey,
}

impl TransactionBundleBuilder {
    pub fn new(signer: Arc<dyn Signer + Send + Sync>, program: Pubkey, tip_account: Pubkey) -> Self {
        Self {
            signer,
            program,
            tip_account,
        }
    }

    pub fn payer(&self) -> Pubkey {
        self.signer.pubkey()
    }

    fn instructions(&self, order: &OrderRequest) -> Vec<Instruction> {
        let payer = self.payer();
        let (fee, tip) = match order {
            OrderRequest::Entry(o) => (o.priority_fee_micro_lamports, o.tip_lamports),
            OrderRequest::Exit(o) => (o.priority_fee_micro_lamports, o.tip_lamports),
        };

        let mut instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(COMPUTE_UNIT_LIMIT),
            ComputeBudgetInstruction::set_compute_unit_price(fee),
        ];

        match order {
            OrderRequest::Entry(o) => {
                let accounts = CurveAccounts::derive(&self.program, &payer, &o.mint, &o.bonding_curve, &o.creator);
                instructions.push(create_associated_token_account_idempotent(
                    &payer,
                    &payer,
                    &o.mint,
                    &spl_token::id(),
                ));
                instructions.push(pump::buy(&accounts, o.min_tokens_out, o.lamports_in));
            }
            OrderRequest::Exit(o) => {
                let accounts = CurveAccounts::derive(&self.program, &payer, &o.mint, &o.bonding_curve, &o.creator);
                instructions.push(pump::sell(&accounts, o.tokens_in, o.min_lamports_out));
            }
        }

        if tip > 0 {
            instructions.push(system_instruction::transfer(&payer, &self.tip_account, tip));
        }
        instructions
    }
}

impl BundleBuilder for TransactionBundleBuilder {
    fn build(
        &self,
        order: &OrderRequest,
        snapshot: &ChainSnapshot,
    ) -> Result<Vec<SignedOperation>, SubmissionError> {
        match order {
            OrderRequest::Entry(o) if o.lamports_in == 0 || o.min_tokens_out == 0 => {
                return Err(SubmissionError::Build("entry order buys nothing".to_string()));
            }
            OrderRequest::Exit(o) if o.tokens_in == 0 => {
                return Err(SubmissionError::Build("exit order sells nothing".to_string()));
            }
            _ => {}
        }

        let payer = self.payer();
        let message = Message::new_with_blockhash(&self.instructions(order), Some(&payer), &snapshot.blockhash);
        let mut tx = Transaction::new_unsigned(message);
        let signer: &dyn Signer = self.signer.as_ref();
        tx.try_sign(&[signer], snapshot.blockhash)
            .map_err(|e| SubmissionError::Build(format!("signing failed: {}", e)))?;

        let bytes = bincode::serialize(&tx)
            .map_err(|e| SubmissionError::Build(format!("serializing transaction: {}", e)))?;
        let id = tx
            .signatures
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| SubmissionError::Build("transaction has no signature".to_string()))?;

        Ok(vec![SignedOperation {
            id,
            payload: bs58::encode(bytes).into_string(),
        }])
    }
}
