//! Bonding-curve buy and sell instructions for the launchpad program.

use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use spl_associated_token_account::get_associated_token_address_with_program_id;

use crate::ingest::normalizer::{BUY_DISCRIMINATOR, SELL_DISCRIMINATOR};

/// Protocol fee recipient named in the program's global config.
pub const FEE_RECIPIENT: Pubkey = solana_sdk::pubkey!("CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbicfhtW4xC9iM");
pub const FEE_PROGRAM: Pubkey = solana_sdk::pubkey!("pfeeUxB6jkeY1Hxd7CsFCAjcbHA9rWtchMGdZ6VojVZ");

/// Accounts shared by buys and sells of one mint for one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveAccounts {
    pub program: Pubkey,
    pub global: Pubkey,
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub associated_bonding_curve: Pubkey,
    pub associated_user: Pubkey,
    pub user: Pubkey,
    pub creator_vault: Pubkey,
    pub event_authority: Pubkey,
    pub fee_config: Pubkey,
}

impl CurveAccounts {
    pub fn derive(program: &Pubkey, user: &Pubkey, mint: &Pubkey, bonding_curve: &Pubkey, creator: &Pubkey) -> Self {
        let token_program = spl_token::id();
        let (global, _) = Pubkey::find_program_address(&[b"global"], program);
        let (creator_vault, _) =
            Pubkey::find_program_address(&[b"creator-vault", creator.as_ref()], program);
        let (event_authority, _) = Pubkey::find_program_address(&[b"__event_authority"], program);
        let (fee_config, _) =
            Pubkey::find_program_address(&[b"fee_config", program.as_ref()], &FEE_PROGRAM);

        Self {
            program: *program,
            global,
            mint: *mint,
            bonding_curve: *bonding_curve,
            associated_bonding_curve: get_associated_token_address_with_program_id(
                bonding_curve,
                mint,
                &token_program,
            ),
            associated_user: get_associated_token_address_with_program_id(user, mint, &token_program),
            user: *user,
            creator_vault,
            event_authority,
            fee_config,
        }
    }
}

/// Buy exactly `token_amount`, spending at most `max_sol_cost` lamports.
pub fn buy(accounts: &CurveAccounts, token_amount: u64, max_sol_cost: u64) -> Instruction {
    let (global_volume, _) =
        Pubkey::find_program_address(&[b"global_volume_accumulator"], &accounts.program);
    let (user_volume, _) = Pubkey::find_program_address(
        &[b"user_volume_accumulator", accounts.user.as_ref()],
        &accounts.program,
    );

    Instruction {
        program_id: accounts.program,
        accounts: vec![
            AccountMeta::new_readonly(accounts.global, false),
            AccountMeta::new(FEE_RECIPIENT, false),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new(accounts.bonding_curve, false),
            AccountMeta::new(accounts.associated_bonding_curve, false),
            AccountMeta::new(accounts.associated_user, false),
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new(accounts.creator_vault, false),
            AccountMeta::new_readonly(accounts.event_authority, false),
            AccountMeta::new_readonly(accounts.program, false),
            AccountMeta::new(global_volume, false),
            AccountMeta::new(user_volume, false),
            AccountMeta::new_readonly(accounts.fee_config, false),
            AccountMeta::new_readonly(FEE_PROGRAM, false),
        ],
        data: trade_data(BUY_DISCRIMINATOR, token_amount, max_sol_cost),
    }
}

/// Sell `token_amount`, receiving at least `min_sol_output` lamports.
pub fn sell(accounts: &CurveAccounts, token_amount: u64, min_sol_output: u64) -> Instruction {
    Instruction {
        program_id: accounts.program,
        accounts: vec![
            AccountMeta::new_readonly(accounts.global, false),
            AccountMeta::new(FEE_RECIPIENT, false),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new(accounts.bonding_curve, false),
            AccountMeta::new(accounts.associated_bonding_curve, false),
            AccountMeta::new(accounts.associated_user, false),
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new(accounts.creator_vault, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(accounts.event_authority, false),
            AccountMeta::new_readonly(accounts.program, false),
            AccountMeta::new_readonly(accounts.fee_config, false),
            AccountMeta::new_readonly(FEE_PROGRAM, false),
        ],
        data: trade_data(SELL_DISCRIMINATOR, token_amount, min_sol_output),
    }
}

fn trade_data(discriminator: [u8; 8], amount: u64, limit: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(&limit.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PUMP_FUN_PROGRAM;

    fn accounts() -> CurveAccounts {
        CurveAccounts::derive(
            &PUMP_FUN_PROGRAM,
            &Pubkey::new_from_array([7; 32]),
            &Pubkey::new_from_array([1; 32]),
            &Pubkey::new_from_array([2; 32]),
            &Pubkey::new_from_array([3; 32]),
        )
    }

    #[test]
    fn test_derived_program_accounts_match_published_addresses() {
        let accounts = accounts();
        assert_eq!(
            accounts.global.to_string(),
            "4wTV1YmiEkRvAtNtsSGPtUrqRYQMe5SKy2uB4Jjaxnjf"
        );
        assert_eq!(
            accounts.event_authority.to_string(),
            "Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1"
        );
    }

    #[test]
    fn test_buy_layout() {
        let accounts = accounts();
        let ix = buy(&accounts, 95, 10_000_000);
        assert_eq!(ix.program_id, PUMP_FUN_PROGRAM);
        assert_eq!(ix.accounts.len(), 16);
        assert_eq!(ix.accounts[6].pubkey, accounts.user);
        assert!(ix.accounts[6].is_signer);
        assert!(ix.accounts.iter().filter(|m| m.is_signer).count() == 1);

        assert_eq!(&ix.data[..8], &BUY_DISCRIMINATOR);
        assert_eq!(u64::from_le_bytes(ix.data[8..16].try_into().unwrap()), 95);
        assert_eq!(u64::from_le_bytes(ix.data[16..24].try_into().unwrap()), 10_000_000);
    }

    #[test]
    fn test_sell_layout() {
        let accounts = accounts();
        let ix = sell(&accounts, 500, 1);
        assert_eq!(ix.accounts.len(), 14);
        assert_eq!(ix.accounts[8].pubkey, accounts.creator_vault);
        assert_eq!(ix.accounts[9].pubkey, spl_token::id());
        assert_eq!(&ix.data[..8], &SELL_DISCRIMINATOR);
    }
}
