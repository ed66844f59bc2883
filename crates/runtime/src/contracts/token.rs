//! Built-in token contract
//!
//! Minimal fungible-token ledger used to exercise the execution pipeline:
//! mint, transfer and balance queries over per-account u64 balances.

use crate::contracts::{ContractContext, ContractError, SmartContract};
use borsh::{BorshDeserialize, BorshSerialize};
use ledger_types::ContractAddress;

/// Address the registry binds this contract under.
pub fn address() -> ContractAddress {
    ContractAddress::new("token")
}

/// Borsh-encoded command carried in the transaction payload.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub enum TokenCommand {
    /// Credit `amount` to `account`
    Mint { account: String, amount: u64 },
    /// Move `amount` from the sending account to `to`
    Transfer { to: String, amount: u64 },
    /// Query the balance of `account`
    Balance { account: String },
}

impl TokenCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("token command serialization should not fail")
    }
}

pub struct TokenContract;

impl TokenContract {
    fn balance_key(account: &str) -> String {
        format!("balance:{}", account)
    }

    fn read_balance(ctx: &ContractContext<'_, '_>, account: &str) -> Result<u64, ContractError> {
        let stored = ctx.get_state(&Self::balance_key(account))?;
        match stored {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("corrupt balance record for {account}"))?;
                Ok(u64::from_le_bytes(arr))
            }
            None => Ok(0),
        }
    }

    fn write_balance(ctx: &mut ContractContext<'_, '_>, account: &str, amount: u64) {
        ctx.put_state(&Self::balance_key(account), amount.to_le_bytes().to_vec());
    }

    fn sender_account(ctx: &ContractContext<'_, '_>) -> String {
        String::from_utf8_lossy(ctx.sender()).into_owned()
    }
}

impl SmartContract for TokenContract {
    fn process(&self, ctx: &mut ContractContext<'_, '_>) -> Result<(), ContractError> {
        let command: TokenCommand = borsh::from_slice(ctx.payload())
            .map_err(|_| ContractError::rejected("undecodable token command"))?;

        match command {
            TokenCommand::Mint { account, amount } => {
                if amount == 0 {
                    return Err(ContractError::rejected("mint of zero"));
                }
                let balance = Self::read_balance(ctx, &account)?;
                let updated = balance
                    .checked_add(amount)
                    .ok_or_else(|| ContractError::rejected("balance overflow"))?;
                Self::write_balance(ctx, &account, updated);
                Ok(())
            }
            TokenCommand::Transfer { to, amount } => {
                if amount == 0 {
                    return Err(ContractError::rejected("transfer of zero"));
                }
                let from = Self::sender_account(ctx);
                if from == to {
                    return Err(ContractError::rejected("transfer to self"));
                }
                let from_balance = Self::read_balance(ctx, &from)?;
                if from_balance < amount {
                    return Err(ContractError::rejected(format!(
                        "insufficient funds: {} has {}, needs {}",
                        from, from_balance, amount
                    )));
                }
                let to_balance = Self::read_balance(ctx, &to)?;
                let credited = to_balance
                    .checked_add(amount)
                    .ok_or_else(|| ContractError::rejected("balance overflow"))?;
                Self::write_balance(ctx, &from, from_balance - amount);
                Self::write_balance(ctx, &to, credited);
                Ok(())
            }
            TokenCommand::Balance { .. } => {
                Err(ContractError::rejected("balance is a query, not a transaction"))
            }
        }
    }

    fn call(&self, ctx: &mut ContractContext<'_, '_>) -> Result<Vec<u8>, ContractError> {
        let command: TokenCommand = borsh::from_slice(ctx.payload())
            .map_err(|_| ContractError::rejected("undecodable token command"))?;

        match command {
            TokenCommand::Balance { account } => {
                let balance = Self::read_balance(ctx, &account)?;
                Ok(balance.to_le_bytes().to_vec())
            }
            _ => Err(ContractError::rejected("only balance queries are callable")),
        }
    }
}
