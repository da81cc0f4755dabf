//! Token Custody Seam
//!
//! The engine never touches token transfers directly; it calls through the
//! [`Custody`] trait and trusts the host for settlement. All positions share
//! one pooled balance per asset; per-position entitlements are computed from
//! the accumulated-ratio series, never from balances.
//!
//! [`InMemoryCustody`] is the in-process implementation used by tests and the
//! keeper's simulation mode: a shared ledger over `Arc<DashMap>`, cloneable
//! so the simulated market and the engine see the same balances.
//!
//! Author: AI-Generated
//! Created: 2026-02-04

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Settlement failures reported by the custody host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("insufficient balance of {token} for {holder}")]
    InsufficientBalance { token: Address, holder: Address },
    #[error("insufficient allowance of {token} from {owner} to {spender}")]
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
    },
}

/// Host-provided token settlement. The engine account is implicit in the
/// implementation; `pull` lands in it, `pay` and `approve` act from it.
///
/// An `approve` granted before a trade is not revoked afterwards; any
/// residual allowance after partial consumption is the host's concern.
pub trait Custody {
    /// Move `amount` of `token` from a user into the engine's pooled balance.
    fn pull(&mut self, token: Address, from: Address, amount: U256) -> Result<(), CustodyError>;

    /// Pay `amount` of `token` out of the pooled balance.
    fn pay(&mut self, token: Address, to: Address, amount: U256) -> Result<(), CustodyError>;

    /// Grant `spender` an allowance over the pooled balance of `token`.
    fn approve(&mut self, token: Address, spender: Address, amount: U256)
        -> Result<(), CustodyError>;

    /// Current balance of `holder` in `token`.
    fn balance_of(&self, token: Address, holder: Address) -> U256;
}

/// Shared in-memory ledger. Clones share the same maps, so a cloned handle
/// given to a simulated market observes the engine's balances live.
#[derive(Debug)]
pub struct InMemoryCustody {
    engine: Address,
    /// (token, holder) -> balance
    balances: Arc<DashMap<(Address, Address), U256>>,
    /// (token, owner, spender) -> allowance
    allowances: Arc<DashMap<(Address, Address, Address), U256>>,
}

impl InMemoryCustody {
    pub fn new(engine: Address) -> Self {
        Self {
            engine,
            balances: Arc::new(DashMap::new()),
            allowances: Arc::new(DashMap::new()),
        }
    }

    /// The account the engine's pooled balances live under.
    pub fn engine_account(&self) -> Address {
        self.engine
    }

    /// Mint tokens to a holder. Also the hook for tests that simulate
    /// externally-sent balance inflation of the engine account.
    pub fn credit(&self, token: Address, holder: Address, amount: U256) {
        *self.balances.entry((token, holder)).or_default() += amount;
    }

    /// Burn tokens from a holder.
    pub fn debit(&self, token: Address, holder: Address, amount: U256) -> Result<(), CustodyError> {
        let mut entry = self
            .balances
            .entry((token, holder))
            .or_default();
        *entry = entry
            .checked_sub(amount)
            .ok_or(CustodyError::InsufficientBalance { token, holder })?;
        Ok(())
    }

    pub fn balance(&self, token: Address, holder: Address) -> U256 {
        self.balances
            .get(&(token, holder))
            .map(|e| *e.value())
            .unwrap_or_default()
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .map(|e| *e.value())
            .unwrap_or_default()
    }

    /// Consume an allowance and move the funds owner → spender, the way an
    /// external trade proxy draws the engine's approved input.
    pub fn spend_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), CustodyError> {
        {
            let mut entry = self.allowances.entry((token, owner, spender)).or_default();
            *entry = entry
                .checked_sub(amount)
                .ok_or(CustodyError::InsufficientAllowance {
                    token,
                    owner,
                    spender,
                })?;
        }
        self.debit(token, owner, amount)?;
        self.credit(token, spender, amount);
        Ok(())
    }
}

impl Clone for InMemoryCustody {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine,
            balances: Arc::clone(&self.balances),
            allowances: Arc::clone(&self.allowances),
        }
    }
}

impl Custody for InMemoryCustody {
    fn pull(&mut self, token: Address, from: Address, amount: U256) -> Result<(), CustodyError> {
        self.debit(token, from, amount)?;
        self.credit(token, self.engine, amount);
        debug!("custody pull: {} of {} from {}", amount, token, from);
        Ok(())
    }

    fn pay(&mut self, token: Address, to: Address, amount: U256) -> Result<(), CustodyError> {
        let engine = self.engine;
        self.debit(token, engine, amount)?;
        self.credit(token, to, amount);
        debug!("custody pay: {} of {} to {}", amount, token, to);
        Ok(())
    }

    fn approve(
        &mut self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), CustodyError> {
        self.allowances.insert((token, self.engine, spender), amount);
        Ok(())
    }

    fn balance_of(&self, token: Address, holder: Address) -> U256 {
        self.balance(token, holder)
    }
}
