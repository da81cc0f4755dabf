//! Trade Execution Seam
//!
//! The engine hands each aggregated swap to an operator-supplied
//! [`TradeExecutor`] and measures what actually arrived by balance delta; it
//! never trusts the executor's word for the output. [`FixedPriceMarket`]
//! simulates execution against a configured price table for tests and the
//! keeper's simulation mode: it draws the approved input through the shared
//! ledger's allowance, exactly like an external proxy would.
//!
//! Author: AI-Generated
//! Created: 2026-02-04

use crate::custody::{CustodyError, InMemoryCustody};
use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// One aggregated trade, as handed to the executor.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub from: Address,
    pub to: Address,
    /// Aggregate input the engine approved to the proxy.
    pub input: U256,
    /// Operator's minimum acceptable output; enforced by the engine on the
    /// measured delta, echoed here for executors that route on it.
    pub min_out: U256,
    /// Opaque routing payload, passed through untouched.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeError {
    #[error("no market price configured for pair")]
    UnknownPair,
    #[error(transparent)]
    Custody(#[from] CustodyError),
}

/// External trade execution. Implementations must deposit the output into
/// the engine's custody account; the engine measures delivery by balance
/// delta around this call.
pub trait TradeExecutor {
    fn execute(&mut self, request: &SwapRequest) -> Result<(), TradeError>;
}

/// Price as a rational: `out = in * numerator / denominator`.
#[derive(Debug, Clone, Copy)]
struct Quote {
    numerator: U256,
    denominator: U256,
}

/// Deterministic market simulator over a shared in-memory ledger.
pub struct FixedPriceMarket {
    ledger: InMemoryCustody,
    /// Account the market trades under (the spender of the engine's approval).
    address: Address,
    prices: HashMap<(Address, Address), Quote>,
}

impl FixedPriceMarket {
    pub fn new(ledger: InMemoryCustody, address: Address) -> Self {
        Self {
            ledger,
            address,
            prices: HashMap::new(),
        }
    }

    /// Configure `out = in * numerator / denominator` for a pair.
    pub fn set_price(&mut self, from: Address, to: Address, numerator: U256, denominator: U256) {
        self.prices
            .insert((from, to), Quote { numerator, denominator });
    }
}

impl TradeExecutor for FixedPriceMarket {
    fn execute(&mut self, request: &SwapRequest) -> Result<(), TradeError> {
        let quote = self
            .prices
            .get(&(request.from, request.to))
            .copied()
            .ok_or(TradeError::UnknownPair)?;

        let engine = self.ledger.engine_account();
        self.ledger
            .spend_allowance(request.from, engine, self.address, request.input)?;

        let out = request.input * quote.numerator / quote.denominator;
        self.ledger.credit(request.to, engine, out);
        debug!(
            "market fill: {} {} -> {} {}",
            request.input, request.from, out, request.to
        );
        Ok(())
    }
}
