//! DCA Engine Core
//!
//! Owns every piece of engine state (positions, triple streams, roles,
//! runtime configuration) behind a single object whose entry points execute
//! serially and atomically: validation happens before any mutation, custody
//! transfers happen at the boundaries, and an error means nothing changed.
//!
//! Entry points split across submodules:
//! - `positions`: create / modify / terminate / withdraw / transfer-ownership
//! - `swaps`: operator-driven aggregation, execution, registration, queries
//! - `schedule`: delta bookkeeping and the window classifier
//! - `triple`: per-stream aggregate state
//!
//! Author: AI-Generated
//! Created: 2026-02-05

pub mod positions;
pub mod schedule;
pub mod swaps;
pub mod triple;

pub use swaps::{NextSwapInfo, SwapIntent};

use crate::config::EngineConfig;
use crate::custody::Custody;
use crate::errors::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::intervals::{IntervalRegistry, MAX_INTERVALS};
use crate::types::{Pair, Position};
use alloy::primitives::{Address, U256};
use std::collections::{HashMap, HashSet};
use tracing::info;
use triple::TripleStore;

const BPS_DENOMINATOR: u64 = 10_000;

/// The aggregation and distribution core of the batched DCA system.
pub struct DcaEngine {
    /// Account the pooled custody balances live under.
    address: Address,
    governor: Address,
    admins: HashSet<Address>,
    swap_executors: HashSet<Address>,
    paused: bool,

    // Runtime configuration (admin-adjustable).
    allowed_tokens: HashSet<Address>,
    /// Decimals survive de-listing; existing positions keep their magnitude.
    token_decimals: HashMap<Address, u8>,
    registry: IntervalRegistry,
    swap_fee_bps: [u16; MAX_INTERVALS],
    platform_fee_ratio_bps: u16,
    fee_vault: Address,
    wrapped_native: Option<Address>,
    max_no_of_swaps: u64,
    threshold_guard: u64,

    // Stores.
    triples: TripleStore,
    positions: HashMap<u64, Position>,
    /// Swapped amount frozen at the last modification, per position.
    carry: HashMap<u64, U256>,
    total_created_positions: u64,

    custody: Box<dyn Custody>,
    events: Vec<EngineEvent>,
}

impl DcaEngine {
    pub fn new(config: EngineConfig, custody: Box<dyn Custody>) -> EngineResult<Self> {
        let registry = IntervalRegistry::new(
            config.interval_durations.clone(),
            config.allowed_interval_mask,
        )?;
        if config.max_no_of_swaps < 2 {
            return Err(EngineError::InvalidNoOfSwaps);
        }
        if u64::from(config.platform_fee_ratio_bps) > BPS_DENOMINATOR {
            return Err(EngineError::InvalidAmount);
        }

        let mut swap_fee_bps = [0u16; MAX_INTERVALS];
        for (i, &bps) in config.swap_fee_bps.iter().take(MAX_INTERVALS).enumerate() {
            if u64::from(bps) > BPS_DENOMINATOR {
                return Err(EngineError::InvalidAmount);
            }
            swap_fee_bps[i] = bps;
        }

        let mut allowed_tokens = HashSet::new();
        let mut token_decimals = HashMap::new();
        for token in &config.tokens {
            allowed_tokens.insert(token.address);
            token_decimals.insert(token.address, token.decimals);
        }

        Ok(Self {
            address: config.engine_account,
            governor: config.governor,
            admins: HashSet::new(),
            swap_executors: HashSet::new(),
            paused: false,
            allowed_tokens,
            token_decimals,
            registry,
            swap_fee_bps,
            platform_fee_ratio_bps: config.platform_fee_ratio_bps,
            fee_vault: config.fee_vault,
            wrapped_native: config.wrapped_native,
            max_no_of_swaps: config.max_no_of_swaps,
            threshold_guard: config.threshold_guard_secs,
            triples: TripleStore::new(),
            positions: HashMap::new(),
            carry: HashMap::new(),
            total_created_positions: 0,
            custody,
            events: Vec::new(),
        })
    }

    /// Drain the events accumulated since the last call.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pairs that currently carry any pending amount (keeper convenience).
    pub fn active_pairs(&self) -> Vec<Pair> {
        self.triples.active_pairs()
    }

    // -----------------------------------------------------------------------
    // Roles and gates
    // -----------------------------------------------------------------------

    fn is_admin(&self, caller: Address) -> bool {
        caller == self.governor || self.admins.contains(&caller)
    }

    pub(crate) fn ensure_admin(&self, caller: Address) -> EngineResult<()> {
        if self.is_admin(caller) {
            return Ok(());
        }
        Err(EngineError::UnauthorizedCaller)
    }

    fn ensure_governor(&self, caller: Address) -> EngineResult<()> {
        if caller == self.governor {
            return Ok(());
        }
        Err(EngineError::UnauthorizedCaller)
    }

    pub(crate) fn ensure_swap_executor(&self, caller: Address) -> EngineResult<()> {
        if self.swap_executors.contains(&caller) {
            return Ok(());
        }
        Err(EngineError::UnauthorizedCaller)
    }

    pub(crate) fn ensure_not_paused(&self) -> EngineResult<()> {
        if self.paused {
            return Err(EngineError::Paused);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Config operations (admin-gated; governor manages admins)
    // -----------------------------------------------------------------------

    pub fn pause(&mut self, caller: Address) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.paused = true;
        info!("engine paused by {caller}");
        Ok(())
    }

    pub fn unpause(&mut self, caller: Address) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.paused = false;
        info!("engine unpaused by {caller}");
        Ok(())
    }

    pub fn add_allowed_token(
        &mut self,
        caller: Address,
        token: Address,
        decimals: u8,
    ) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        if token.is_zero() {
            return Err(EngineError::ZeroAddress);
        }
        self.allowed_tokens.insert(token);
        self.token_decimals.insert(token, decimals);
        Ok(())
    }

    /// De-list a token for new positions. Decimals are kept so existing
    /// positions keep computing their magnitude.
    pub fn remove_allowed_token(&mut self, caller: Address, token: Address) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.allowed_tokens.remove(&token);
        Ok(())
    }

    pub fn add_allowed_intervals(&mut self, caller: Address, mask: u8) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.registry.allow(mask)
    }

    pub fn remove_allowed_intervals(&mut self, caller: Address, mask: u8) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.registry.disallow(mask)
    }

    pub fn set_swap_fee(&mut self, caller: Address, mask: u8, bps: u16) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        if self.registry.duration(mask).is_none() {
            return Err(EngineError::InvalidInterval);
        }
        if u64::from(bps) > BPS_DENOMINATOR {
            return Err(EngineError::InvalidAmount);
        }
        self.swap_fee_bps[mask.trailing_zeros() as usize] = bps;
        Ok(())
    }

    pub fn set_platform_fee_ratio(&mut self, caller: Address, bps: u16) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        if u64::from(bps) > BPS_DENOMINATOR {
            return Err(EngineError::InvalidAmount);
        }
        self.platform_fee_ratio_bps = bps;
        Ok(())
    }

    pub fn set_fee_vault(&mut self, caller: Address, vault: Address) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        if vault.is_zero() {
            return Err(EngineError::ZeroAddress);
        }
        self.fee_vault = vault;
        Ok(())
    }

    pub fn set_max_no_of_swaps(&mut self, caller: Address, max: u64) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        if max < 2 {
            return Err(EngineError::InvalidNoOfSwaps);
        }
        self.max_no_of_swaps = max;
        Ok(())
    }

    pub fn set_threshold_guard(&mut self, caller: Address, seconds: u64) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.threshold_guard = seconds;
        Ok(())
    }

    pub fn add_admin(&mut self, caller: Address, admin: Address) -> EngineResult<()> {
        self.ensure_governor(caller)?;
        self.admins.insert(admin);
        Ok(())
    }

    pub fn remove_admin(&mut self, caller: Address, admin: Address) -> EngineResult<()> {
        self.ensure_governor(caller)?;
        self.admins.remove(&admin);
        Ok(())
    }

    pub fn add_swap_executor(&mut self, caller: Address, executor: Address) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.swap_executors.insert(executor);
        Ok(())
    }

    pub fn remove_swap_executor(&mut self, caller: Address, executor: Address) -> EngineResult<()> {
        self.ensure_admin(caller)?;
        self.swap_executors.remove(&executor);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared internals
    // -----------------------------------------------------------------------

    /// `10^decimals` of a token; unknown tokens default to 18 decimals.
    pub(crate) fn magnitude(&self, token: Address) -> U256 {
        let decimals = self.token_decimals.get(&token).copied().unwrap_or(18);
        U256::from(10).pow(U256::from(decimals))
    }

    pub(crate) fn fee_bps_for(&self, mask: u8) -> u16 {
        self.swap_fee_bps[mask.trailing_zeros() as usize]
    }

    /// Substitute the wrapped form for the native zero-address sentinel.
    pub(crate) fn resolve_token(&self, token: Address) -> EngineResult<Address> {
        if token.is_zero() {
            return self.wrapped_native.ok_or(EngineError::ZeroAddress);
        }
        Ok(token)
    }

    pub(crate) fn push_event(&mut self, event: EngineEvent) {
        self.events.push(event);
    }
}
