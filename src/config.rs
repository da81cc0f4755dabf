//! Configuration management
//!
//! Engine parameters and the keeper's simulation scenario load from one TOML
//! file (see `config/engine.toml`), with a handful of `.env` overrides for
//! deployment-specific addresses.
//!
//! Author: AI-Generated
//! Created: 2026-02-04

use crate::intervals::DEFAULT_INTERVALS;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Top-level TOML configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    #[serde(default)]
    pub keeper: Option<KeeperConfig>,
}

/// Static engine parameters read at construction. Everything here is also
/// adjustable at runtime through the admin-gated config operations.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Account the engine's pooled custody balances live under.
    pub engine_account: Address,
    /// Fixed at construction; the only role that can manage admins.
    pub governor: Address,
    pub fee_vault: Address,
    /// Wrapped form substituted for the zero-address native sentinel.
    #[serde(default)]
    pub wrapped_native: Option<Address>,
    #[serde(default = "default_max_no_of_swaps")]
    pub max_no_of_swaps: u64,
    /// Safety margin before a window boundary past which new positions defer
    /// to the next-to-next swap.
    #[serde(default = "default_threshold_guard")]
    pub threshold_guard_secs: u64,
    /// Share of the gross swap fee routed to the platform vault, in bps;
    /// the rest rewards the operator.
    #[serde(default)]
    pub platform_fee_ratio_bps: u16,
    /// Interval duration table, seconds, ascending, max 8 entries.
    #[serde(default = "default_interval_durations")]
    pub interval_durations: Vec<u64>,
    /// Bits of the duration table open for new positions.
    #[serde(default = "default_allowed_mask")]
    pub allowed_interval_mask: u8,
    /// Swap fee in bps per interval bit; missing entries are zero.
    #[serde(default)]
    pub swap_fee_bps: Vec<u16>,
    #[serde(default)]
    pub tokens: Vec<TokenSettings>,
}

fn default_max_no_of_swaps() -> u64 {
    255
}
fn default_threshold_guard() -> u64 {
    600
}
fn default_interval_durations() -> Vec<u64> {
    DEFAULT_INTERVALS.to_vec()
}
fn default_allowed_mask() -> u8 {
    0xff
}

/// An allow-listed token and its decimals (used for price magnitude scaling).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSettings {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Simulation scenario driven by the keeper binary.
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Registered as a swap executor; signs every swap the keeper fires.
    pub operator: Address,
    /// Account the simulated market trades under (proxy of the approvals).
    pub market_account: Address,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default)]
    pub pairs: Vec<PairSettings>,
    #[serde(default)]
    pub prices: Vec<PriceSettings>,
    #[serde(default)]
    pub positions: Vec<SeedPosition>,
}

fn default_tick_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairSettings {
    pub from: Address,
    pub to: Address,
}

/// Simulated market price: `out = in * numerator / denominator`.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceSettings {
    pub from: Address,
    pub to: Address,
    pub numerator: u64,
    pub denominator: u64,
}

/// A position the keeper creates (and funds) at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedPosition {
    pub owner: Address,
    pub from: Address,
    pub to: Address,
    /// Interval in seconds.
    pub interval: u64,
    pub amount: u64,
    pub no_of_swaps: u64,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        config.engine.apply_env_overrides()?;
        Ok(config)
    }
}

impl EngineConfig {
    /// Let `.env` deployment values win over the file for the few fields
    /// that differ per environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("DCA_GOVERNOR") {
            self.governor = Address::from_str(&v).context("DCA_GOVERNOR is not an address")?;
        }
        if let Ok(v) = std::env::var("DCA_FEE_VAULT") {
            self.fee_vault = Address::from_str(&v).context("DCA_FEE_VAULT is not an address")?;
        }
        if let Ok(v) = std::env::var("DCA_THRESHOLD_GUARD_SECS") {
            self.threshold_guard_secs = v
                .parse()
                .context("DCA_THRESHOLD_GUARD_SECS is not a number")?;
        }
        Ok(())
    }

    /// Decimals for a configured token, if listed.
    pub fn decimals_of(&self, token: Address) -> Option<u8> {
        self.tokens
            .iter()
            .find(|t| t.address == token)
            .map(|t| t.decimals)
    }
}
