//! Batched DCA Engine Library
//!
//! Accounting core of a dollar-cost-averaging system: many positions sharing
//! a (from, to, interval) triple swap as one aggregate per period, and every
//! position's entitlement is reconstructed in O(1) from a per-triple
//! accumulated-ratio series. Token settlement and trade execution stay behind
//! the `Custody` and `TradeExecutor` seams; in-memory implementations of both
//! back the tests and the keeper's simulation mode.
//!
//! Author: AI-Generated
//! Created: 2026-02-03

pub mod config;
pub mod custody;
pub mod engine;
pub mod errors;
pub mod events;
pub mod intervals;
pub mod market;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigFile, EngineConfig, KeeperConfig};
pub use custody::{Custody, CustodyError, InMemoryCustody};
pub use engine::{DcaEngine, NextSwapInfo, SwapIntent};
pub use errors::{EngineError, EngineResult};
pub use events::EngineEvent;
pub use intervals::IntervalRegistry;
pub use market::{FixedPriceMarket, SwapRequest, TradeError, TradeExecutor};
pub use types::{CreateRequest, Pair, Position, PositionDetails, TripleId};
