//! Engine Events
//!
//! One event per user-visible mutation, buffered inside the engine and
//! drained by the host after each call (`DcaEngine::take_events`). The keeper
//! binary serializes them to the log; an embedding host can forward them to
//! whatever bus it runs on.
//!
//! Author: AI-Generated
//! Created: 2026-02-03

use alloy::primitives::{Address, U256};
use serde::Serialize;

/// Emitted by every state-changing entry point that succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EngineEvent {
    Created {
        position_id: u64,
        owner: Address,
        from: Address,
        to: Address,
        /// Swap interval in seconds.
        interval: u64,
        rate: U256,
        starting_swap: u64,
        final_swap: u64,
        amount: U256,
    },
    /// Trails the individual `Created` events of a batch.
    CreatedBatched {
        owner: Address,
        position_ids: Vec<u64>,
    },
    Modified {
        position_id: u64,
        rate: U256,
        starting_swap: u64,
        final_swap: u64,
    },
    Terminated {
        position_id: u64,
        recipient: Address,
        /// Source tokens returned (unswapped plus truncation remainder).
        unswapped: U256,
        /// Destination tokens paid out.
        swapped: U256,
    },
    Withdrawn {
        position_id: u64,
        recipient: Address,
        swapped: U256,
    },
    PositionOwnerUpdated {
        position_id: u64,
        previous_owner: Address,
        new_owner: Address,
    },
    Swapped {
        from: Address,
        to: Address,
        /// Interval bits that took part in this swap.
        intervals: u8,
        total_input: U256,
        delivered: U256,
        operator_reward: U256,
        platform_fee: U256,
    },
    BlankSwapped {
        from: Address,
        to: Address,
        mask: u8,
    },
}
