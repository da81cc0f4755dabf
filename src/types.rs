// Core data structures shared across the engine modules.
// Amounts, rates and accumulated ratios are 256-bit; swap indices and
// timestamps are u64 seconds.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered (source, destination) token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub from: Address,
    pub to: Address,
}

impl Pair {
    pub fn new(from: Address, to: Address) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}→{}", self.from, self.to)
    }
}

/// Key of an aggregated batch stream: every position sharing a triple swaps
/// together. `mask` is a single interval bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TripleId {
    pub from: Address,
    pub to: Address,
    pub mask: u8,
}

impl TripleId {
    pub fn new(pair: Pair, mask: u8) -> Self {
        Self {
            from: pair.from,
            to: pair.to,
            mask,
        }
    }

    pub fn pair(&self) -> Pair {
        Pair::new(self.from, self.to)
    }
}

/// A user's standing order: trade `rate` of `from` into `to` on every swap of
/// its triple while the swap number lies in `[starting_swap, final_swap)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub owner: Address,
    pub from: Address,
    pub to: Address,
    pub mask: u8,
    /// Source tokens traded per swap while active.
    pub rate: U256,
    /// Inclusive lower bound in the triple's swap-number timeline.
    pub starting_swap: u64,
    /// Exclusive upper bound in the triple's swap-number timeline.
    pub final_swap: u64,
    /// `performed_swaps` at creation or last mutation; anchors the
    /// accumulated-ratio lookup.
    pub last_updated_swap: u64,
    /// Source-token dust left over by floor division at create/modify time,
    /// returned at termination.
    pub remainder: U256,
}

impl Position {
    pub fn triple_id(&self) -> TripleId {
        TripleId {
            from: self.from,
            to: self.to,
            mask: self.mask,
        }
    }

    pub fn pair(&self) -> Pair {
        Pair::new(self.from, self.to)
    }

    /// Swaps not yet executed for this position, given the triple's
    /// `performed_swaps` counter.
    pub fn remaining_swaps(&self, performed_swaps: u64) -> u64 {
        let total = self.final_swap - self.starting_swap;
        let executed = performed_swaps.saturating_sub(self.starting_swap);
        total.saturating_sub(executed)
    }

    /// Source tokens still committed to future swaps (excludes `remainder`).
    pub fn unswapped(&self, performed_swaps: u64) -> U256 {
        self.rate * U256::from(self.remaining_swaps(performed_swaps))
    }

    /// Swaps already executed within this position's range.
    pub fn executed_swaps(&self, performed_swaps: u64) -> u64 {
        performed_swaps
            .min(self.final_swap)
            .saturating_sub(self.starting_swap)
    }
}

/// Read-only view of a position, served by the query layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionDetails {
    pub position_id: u64,
    pub owner: Address,
    pub from: Address,
    pub to: Address,
    /// Swap interval in seconds.
    pub interval: u64,
    pub rate: U256,
    pub swaps_executed: u64,
    pub swaps_left: u64,
    /// Destination tokens earned and not yet withdrawn.
    pub swapped: U256,
    /// Source tokens still committed to future swaps.
    pub unswapped: U256,
    /// Source-token dust returned at termination.
    pub remainder: U256,
}

/// Inputs of a single position creation; `create_batch` takes a slice.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    pub from: Address,
    pub to: Address,
    /// Swap interval in seconds; must match an allowed registry entry.
    pub interval: u64,
    /// Total source-token budget pulled into custody.
    pub amount: U256,
    /// Number of equal installments the budget is split into.
    pub no_of_swaps: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(starting: u64, fin: u64, rate: u64) -> Position {
        Position {
            owner: Address::repeat_byte(1),
            from: Address::repeat_byte(2),
            to: Address::repeat_byte(3),
            mask: 0b1,
            rate: U256::from(rate),
            starting_swap: starting,
            final_swap: fin,
            last_updated_swap: starting,
            remainder: U256::ZERO,
        }
    }

    #[test]
    fn test_remaining_swaps_counts_down() {
        let p = position(0, 5, 200);
        assert_eq!(p.remaining_swaps(0), 5);
        assert_eq!(p.remaining_swaps(2), 3);
        assert_eq!(p.remaining_swaps(5), 0);
        assert_eq!(p.remaining_swaps(9), 0);
    }

    #[test]
    fn test_remaining_swaps_deferred_position() {
        // Deferred to next-to-next: starting lies one past the counter.
        let p = position(4, 7, 100);
        assert_eq!(p.remaining_swaps(3), 3);
        assert_eq!(p.remaining_swaps(4), 3);
        assert_eq!(p.remaining_swaps(5), 2);
    }

    #[test]
    fn test_unswapped_is_rate_times_remaining() {
        let p = position(0, 5, 200);
        assert_eq!(p.unswapped(2), U256::from(600));
        assert_eq!(p.unswapped(5), U256::ZERO);
    }

    #[test]
    fn test_executed_swaps_clamps_to_range() {
        let p = position(2, 6, 1);
        assert_eq!(p.executed_swaps(1), 0);
        assert_eq!(p.executed_swaps(2), 0);
        assert_eq!(p.executed_swaps(4), 2);
        assert_eq!(p.executed_swaps(6), 4);
        assert_eq!(p.executed_swaps(10), 4);
    }
}
