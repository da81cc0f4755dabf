//! Delta Accounting and the Window Classifier
//!
//! Positions enter and leave a triple's rolling `next_amount` without any
//! per-position iteration at swap time: joining adds the rate now and books
//! its removal in `delta[final_swap + 1]`; leaving reverses whichever side
//! the position currently sits on.
//!
//! The window classifier decides whether a freshly added rate may join the
//! imminent swap or must wait one more round: inside a live swap window and
//! past the guard cutoff, the off-process operator may already have computed
//! the aggregate, so late arrivals go to `next_to_next_amount`.
//!
//! Author: AI-Generated
//! Created: 2026-02-05

use crate::engine::triple::TripleStore;
use crate::intervals::{single_bits, IntervalRegistry};
use crate::types::{Pair, Position, TripleId};
use alloy::primitives::U256;
use tracing::debug;

/// Outcome of the window classifier for one candidate mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowCheck {
    /// The candidate's own interval is inside a currently live swap window.
    pub in_live_window: bool,
    /// Earliest live window end minus the threshold guard; additions after
    /// this instant defer.
    pub cutoff: u64,
}

/// Examine every interval bit active on the pair (plus `self_mask`, even when
/// its bit is not active yet) and find which of them sit inside a live swap
/// window at `now`, and how close the earliest window end is.
pub(crate) fn time_until_threshold(
    store: &TripleStore,
    registry: &IntervalRegistry,
    pair: Pair,
    self_mask: u8,
    now: u64,
    threshold_guard: u64,
) -> WindowCheck {
    let candidates = store.active_mask(pair) | self_mask;
    let mut live = 0u8;
    let mut boundary = u64::MAX;

    for mask in single_bits(candidates) {
        let Some(interval) = registry.duration(mask) else {
            continue;
        };
        let triple = store.get(&TripleId::new(pair, mask));
        let last_swapped_at = triple.map(|t| t.last_swapped_at).unwrap_or(0);
        let has_next = triple
            .map(|t| !t.next_amount.is_zero())
            .unwrap_or(false);

        // Aligned start of the wall-clock window containing `now`, and the
        // start of the stream's next swap window.
        let current_window = now / interval * interval;
        let next_start = if last_swapped_at == 0 {
            current_window
        } else {
            (last_swapped_at / interval + 1) * interval
        };
        let next_start = next_start.max(current_window);
        let window_end = next_start + interval;

        let inside = now > next_start && now < window_end;
        if inside && (has_next || mask == self_mask) {
            live |= mask;
            boundary = boundary.min(window_end);
        }
    }

    WindowCheck {
        in_live_window: live & self_mask != 0,
        cutoff: boundary.saturating_sub(threshold_guard),
    }
}

/// Fold a rate into a triple's schedule. Returns the definitive
/// `(starting_swap, final_swap)`, both shifted one swap later when the
/// classifier defers the position past the imminent window.
/// Callers pass `start = performed_swaps`, `end = start + no_of_swaps`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn add_to_delta(
    store: &mut TripleStore,
    registry: &IntervalRegistry,
    pair: Pair,
    mask: u8,
    rate: U256,
    mut start: u64,
    mut end: u64,
    now: u64,
    threshold_guard: u64,
) -> (u64, u64) {
    let check = time_until_threshold(store, registry, pair, mask, now, threshold_guard);
    let deferred = check.in_live_window && now > check.cutoff;

    let triple = store.entry(TripleId::new(pair, mask));
    if deferred {
        start += 1;
        end += 1;
        triple.next_to_next_amount += rate;
    } else {
        triple.next_amount += rate;
    }
    *triple.delta.entry(end + 1).or_default() += rate;

    debug!(
        "schedule add: pair {} mask {:#04b} rate {} swaps [{}, {}) deferred={}",
        pair, mask, rate, start, end, deferred
    );
    (start, end)
}

/// Undo a position's contribution to its triple's schedule. A position whose
/// final swap already passed has nothing left to remove.
pub(crate) fn remove_from_delta(store: &mut TripleStore, position: &Position) {
    let Some(triple) = store.get_mut(&position.triple_id()) else {
        return;
    };
    let performed = triple.performed_swaps;
    if position.final_swap <= performed {
        return;
    }

    if position.starting_swap > performed {
        triple.next_to_next_amount -= position.rate;
    } else {
        triple.next_amount -= position.rate;
    }

    let key = position.final_swap + 1;
    if let Some(pending) = triple.delta.get_mut(&key) {
        *pending -= position.rate;
        if pending.is_zero() {
            triple.delta.remove(&key);
        }
    }
}
