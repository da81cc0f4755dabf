//! Swap Engine
//!
//! Operator-driven execution: one aggregate trade per (from, to) pair per
//! invocation, covering every interval whose window opened. Interval bits are
//! walked low to high and the walk stops at the first unopened window: since
//! the table is sorted shortest-first, aligned longer intervals execute
//! together with the shorter ones, maximizing the bundled amount and keeping
//! the streams in phase.
//!
//! Registration advances each participating stream: the per-unit price joins
//! the accumulated-ratio series, the pending delta for the new swap number is
//! consumed, and deferred money promotes into the active pool. Streams with
//! nothing active but something deferred advance without a trade (their
//! price contribution is zero); `blank_swap` is the explicit form when no
//! trade is happening for the pair at all.
//!
//! Author: AI-Generated
//! Created: 2026-02-06

use crate::engine::DcaEngine;
use crate::errors::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::intervals::single_bits;
use crate::market::{SwapRequest, TradeExecutor};
use crate::types::{Pair, TripleId};
use alloy::primitives::{Address, U256};
use tracing::{debug, info};

/// One pair of an operator batch.
#[derive(Debug, Clone)]
pub struct SwapIntent {
    pub pair: Pair,
    /// Operator-declared aggregate input; must match the engine's own
    /// aggregation exactly.
    pub declared_input: U256,
    /// Minimum acceptable delivered output.
    pub min_out: U256,
    /// Proxy granted the input approval for this trade.
    pub proxy: Address,
    /// Opaque routing payload handed to the executor.
    pub data: Vec<u8>,
}

/// What the next swap of a pair would move, per the current aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextSwapInfo {
    pub pair: Pair,
    pub total_input: U256,
    /// Interval bits that would take part.
    pub intervals: u8,
    pub operator_reward: U256,
    pub platform_fee: U256,
}

/// `(x - fee, fee)` with `fee = floor(x * bps / 10000)`.
fn split(amount: U256, bps: u16) -> (U256, U256) {
    let fee = amount * U256::from(bps) / U256::from(super::BPS_DENOMINATOR);
    (amount - fee, fee)
}

impl DcaEngine {
    /// Execute the aggregated swap of every listed pair through the supplied
    /// executor. Swap-executor gated; the first failing pair aborts the batch.
    pub fn swap(
        &mut self,
        caller: Address,
        intents: &[SwapIntent],
        reward_recipient: Address,
        executor: &mut dyn TradeExecutor,
        now: u64,
    ) -> EngineResult<()> {
        self.ensure_swap_executor(caller)?;
        self.ensure_not_paused()?;

        for intent in intents {
            let info = self.aggregate_pair(intent.pair, now);
            if info.total_input.is_zero() || info.intervals == 0 {
                return Err(EngineError::NoAvailableSwap);
            }
            if intent.declared_input != info.total_input {
                return Err(EngineError::InvalidSwapAmount);
            }

            let before = self.custody.balance_of(intent.pair.to, self.address);
            self.custody
                .approve(intent.pair.from, intent.proxy, info.total_input)?;
            executor
                .execute(&SwapRequest {
                    from: intent.pair.from,
                    to: intent.pair.to,
                    input: info.total_input,
                    min_out: intent.min_out,
                    data: intent.data.clone(),
                })
                .map_err(|e| EngineError::SwapCallFailed(e.to_string()))?;
            let after = self.custody.balance_of(intent.pair.to, self.address);
            let delivered = after.saturating_sub(before);
            if delivered < intent.min_out {
                return Err(EngineError::InvalidReturnAmount);
            }

            self.register_pair(intent.pair, info.total_input, delivered, info.intervals, now);

            if !info.platform_fee.is_zero() {
                let vault = self.fee_vault;
                self.custody.pay(intent.pair.from, vault, info.platform_fee)?;
            }
            if !info.operator_reward.is_zero() {
                self.custody
                    .pay(intent.pair.from, reward_recipient, info.operator_reward)?;
            }

            info!(
                "swapped {}: {} in, {} out, intervals {:#010b}",
                intent.pair, info.total_input, delivered, info.intervals
            );
            self.push_event(EngineEvent::Swapped {
                from: intent.pair.from,
                to: intent.pair.to,
                intervals: info.intervals,
                total_input: info.total_input,
                delivered,
                operator_reward: info.operator_reward,
                platform_fee: info.platform_fee,
            });
        }
        Ok(())
    }

    /// Advance a stream with nothing active but something deferred, without
    /// an external trade. The counterpart of registration's implicit
    /// promotion, for when no trade is happening on the pair.
    /// Deliberately leaves `last_swapped_at` alone: the promotion is
    /// bookkeeping, not a swap.
    pub fn blank_swap(&mut self, caller: Address, pair: Pair, mask: u8) -> EngineResult<()> {
        self.ensure_swap_executor(caller)?;
        self.ensure_not_paused()?;

        let Some(triple) = self.triples.get_mut(&TripleId::new(pair, mask)) else {
            return Err(EngineError::InvalidBlankSwap);
        };
        if !triple.next_amount.is_zero() || triple.next_to_next_amount.is_zero() {
            return Err(EngineError::InvalidBlankSwap);
        }

        triple.record_blank();
        triple.next_amount = triple.next_to_next_amount;
        triple.next_to_next_amount = U256::ZERO;

        info!("blank swap on {} mask {:#04b}", pair, mask);
        self.push_event(EngineEvent::BlankSwapped {
            from: pair.from,
            to: pair.to,
            mask,
        });
        Ok(())
    }

    /// Seconds until a swap becomes available for each pair: 0 when some
    /// funded interval's window already opened, the earliest future opening
    /// otherwise, `u64::MAX` when nothing is pending.
    pub fn seconds_until_next_swap(&self, pairs: &[Pair], now: u64) -> Vec<u64> {
        pairs
            .iter()
            .map(|&pair| self.seconds_until_next_swap_pair(pair, now))
            .collect()
    }

    fn seconds_until_next_swap_pair(&self, pair: Pair, now: u64) -> u64 {
        let mut soonest = u64::MAX;
        for mask in single_bits(self.triples.active_mask(pair)) {
            let Some(interval) = self.registry.duration(mask) else {
                continue;
            };
            let Some(triple) = self.triples.get(&TripleId::new(pair, mask)) else {
                continue;
            };
            let next_open = (triple.last_swapped_at / interval + 1) * interval;
            if !triple.next_amount.is_zero() && next_open <= now {
                return 0;
            }
            if next_open > now {
                soonest = soonest.min(next_open - now);
            }
        }
        soonest
    }

    /// Preview of what `swap` would do for each pair, without executing.
    pub fn next_swap_info(&self, pairs: &[Pair], now: u64) -> Vec<NextSwapInfo> {
        pairs
            .iter()
            .map(|&pair| self.aggregate_pair(pair, now))
            .collect()
    }

    /// Walk the pair's interval bits low to high, stopping at the first
    /// unopened window, and total the net input plus the fee split of every
    /// funded interval that qualifies.
    fn aggregate_pair(&self, pair: Pair, now: u64) -> NextSwapInfo {
        let mut info = NextSwapInfo {
            pair,
            total_input: U256::ZERO,
            intervals: 0,
            operator_reward: U256::ZERO,
            platform_fee: U256::ZERO,
        };

        for mask in single_bits(self.triples.active_mask(pair)) {
            let Some(interval) = self.registry.duration(mask) else {
                continue;
            };
            let Some(triple) = self.triples.get(&TripleId::new(pair, mask)) else {
                continue;
            };
            // First unopened window ends the walk: longer intervals aligned
            // above it wait and bundle with it next time.
            if (triple.last_swapped_at / interval + 1) * interval > now {
                break;
            }
            if triple.next_amount.is_zero() {
                continue;
            }

            info.intervals |= mask;
            let (net, fee_gross) = split(triple.next_amount, self.fee_bps_for(mask));
            let (reward, platform) = split(fee_gross, self.platform_fee_ratio_bps);
            info.total_input += net;
            info.operator_reward += reward;
            info.platform_fee += platform;
        }

        if info.total_input.is_zero() {
            info.intervals = 0;
        }
        info
    }

    /// Advance every participating stream of the pair after a delivered
    /// trade, distributing the output pro rata by net input, and promote
    /// deferred-only streams without a price contribution.
    fn register_pair(
        &mut self,
        pair: Pair,
        total_input: U256,
        delivered: U256,
        intervals: u8,
        now: u64,
    ) {
        let magnitude_from = self.magnitude(pair.from);
        let masks: Vec<u8> = single_bits(self.triples.active_mask(pair)).collect();

        for mask in masks {
            let fee_bps = self.fee_bps_for(mask);
            let id = TripleId::new(pair, mask);
            let mut clear_bit = false;

            if let Some(triple) = self.triples.get_mut(&id) {
                if intervals & mask != 0 && !triple.next_amount.is_zero() {
                    let (net, _) = split(triple.next_amount, fee_bps);
                    let delivered_mask = delivered * net * magnitude_from / total_input;
                    let price = delivered_mask / triple.next_amount;

                    triple.record_swap(price);
                    let consumed = triple
                        .delta
                        .remove(&(triple.performed_swaps + 1))
                        .unwrap_or_default();
                    triple.next_amount =
                        triple.next_amount + triple.next_to_next_amount - consumed;
                    triple.next_to_next_amount = U256::ZERO;
                    triple.last_swapped_at = now;
                    clear_bit = triple.next_amount.is_zero();

                    debug!(
                        "registered swap {} on {} mask {:#04b}: price {}",
                        triple.performed_swaps, pair, mask, price
                    );
                } else if triple.next_amount.is_zero() && !triple.next_to_next_amount.is_zero() {
                    triple.record_blank();
                    triple.next_amount = triple.next_to_next_amount;
                    triple.next_to_next_amount = U256::ZERO;
                }
            }

            if clear_bit {
                self.triples.clear_active_bit(pair, mask);
            }
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::engine::testkit::*;
    use crate::market::FixedPriceMarket;
    use crate::types::CreateRequest;
    use proptest::prelude::*;

    fn pair() -> Pair {
        Pair::new(TOKEN_A, TOKEN_B)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Random fleets of hourly positions under random fills: the
        /// aggregate invariants hold after every step and the source token
        /// conserves exactly once everything is terminated.
        #[test]
        fn prop_invariants_and_source_conservation(
            deposits in proptest::collection::vec((100u64..1_000_000, 1u64..20), 1..6),
            fills in proptest::collection::vec(1u64..5, 1..25),
        ) {
            let (mut engine, ledger, mut market) = engine();

            let mut ids = Vec::new();
            for (amount, swaps) in &deposits {
                let id = engine
                    .create(
                        ALICE,
                        &CreateRequest {
                            from: TOKEN_A,
                            to: TOKEN_B,
                            interval: HOUR,
                            amount: U256::from(*amount),
                            no_of_swaps: *swaps,
                        },
                        0,
                    )
                    .unwrap();
                ids.push(id);
            }
            assert_invariants(&engine);

            for (i, fill) in fills.iter().enumerate() {
                let now = (i as u64 + 1) * HOUR;
                let info = engine.next_swap_info(&[pair()], now).remove(0);
                if info.total_input.is_zero() {
                    break;
                }
                market.set_price(TOKEN_A, TOKEN_B, U256::from(*fill), U256::from(1));
                engine
                    .swap(
                        OPERATOR,
                        &[SwapIntent {
                            pair: pair(),
                            declared_input: info.total_input,
                            min_out: U256::ZERO,
                            proxy: MARKET_ACCOUNT,
                            data: vec![],
                        }],
                        OPERATOR,
                        &mut market,
                        now,
                    )
                    .unwrap();
                assert_invariants(&engine);
            }

            for id in ids {
                engine.terminate(ALICE, id, ALICE).unwrap();
            }
            assert_invariants(&engine);

            // Every source token either traded or came back: the pool holds none.
            prop_assert_eq!(ledger.balance(TOKEN_A, ENGINE_ACCOUNT), U256::ZERO);
            // Destination payouts never exceed what the market delivered.
            prop_assert!(
                ledger.balance(TOKEN_B, ALICE) <= ledger.balance(TOKEN_A, MARKET_ACCOUNT) * U256::from(4u64)
            );
        }
    }
}
