//! Position Manager
//!
//! Translates user intent (budget + number of swaps) into a rate and a swap
//! index range, and keeps every aggregate invariant intact across create,
//! modify, terminate, withdraw and ownership transfer. All operations are
//! O(1): a position's earnings are reconstructed from the triple's
//! accumulated-ratio series and the position's own constants, never by
//! walking history.
//!
//! Author: AI-Generated
//! Created: 2026-02-06

use crate::engine::{schedule, DcaEngine};
use crate::errors::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::types::{CreateRequest, Pair, Position, PositionDetails, TripleId};
use alloy::primitives::{Address, U256};
use tracing::info;

/// A fully validated creation, ready to commit.
struct PreparedCreate {
    from: Address,
    to: Address,
    mask: u8,
    interval: u64,
    rate: U256,
    amount: U256,
    no_of_swaps: u64,
}

impl DcaEngine {
    /// Open a new position: pull `amount` of `from` into custody and schedule
    /// `no_of_swaps` equal installments into `to` on the given interval.
    pub fn create(
        &mut self,
        caller: Address,
        request: &CreateRequest,
        now: u64,
    ) -> EngineResult<u64> {
        self.ensure_not_paused()?;
        let prepared = self.prepare_create(request)?;
        self.commit_create(caller, prepared, now)
    }

    /// Open several positions atomically: every request is validated before
    /// the first one commits, so a bad entry aborts the whole batch.
    pub fn create_batch(
        &mut self,
        caller: Address,
        requests: &[CreateRequest],
        now: u64,
    ) -> EngineResult<Vec<u64>> {
        self.ensure_not_paused()?;
        let prepared: Vec<PreparedCreate> = requests
            .iter()
            .map(|r| self.prepare_create(r))
            .collect::<EngineResult<_>>()?;

        let mut ids = Vec::with_capacity(prepared.len());
        for p in prepared {
            ids.push(self.commit_create(caller, p, now)?);
        }
        if !ids.is_empty() {
            self.push_event(EngineEvent::CreatedBatched {
                owner: caller,
                position_ids: ids.clone(),
            });
        }
        Ok(ids)
    }

    fn prepare_create(&self, request: &CreateRequest) -> EngineResult<PreparedCreate> {
        let from = self.resolve_token(request.from)?;
        let to = self.resolve_token(request.to)?;
        if request.amount.is_zero() {
            return Err(EngineError::InvalidAmount);
        }
        if request.no_of_swaps == 0 || request.no_of_swaps > self.max_no_of_swaps {
            return Err(EngineError::InvalidNoOfSwaps);
        }
        if from == to {
            return Err(EngineError::InvalidToken);
        }
        if !self.allowed_tokens.contains(&from) || !self.allowed_tokens.contains(&to) {
            return Err(EngineError::UnauthorizedTokens);
        }
        let mask = self
            .registry
            .mask_for(request.interval)
            .filter(|m| self.registry.is_allowed(*m))
            .ok_or(EngineError::InvalidInterval)?;

        let rate = request.amount / U256::from(request.no_of_swaps);
        if rate.is_zero() {
            return Err(EngineError::InvalidRate);
        }

        Ok(PreparedCreate {
            from,
            to,
            mask,
            interval: request.interval,
            rate,
            amount: request.amount,
            no_of_swaps: request.no_of_swaps,
        })
    }

    fn commit_create(
        &mut self,
        owner: Address,
        prepared: PreparedCreate,
        now: u64,
    ) -> EngineResult<u64> {
        self.custody.pull(prepared.from, owner, prepared.amount)?;

        self.total_created_positions += 1;
        let id = self.total_created_positions;
        let pair = Pair::new(prepared.from, prepared.to);

        self.triples.set_active_bit(pair, prepared.mask);
        let performed = self
            .triples
            .entry(TripleId::new(pair, prepared.mask))
            .performed_swaps;
        let (starting_swap, final_swap) = schedule::add_to_delta(
            &mut self.triples,
            &self.registry,
            pair,
            prepared.mask,
            prepared.rate,
            performed,
            performed + prepared.no_of_swaps,
            now,
            self.threshold_guard,
        );

        let remainder = prepared.amount - prepared.rate * U256::from(prepared.no_of_swaps);
        self.positions.insert(
            id,
            Position {
                owner,
                from: prepared.from,
                to: prepared.to,
                mask: prepared.mask,
                rate: prepared.rate,
                starting_swap,
                final_swap,
                last_updated_swap: performed,
                remainder,
            },
        );

        info!(
            "position {} created: {} of {} over {} swaps (rate {}) for {}",
            id, prepared.amount, prepared.from, prepared.no_of_swaps, prepared.rate, owner
        );
        self.push_event(EngineEvent::Created {
            position_id: id,
            owner,
            from: prepared.from,
            to: prepared.to,
            interval: prepared.interval,
            rate: prepared.rate,
            starting_swap,
            final_swap,
            amount: prepared.amount,
        });
        Ok(id)
    }

    /// Reinterpret a position as if recreated with its residual unswapped
    /// balance adjusted by ±`amount`, spread over `no_of_swaps` remaining
    /// installments. Earnings so far are frozen into the carry sidecar.
    pub fn modify(
        &mut self,
        caller: Address,
        position_id: u64,
        amount: U256,
        no_of_swaps: u64,
        is_increase: bool,
        now: u64,
    ) -> EngineResult<()> {
        self.ensure_not_paused()?;
        let position = self
            .positions
            .get(&position_id)
            .cloned()
            .ok_or(EngineError::InvalidPosition(position_id))?;
        if position.owner != caller {
            return Err(EngineError::UnauthorizedCaller);
        }

        let triple_id = position.triple_id();
        let performed = self
            .triples
            .get(&triple_id)
            .map(|t| t.performed_swaps)
            .unwrap_or_default();

        let remaining = position.remaining_swaps(performed);
        let unswapped_old = position.rate * U256::from(remaining);
        let unswapped_new = if is_increase {
            unswapped_old + amount
        } else {
            unswapped_old
                .checked_sub(amount)
                .ok_or(EngineError::InvalidAmount)?
        };

        if unswapped_new == unswapped_old && no_of_swaps == remaining {
            return Err(EngineError::NoChanges);
        }
        if unswapped_new.is_zero() {
            if no_of_swaps != 0 {
                return Err(EngineError::InvalidNoOfSwaps);
            }
        } else if no_of_swaps == 0 || no_of_swaps > self.max_no_of_swaps {
            return Err(EngineError::InvalidNoOfSwaps);
        }

        let new_rate = if no_of_swaps > 0 {
            unswapped_new / U256::from(no_of_swaps)
        } else {
            U256::ZERO
        };
        let new_carry = self.swapped_amount(position_id, &position);

        // Settle the balance difference before any state changes.
        if !amount.is_zero() {
            if is_increase {
                self.custody.pull(position.from, caller, amount)?;
            } else {
                self.custody.pay(position.from, caller, amount)?;
            }
        }

        schedule::remove_from_delta(&mut self.triples, &position);

        let pair = position.pair();
        let (starting_swap, final_swap) = if new_rate.is_zero() {
            if !self
                .triples
                .get(&triple_id)
                .map(|t| t.has_pending())
                .unwrap_or(false)
            {
                self.triples.clear_active_bit(pair, position.mask);
            }
            (performed, performed + no_of_swaps)
        } else {
            self.triples.set_active_bit(pair, position.mask);
            schedule::add_to_delta(
                &mut self.triples,
                &self.registry,
                pair,
                position.mask,
                new_rate,
                performed,
                performed + no_of_swaps,
                now,
                self.threshold_guard,
            )
        };

        let truncation = unswapped_new - new_rate * U256::from(no_of_swaps);
        let stored = self
            .positions
            .get_mut(&position_id)
            .ok_or(EngineError::InvalidPosition(position_id))?;
        stored.rate = new_rate;
        stored.starting_swap = starting_swap;
        stored.final_swap = final_swap;
        stored.last_updated_swap = performed;
        stored.remainder += truncation;
        self.carry.insert(position_id, new_carry);

        info!(
            "position {} modified: rate {} swaps [{}, {})",
            position_id, new_rate, starting_swap, final_swap
        );
        self.push_event(EngineEvent::Modified {
            position_id,
            rate: new_rate,
            starting_swap,
            final_swap,
        });
        Ok(())
    }

    /// Close a position and pay out both sides: unswapped source tokens (plus
    /// the truncation remainder) and swapped destination tokens. Available
    /// while paused.
    pub fn terminate(
        &mut self,
        caller: Address,
        position_id: u64,
        recipient: Address,
    ) -> EngineResult<(U256, U256)> {
        if recipient.is_zero() {
            return Err(EngineError::ZeroAddress);
        }
        let position = self
            .positions
            .get(&position_id)
            .cloned()
            .ok_or(EngineError::InvalidPosition(position_id))?;
        if position.owner != caller {
            return Err(EngineError::UnauthorizedCaller);
        }

        let performed = self
            .triples
            .get(&position.triple_id())
            .map(|t| t.performed_swaps)
            .unwrap_or_default();
        let unswapped = position.unswapped(performed) + position.remainder;
        let swapped = self.swapped_amount(position_id, &position);

        if !unswapped.is_zero() {
            self.custody.pay(position.from, recipient, unswapped)?;
        }
        if !swapped.is_zero() {
            self.custody.pay(position.to, recipient, swapped)?;
        }

        schedule::remove_from_delta(&mut self.triples, &position);
        if !self
            .triples
            .get(&position.triple_id())
            .map(|t| t.has_pending())
            .unwrap_or(false)
        {
            self.triples.clear_active_bit(position.pair(), position.mask);
        }
        self.positions.remove(&position_id);
        self.carry.remove(&position_id);

        info!(
            "position {} terminated: {} unswapped, {} swapped to {}",
            position_id, unswapped, swapped, recipient
        );
        self.push_event(EngineEvent::Terminated {
            position_id,
            recipient,
            unswapped,
            swapped,
        });
        Ok((unswapped, swapped))
    }

    /// Pay out everything swapped so far and re-anchor the position at the
    /// current swap number. The position stays active. Available while paused.
    pub fn withdraw(
        &mut self,
        caller: Address,
        position_id: u64,
        recipient: Address,
    ) -> EngineResult<U256> {
        if recipient.is_zero() {
            return Err(EngineError::ZeroAddress);
        }
        let position = self
            .positions
            .get(&position_id)
            .cloned()
            .ok_or(EngineError::InvalidPosition(position_id))?;
        if position.owner != caller {
            return Err(EngineError::UnauthorizedCaller);
        }

        let swapped = self.swapped_amount(position_id, &position);
        if swapped.is_zero() {
            return Err(EngineError::ZeroSwappedTokens);
        }

        self.custody.pay(position.to, recipient, swapped)?;

        let performed = self
            .triples
            .get(&position.triple_id())
            .map(|t| t.performed_swaps)
            .unwrap_or_default();
        if let Some(stored) = self.positions.get_mut(&position_id) {
            stored.last_updated_swap = performed;
        }
        self.carry.remove(&position_id);

        info!("position {position_id} withdrew {swapped} to {recipient}");
        self.push_event(EngineEvent::Withdrawn {
            position_id,
            recipient,
            swapped,
        });
        Ok(swapped)
    }

    /// Hand the position to a new owner; no other state changes.
    pub fn transfer_ownership(
        &mut self,
        caller: Address,
        position_id: u64,
        new_owner: Address,
    ) -> EngineResult<()> {
        self.ensure_not_paused()?;
        if new_owner.is_zero() {
            return Err(EngineError::ZeroAddress);
        }
        let position = self
            .positions
            .get_mut(&position_id)
            .ok_or(EngineError::InvalidPosition(position_id))?;
        if position.owner != caller {
            return Err(EngineError::UnauthorizedCaller);
        }
        let previous_owner = position.owner;
        position.owner = new_owner;

        self.push_event(EngineEvent::PositionOwnerUpdated {
            position_id,
            previous_owner,
            new_owner,
        });
        Ok(())
    }

    /// Read-only view of a position.
    pub fn position_details(&self, position_id: u64) -> EngineResult<PositionDetails> {
        let position = self
            .positions
            .get(&position_id)
            .ok_or(EngineError::InvalidPosition(position_id))?;
        let performed = self
            .triples
            .get(&position.triple_id())
            .map(|t| t.performed_swaps)
            .unwrap_or_default();

        Ok(PositionDetails {
            position_id,
            owner: position.owner,
            from: position.from,
            to: position.to,
            interval: self.registry.duration(position.mask).unwrap_or_default(),
            rate: position.rate,
            swaps_executed: position.executed_swaps(performed),
            swaps_left: position.remaining_swaps(performed),
            swapped: self.swapped_amount(position_id, position),
            unswapped: position.unswapped(performed),
            remainder: position.remainder,
        })
    }

    /// Destination tokens earned since the position's anchor, reconstructed
    /// from the accumulated-ratio series: `(accum[fin] - accum[anchor]) *
    /// rate / magnitude(from)`, plus whatever the carry froze earlier.
    pub(crate) fn swapped_amount(&self, position_id: u64, position: &Position) -> U256 {
        let Some(triple) = self.triples.get(&position.triple_id()) else {
            return U256::ZERO;
        };
        let fin = triple.performed_swaps.min(position.final_swap);
        let carry = self.carry.get(&position_id).copied().unwrap_or_default();

        if position.last_updated_swap > fin {
            return U256::ZERO;
        }
        if position.last_updated_swap == fin {
            return carry;
        }

        let anchor = position.last_updated_swap.max(position.starting_swap);
        let accrued = (triple.accum_at(fin) - triple.accum_at(anchor)) * position.rate
            / self.magnitude(position.from);
        accrued + carry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::*;
    use crate::engine::SwapIntent;
    use crate::market::FixedPriceMarket;

    fn request(amount: u64, no_of_swaps: u64) -> CreateRequest {
        CreateRequest {
            from: TOKEN_A,
            to: TOKEN_B,
            interval: HOUR,
            amount: U256::from(amount),
            no_of_swaps,
        }
    }

    /// Fire one aggregated swap for the pair at `now`.
    fn run_swap(engine: &mut DcaEngine, market: &mut FixedPriceMarket, now: u64) {
        let pair = Pair::new(TOKEN_A, TOKEN_B);
        let info = engine.next_swap_info(&[pair], now).remove(0);
        engine
            .swap(
                OPERATOR,
                &[SwapIntent {
                    pair,
                    declared_input: info.total_input,
                    min_out: U256::ZERO,
                    proxy: MARKET_ACCOUNT,
                    data: vec![],
                }],
                OPERATOR,
                market,
                now,
            )
            .unwrap();
    }

    #[test]
    fn test_create_schedules_and_pulls_funds() {
        let (mut engine, ledger, _) = engine();
        let before = ledger.balance(TOKEN_A, ALICE);

        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        assert_eq!(id, 1);

        let position = engine.positions.get(&1).unwrap();
        assert_eq!(position.rate, U256::from(200));
        assert_eq!(position.starting_swap, 0);
        assert_eq!(position.final_swap, 5);
        assert_eq!(position.remainder, U256::ZERO);

        assert_eq!(ledger.balance(TOKEN_A, ALICE), before - U256::from(1000));
        assert_eq!(ledger.balance(TOKEN_A, ENGINE_ACCOUNT), U256::from(1000));

        let triple = engine
            .triples
            .get(&TripleId::new(Pair::new(TOKEN_A, TOKEN_B), 0b1))
            .unwrap();
        assert_eq!(triple.next_amount, U256::from(200));
        assert_eq!(triple.delta[&6], U256::from(200));
        assert_invariants(&engine);
    }

    #[test]
    fn test_create_validation_errors() {
        let (mut engine, _, _) = engine();

        let mut bad = request(1000, 5);
        bad.from = Address::ZERO;
        assert_eq!(engine.create(ALICE, &bad, 0), Err(EngineError::ZeroAddress));

        assert_eq!(
            engine.create(ALICE, &request(0, 5), 0),
            Err(EngineError::InvalidAmount)
        );
        assert_eq!(
            engine.create(ALICE, &request(1000, 0), 0),
            Err(EngineError::InvalidNoOfSwaps)
        );
        assert_eq!(
            engine.create(ALICE, &request(1000, 256), 0),
            Err(EngineError::InvalidNoOfSwaps)
        );

        let mut bad = request(1000, 5);
        bad.to = TOKEN_A;
        assert_eq!(engine.create(ALICE, &bad, 0), Err(EngineError::InvalidToken));

        let mut bad = request(1000, 5);
        bad.to = Address::repeat_byte(0x77);
        assert_eq!(
            engine.create(ALICE, &bad, 0),
            Err(EngineError::UnauthorizedTokens)
        );

        let mut bad = request(1000, 5);
        bad.interval = 7200;
        assert_eq!(
            engine.create(ALICE, &bad, 0),
            Err(EngineError::InvalidInterval)
        );

        // floor(3 / 5) == 0
        assert_eq!(
            engine.create(ALICE, &request(3, 5), 0),
            Err(EngineError::InvalidRate)
        );

        // Nothing leaked into the stores.
        assert!(engine.positions.is_empty());
        assert_eq!(engine.total_created_positions, 0);
    }

    #[test]
    fn test_native_sentinel_resolves_to_wrapped_form() {
        use crate::custody::InMemoryCustody;

        let mut cfg = config();
        cfg.wrapped_native = Some(TOKEN_A);
        let ledger = InMemoryCustody::new(ENGINE_ACCOUNT);
        ledger.credit(TOKEN_A, ALICE, U256::from(10_000u64));
        let mut engine = DcaEngine::new(cfg, Box::new(ledger.clone())).unwrap();

        let mut req = request(1000, 5);
        req.from = Address::ZERO;
        let id = engine.create(ALICE, &req, 0).unwrap();

        assert_eq!(engine.positions[&id].from, TOKEN_A);
        assert_eq!(ledger.balance(TOKEN_A, ENGINE_ACCOUNT), U256::from(1000));
    }

    #[test]
    fn test_create_batch_is_all_or_nothing() {
        let (mut engine, ledger, _) = engine();
        let before = ledger.balance(TOKEN_A, ALICE);

        let err = engine
            .create_batch(ALICE, &[request(1000, 5), request(3, 5)], 0)
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidRate);
        assert!(engine.positions.is_empty());
        assert_eq!(ledger.balance(TOKEN_A, ALICE), before);

        let ids = engine
            .create_batch(ALICE, &[request(1000, 5), request(400, 4)], 0)
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        let events = engine.take_events();
        assert!(matches!(
            events.last(),
            Some(EngineEvent::CreatedBatched { position_ids, .. }) if position_ids == &vec![1, 2]
        ));
        assert_invariants(&engine);
    }

    /// Mid-flight increase: residual 3 swaps of 200 plus 600 new tokens over
    /// 3 swaps at rate 400; earnings so far freeze into the carry.
    #[test]
    fn test_modify_increase_mid_flight() {
        let (mut engine, ledger, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(2), U256::from(1));

        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        run_swap(&mut engine, &mut market, HOUR);
        run_swap(&mut engine, &mut market, 2 * HOUR);

        engine
            .modify(ALICE, id, U256::from(600), 3, true, 2 * HOUR + 10)
            .unwrap();

        let position = engine.positions.get(&id).unwrap();
        assert_eq!(position.rate, U256::from(400));
        assert_eq!(position.starting_swap, 2);
        assert_eq!(position.final_swap, 5);
        assert_eq!(position.last_updated_swap, 2);
        // Two swaps of 200 at 2 B per A.
        assert_eq!(engine.carry[&id], U256::from(800));
        assert_invariants(&engine);

        run_swap(&mut engine, &mut market, 3 * HOUR);
        run_swap(&mut engine, &mut market, 4 * HOUR);
        run_swap(&mut engine, &mut market, 5 * HOUR);

        let withdrawn = engine.withdraw(ALICE, id, ALICE).unwrap();
        // 3 swaps of 400 at 2 B per A, plus the 800 carried.
        assert_eq!(withdrawn, U256::from(3200));

        let (unswapped, swapped) = engine.terminate(ALICE, id, ALICE).unwrap();
        assert_eq!(unswapped, U256::ZERO);
        assert_eq!(swapped, U256::ZERO);
        assert_eq!(ledger.balance(TOKEN_B, ALICE), U256::from(3200));
        assert_invariants(&engine);
    }

    #[test]
    fn test_modify_decrease_returns_funds() {
        let (mut engine, ledger, _) = engine();
        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        let before = ledger.balance(TOKEN_A, ALICE);

        engine
            .modify(ALICE, id, U256::from(400), 3, false, 10)
            .unwrap();

        let position = engine.positions.get(&id).unwrap();
        assert_eq!(position.rate, U256::from(200));
        assert_eq!(position.final_swap - position.starting_swap, 3);
        assert_eq!(ledger.balance(TOKEN_A, ALICE), before + U256::from(400));
        assert_invariants(&engine);
    }

    #[test]
    fn test_modify_to_zero_parks_the_position() {
        let (mut engine, ledger, _) = engine();
        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        let before = ledger.balance(TOKEN_A, ALICE);

        engine
            .modify(ALICE, id, U256::from(1000), 0, false, 10)
            .unwrap();

        let position = engine.positions.get(&id).unwrap();
        assert_eq!(position.rate, U256::ZERO);
        assert_eq!(position.remaining_swaps(0), 0);
        assert_eq!(ledger.balance(TOKEN_A, ALICE), before + U256::from(1000));
        // Stream is empty again; the interval bit must drop.
        assert_eq!(
            engine.triples.active_mask(Pair::new(TOKEN_A, TOKEN_B)),
            0
        );
        assert_invariants(&engine);
    }

    #[test]
    fn test_modify_validation() {
        let (mut engine, _, _) = engine();
        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();

        // Same balance, same schedule.
        assert_eq!(
            engine.modify(ALICE, id, U256::ZERO, 5, true, 10),
            Err(EngineError::NoChanges)
        );
        // Underflow.
        assert_eq!(
            engine.modify(ALICE, id, U256::from(1001), 5, false, 10),
            Err(EngineError::InvalidAmount)
        );
        // Money left but zero swaps.
        assert_eq!(
            engine.modify(ALICE, id, U256::from(500), 0, false, 10),
            Err(EngineError::InvalidNoOfSwaps)
        );
        // Nothing left but a swap count.
        assert_eq!(
            engine.modify(ALICE, id, U256::from(1000), 3, false, 10),
            Err(EngineError::InvalidNoOfSwaps)
        );
        // Over the maximum.
        assert_eq!(
            engine.modify(ALICE, id, U256::ZERO, 300, true, 10),
            Err(EngineError::InvalidNoOfSwaps)
        );
        // Unknown position / foreign owner.
        assert_eq!(
            engine.modify(ALICE, 99, U256::ZERO, 5, true, 10),
            Err(EngineError::InvalidPosition(99))
        );
        assert_eq!(
            engine.modify(BOB, id, U256::from(100), 5, true, 10),
            Err(EngineError::UnauthorizedCaller)
        );
        assert_invariants(&engine);
    }

    /// Truncation residue: 1000 over 3 swaps commits 999; the orphaned token
    /// comes back at termination.
    #[test]
    fn test_terminate_returns_truncation_remainder() {
        let (mut engine, ledger, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(1), U256::from(1));

        let id = engine.create(ALICE, &request(1000, 3), 0).unwrap();
        assert_eq!(engine.positions[&id].rate, U256::from(333));
        assert_eq!(engine.positions[&id].remainder, U256::from(1));

        run_swap(&mut engine, &mut market, HOUR);
        run_swap(&mut engine, &mut market, 2 * HOUR);
        run_swap(&mut engine, &mut market, 3 * HOUR);

        assert_eq!(engine.withdraw(ALICE, id, ALICE).unwrap(), U256::from(999));

        let a_before = ledger.balance(TOKEN_A, ALICE);
        let (unswapped, swapped) = engine.terminate(ALICE, id, ALICE).unwrap();
        assert_eq!(unswapped, U256::from(1));
        assert_eq!(swapped, U256::ZERO);
        assert_eq!(ledger.balance(TOKEN_A, ALICE), a_before + U256::from(1));
        assert!(engine.positions.is_empty());
    }

    #[test]
    fn test_terminate_mid_flight_pays_both_sides() {
        let (mut engine, ledger, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(2), U256::from(1));

        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        run_swap(&mut engine, &mut market, HOUR);
        run_swap(&mut engine, &mut market, 2 * HOUR);

        let a_before = ledger.balance(TOKEN_A, ALICE);
        let (unswapped, swapped) = engine.terminate(ALICE, id, ALICE).unwrap();
        assert_eq!(unswapped, U256::from(600));
        assert_eq!(swapped, U256::from(800));
        assert_eq!(ledger.balance(TOKEN_A, ALICE), a_before + U256::from(600));
        assert_eq!(ledger.balance(TOKEN_B, ALICE), U256::from(800));

        // Stream emptied out.
        assert_eq!(engine.triples.active_mask(Pair::new(TOKEN_A, TOKEN_B)), 0);
        assert_invariants(&engine);
    }

    /// Two consecutive withdrawals with no swap in between: the second one
    /// has nothing to pay.
    #[test]
    fn test_withdraw_is_idempotent_per_swap() {
        let (mut engine, _, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(2), U256::from(1));

        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        assert_eq!(
            engine.withdraw(ALICE, id, ALICE),
            Err(EngineError::ZeroSwappedTokens)
        );

        run_swap(&mut engine, &mut market, HOUR);
        assert_eq!(engine.withdraw(ALICE, id, ALICE).unwrap(), U256::from(400));
        assert_eq!(
            engine.withdraw(ALICE, id, ALICE),
            Err(EngineError::ZeroSwappedTokens)
        );

        run_swap(&mut engine, &mut market, 2 * HOUR);
        assert_eq!(engine.withdraw(ALICE, id, ALICE).unwrap(), U256::from(400));
    }

    /// Equal positions must earn equally at every observation point.
    #[test]
    fn test_identical_positions_split_fairly() {
        let (mut engine, _, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(3), U256::from(1));

        let a = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        let b = engine.create(BOB, &request(1000, 5), 0).unwrap();

        for i in 1..=5u64 {
            run_swap(&mut engine, &mut market, i * HOUR);
            let pa = engine.positions[&a].clone();
            let pb = engine.positions[&b].clone();
            assert_eq!(
                engine.swapped_amount(a, &pa),
                engine.swapped_amount(b, &pb),
                "diverged after swap {i}"
            );
        }
        assert_invariants(&engine);
    }

    #[test]
    fn test_transfer_ownership() {
        let (mut engine, _, _) = engine();
        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();

        assert_eq!(
            engine.transfer_ownership(BOB, id, BOB),
            Err(EngineError::UnauthorizedCaller)
        );
        assert_eq!(
            engine.transfer_ownership(ALICE, id, Address::ZERO),
            Err(EngineError::ZeroAddress)
        );

        engine.transfer_ownership(ALICE, id, BOB).unwrap();
        assert_eq!(engine.positions[&id].owner, BOB);

        // Previous owner lost all access.
        assert_eq!(
            engine.modify(ALICE, id, U256::from(1), 5, true, 10),
            Err(EngineError::UnauthorizedCaller)
        );
        engine.modify(BOB, id, U256::from(100), 5, true, 10).unwrap();
    }

    /// Paused: no creates, modifies or transfers, but exits stay open.
    #[test]
    fn test_pause_keeps_exits_open() {
        let (mut engine, _, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(2), U256::from(1));

        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        run_swap(&mut engine, &mut market, HOUR);

        engine.pause(GOVERNOR).unwrap();
        assert_eq!(
            engine.create(ALICE, &request(1000, 5), HOUR + 1),
            Err(EngineError::Paused)
        );
        assert_eq!(
            engine.modify(ALICE, id, U256::from(1), 4, true, HOUR + 1),
            Err(EngineError::Paused)
        );
        assert_eq!(
            engine.transfer_ownership(ALICE, id, BOB),
            Err(EngineError::Paused)
        );

        assert_eq!(engine.withdraw(ALICE, id, ALICE).unwrap(), U256::from(400));
        engine.terminate(ALICE, id, ALICE).unwrap();

        engine.unpause(GOVERNOR).unwrap();
        engine.create(ALICE, &request(1000, 5), HOUR + 1).unwrap();
    }

    /// Externally-sent tokens to the engine account must not leak into any
    /// position's entitlement: `swapped` reads the accumulated series, not
    /// balances.
    #[test]
    fn test_balance_inflation_does_not_distort_entitlements() {
        let (mut engine, ledger, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(2), U256::from(1));

        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        run_swap(&mut engine, &mut market, HOUR);

        let position = engine.positions[&id].clone();
        let entitled = engine.swapped_amount(id, &position);

        // Someone airdrops destination tokens onto the pool.
        ledger.credit(TOKEN_B, ENGINE_ACCOUNT, U256::from(1_000_000u64));
        assert_eq!(engine.swapped_amount(id, &position), entitled);

        assert_eq!(engine.withdraw(ALICE, id, ALICE).unwrap(), entitled);
    }

    #[test]
    fn test_position_details_view() {
        let (mut engine, _, mut market) = engine();
        market.set_price(TOKEN_A, TOKEN_B, U256::from(2), U256::from(1));

        let id = engine.create(ALICE, &request(1000, 5), 0).unwrap();
        run_swap(&mut engine, &mut market, HOUR);
        run_swap(&mut engine, &mut market, 2 * HOUR);

        let details = engine.position_details(id).unwrap();
        assert_eq!(details.owner, ALICE);
        assert_eq!(details.interval, HOUR);
        assert_eq!(details.rate, U256::from(200));
        assert_eq!(details.swaps_executed, 2);
        assert_eq!(details.swaps_left, 3);
        assert_eq!(details.swapped, U256::from(800));
        assert_eq!(details.unswapped, U256::from(600));

        assert_eq!(
            engine.position_details(42),
            Err(EngineError::InvalidPosition(42))
        );
    }
}
