//! FIFO allocation of payments against outstanding charges.

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{Ledger, LedgerError, NotFoundError, ValidationError};
use crate::Amount;
use crate::model::{ActorId, Allocation, Charge, Id, Payment, PlayerId};
use crate::store::{Change, ChangeSet, LedgerStore};

/// One slice of a payment destined for one charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedAllocation {
    pub charge_id: Id,
    pub amount: Amount,
}

/// The result of walking a player's charges with one payment amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub payment_id: Id,
    pub allocations: Vec<PlannedAllocation>,
    /// Left over once every charge is settled.
    pub unallocated: Amount,
}

/// Result of a verification, allocation or recalculation.
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub payment: Payment,
    pub allocations: Vec<Allocation>,
    pub unallocated: Amount,
}

impl AllocationOutcome {
    /// Some of the payment could not be applied to any charge.
    pub fn is_partial(&self) -> bool {
        self.unallocated.is_positive()
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    charge_id: Id,
    charge_date: NaiveDate,
    outstanding: Amount,
}

/// A player's non-voided charges in FIFO order with their outstanding amounts.
///
/// Each call to [`allocate`](FifoPlanner::allocate) consumes outstanding
/// amounts, so several payments can be planned in sequence.
#[derive(Debug, Clone)]
pub struct FifoPlanner {
    slots: Vec<Slot>,
}

impl FifoPlanner {
    /// Build from a player's charges and the allocations already against them,
    /// ignoring allocations rejected by `keep`.
    pub fn new<'a>(
        player: PlayerId,
        charges: impl IntoIterator<Item = &'a Charge>,
        allocations: impl IntoIterator<Item = &'a Allocation>,
        keep: impl Fn(&Allocation) -> bool,
    ) -> Self {
        let mut already: HashMap<Id, Amount> = HashMap::new();
        for allocation in allocations.into_iter().filter(|a| keep(a)) {
            *already.entry(allocation.charge_id).or_default() += allocation.amount;
        }

        let mut slots: Vec<Slot> = charges
            .into_iter()
            .filter(|c| c.player_id == player && !c.voided)
            .map(|c| Slot {
                charge_id: c.id,
                charge_date: c.charge_date,
                outstanding: c.amount - already.get(&c.id).copied().unwrap_or_default(),
            })
            .collect();
        // oldest debt first, id breaks ties
        slots.sort_by_key(|s| (s.charge_date, s.charge_id));

        Self { slots }
    }

    /// Outstanding amount per charge, in FIFO order.
    pub fn outstanding(&self) -> impl Iterator<Item = (Id, Amount)> + '_ {
        self.slots.iter().map(|s| (s.charge_id, s.outstanding))
    }

    pub fn allocate(&mut self, payment_id: Id, amount: Amount) -> AllocationPlan {
        let mut remaining = amount;
        let mut allocations = Vec::new();

        for slot in &mut self.slots {
            if !remaining.is_positive() {
                break;
            }
            if !slot.outstanding.is_positive() {
                continue;
            }
            let applied = remaining.min(slot.outstanding);
            slot.outstanding -= applied;
            remaining -= applied;
            allocations.push(PlannedAllocation {
                charge_id: slot.charge_id,
                amount: applied,
            });
        }

        AllocationPlan {
            payment_id,
            allocations,
            unallocated: remaining.max(Amount::ZERO),
        }
    }
}

/// Public allocation API
impl<S: LedgerStore> Ledger<S> {
    /// Allocate a verified payment that has no allocations yet.
    ///
    /// A payment that already carries allocations is returned unchanged.
    pub fn allocate(&self, payment_id: Id, actor: &str) -> Result<AllocationOutcome, LedgerError> {
        let payment = self.require_payment(payment_id)?;
        if !payment.verified {
            return Err(ValidationError::NotVerified(payment_id).into());
        }

        let existing = self.store.allocations_for_payment(payment_id)?;
        if !existing.is_empty() {
            return Ok(outcome(payment, existing));
        }

        let plan = self.plan_for(&payment, payment.amount, false)?;
        let mut changes = ChangeSet::new("allocate_payment", actor, self.clock.now());
        let allocations = self.push_plan(&mut changes, &plan, actor, "FIFO allocation")?;
        self.store.commit(changes)?;

        let result = outcome(payment, allocations);
        Self::log_allocation("allocate", &result);
        Ok(result)
    }

    /// Replace a payment's allocations after its amount changed.
    ///
    /// Existing allocations are discarded and FIFO is re-run with
    /// `new_amount`, ignoring what this payment had previously settled. With an
    /// unchanged amount this reproduces the same allocation set.
    pub fn recalculate(
        &self,
        payment_id: Id,
        new_amount: Amount,
        actor: &str,
    ) -> Result<AllocationOutcome, LedgerError> {
        ValidationError::check_amount(new_amount)?;
        let mut payment = self.require_payment(payment_id)?;
        if !payment.verified {
            return Err(ValidationError::NotVerified(payment_id).into());
        }

        let previous = self.store.allocations_for_payment(payment_id)?;
        let plan = self.plan_for(&payment, new_amount, true)?;

        let mut changes = ChangeSet::new("recalculate_allocations", actor, self.clock.now());
        changes.extend(previous.iter().map(|a| Change::DeleteAllocation(a.id)));
        if payment.amount != new_amount {
            changes.push(Change::SetPaymentAmount {
                id: payment_id,
                amount: new_amount,
            });
            payment.amount = new_amount;
        }
        let allocations = self.push_plan(&mut changes, &plan, actor, "Recalculated allocation")?;
        self.store.commit(changes)?;

        let result = outcome(payment, allocations);
        info!(
            payment = payment_id,
            removed = previous.len(),
            created = result.allocations.len(),
            "allocations recalculated"
        );
        Self::log_allocation("recalculate", &result);
        Ok(result)
    }
}

/// Private allocation helpers
impl<S: LedgerStore> Ledger<S> {
    /// Plan FIFO for `payment` against the current state of its player's
    /// charges. With `exclude_own`, this payment's existing allocations are
    /// treated as already removed.
    pub(super) fn plan_for(
        &self,
        payment: &Payment,
        amount: Amount,
        exclude_own: bool,
    ) -> Result<AllocationPlan, LedgerError> {
        let snapshot = self.store.snapshot(Some(payment.player_id))?;
        let mut planner = FifoPlanner::new(
            payment.player_id,
            &snapshot.charges,
            &snapshot.allocations,
            |a| !(exclude_own && a.payment_id == payment.id),
        );
        Ok(planner.allocate(payment.id, amount))
    }

    /// Turn a plan into allocation rows appended to `changes`.
    pub(super) fn push_plan(
        &self,
        changes: &mut ChangeSet,
        plan: &AllocationPlan,
        actor: &str,
        note: &str,
    ) -> Result<Vec<Allocation>, LedgerError> {
        let today = self.clock.today();
        let mut rows = Vec::with_capacity(plan.allocations.len());
        for planned in &plan.allocations {
            let allocation = Allocation {
                id: self.store.reserve_id()?,
                payment_id: plan.payment_id,
                charge_id: planned.charge_id,
                amount: planned.amount,
                allocation_date: today,
                allocated_by: ActorId::from(actor),
                notes: Some(note.to_string()),
            };
            changes.push(Change::InsertAllocation(allocation.clone()));
            rows.push(allocation);
        }
        Ok(rows)
    }

    pub(super) fn require_payment(&self, id: Id) -> Result<Payment, LedgerError> {
        self.store
            .payment(id)?
            .ok_or_else(|| NotFoundError::Payment(id).into())
    }

    pub(super) fn log_allocation(operation: &str, result: &AllocationOutcome) {
        let allocated: Amount = result.allocations.iter().map(|a| a.amount).sum();
        if result.is_partial() {
            warn!(
                player = result.payment.player_id,
                payment = result.payment.id,
                allocated = %allocated,
                unallocated = %result.unallocated,
                "{operation}: payment only partially allocated"
            );
        } else {
            info!(
                player = result.payment.player_id,
                payment = result.payment.id,
                allocated = %allocated,
                charges = result.allocations.len(),
                "{operation}: payment fully allocated"
            );
        }
    }
}

pub(super) fn outcome(payment: Payment, allocations: Vec<Allocation>) -> AllocationOutcome {
    let allocated: Amount = allocations.iter().map(|a| a.amount).sum();
    AllocationOutcome {
        unallocated: (payment.amount - allocated).max(Amount::ZERO),
        payment,
        allocations,
    }
}
