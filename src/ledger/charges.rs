use std::collections::BTreeSet;
use tracing::{info, warn};

use super::{FifoPlanner, Ledger, LedgerError, NotFoundError, ValidationError, VoidError};
use crate::Amount;
use crate::config::VoidPolicy;
use crate::model::{Charge, Id, NewCharge};
use crate::store::{Change, ChangeSet, LedgerStore};

impl<S: LedgerStore> Ledger<S> {
    /// Record a new charge. Existing allocations are left alone; the charge
    /// is picked up by the next verification for its player.
    pub fn create_charge(&self, new: NewCharge, actor: &str) -> Result<Charge, LedgerError> {
        if new.player_id == 0 {
            return Err(ValidationError::MissingPlayer.into());
        }
        ValidationError::check_amount(new.amount)?;
        if new.charge_type.trim().is_empty() {
            return Err(ValidationError::MissingChargeType.into());
        }

        let id = match new.id {
            Some(id) => id,
            None => self.store.reserve_id()?,
        };
        let charge = Charge {
            id,
            player_id: new.player_id,
            charge_type: new.charge_type.trim().to_string(),
            amount: new.amount,
            charge_date: new.charge_date,
            due_date: new.due_date,
            reference_type: new.reference_type,
            reference_id: new.reference_id,
            voided: false,
            voided_reason: None,
        };

        let mut changes = ChangeSet::new("create_charge", actor, self.clock.now());
        changes.push(Change::InsertCharge(charge.clone()));
        self.store.commit(changes)?;

        info!(
            player = charge.player_id,
            charge = charge.id,
            amount = %charge.amount,
            charge_type = %charge.charge_type,
            "charge created"
        );
        Ok(charge)
    }

    /// Void a charge. Charges are never deleted.
    ///
    /// A charge with allocations against it is refused under
    /// [`VoidPolicy::Forbid`]. Under [`VoidPolicy::Cascade`] those allocations
    /// are reversed and each affected payment is re-run through FIFO against
    /// the player's remaining charges, all in one commit.
    pub fn void_charge(&self, id: Id, reason: &str, actor: &str) -> Result<Charge, LedgerError> {
        let mut charge = self
            .store
            .charge(id)?
            .ok_or(NotFoundError::Charge(id))?;
        if charge.voided {
            return Err(VoidError::AlreadyVoided(id).into());
        }

        let against = self.store.allocations_for_charge(id)?;
        let allocated: Amount = against.iter().map(|a| a.amount).sum();

        let mut changes = ChangeSet::new("void_charge", actor, self.clock.now());
        if !against.is_empty() {
            if self.config.void_policy == VoidPolicy::Forbid {
                warn!(
                    player = charge.player_id,
                    charge = id,
                    allocated = %allocated,
                    "refusing to void charge with allocations"
                );
                return Err(VoidError::HasAllocations(id, allocated).into());
            }
            self.push_void_cascade(&mut changes, &charge, actor)?;
        }

        changes.push(Change::VoidCharge {
            id,
            reason: reason.to_string(),
        });
        self.store.commit(changes)?;

        charge.voided = true;
        charge.voided_reason = Some(reason.to_string());
        info!(
            player = charge.player_id,
            charge = id,
            reversed = %allocated,
            reason,
            "charge voided"
        );
        Ok(charge)
    }

    /// Reverse every allocation against `charge` and re-apply the freed
    /// amounts of the affected payments, in payment id order.
    fn push_void_cascade(
        &self,
        changes: &mut ChangeSet,
        charge: &Charge,
        actor: &str,
    ) -> Result<(), LedgerError> {
        let snapshot = self.store.snapshot(Some(charge.player_id))?;
        let affected: BTreeSet<Id> = snapshot
            .allocations
            .iter()
            .filter(|a| a.charge_id == charge.id)
            .map(|a| a.payment_id)
            .collect();

        let remaining_charges = snapshot.charges.iter().filter(|c| c.id != charge.id);
        let mut planner = FifoPlanner::new(
            charge.player_id,
            remaining_charges,
            &snapshot.allocations,
            |a| a.charge_id != charge.id,
        );

        for allocation in snapshot.allocations.iter().filter(|a| a.charge_id == charge.id) {
            changes.push(Change::DeleteAllocation(allocation.id));
        }

        for payment_id in affected {
            let Some(payment) = snapshot.payments.iter().find(|p| p.id == payment_id) else {
                continue;
            };
            let kept: Amount = snapshot
                .allocations
                .iter()
                .filter(|a| a.payment_id == payment_id && a.charge_id != charge.id)
                .map(|a| a.amount)
                .sum();
            let freed = payment.amount - kept;
            if !freed.is_positive() {
                continue;
            }
            let plan = planner.allocate(payment_id, freed);
            self.push_plan(changes, &plan, actor, "Reallocated after void")?;
            info!(
                payment = payment_id,
                reallocated = plan.allocations.len(),
                unallocated = %plan.unallocated,
                "payment reallocated after void"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Amount;
    use crate::config::{LedgerConfig, VoidPolicy};
    use crate::ledger::{LedgerError, ValidationError, VoidError};
    use crate::model::NewCharge;
    use crate::testing::{day, ledger, ledger_with, seed_charge, seed_verified_payment};

    #[test]
    fn create_charge_validates_input() {
        let ledger = ledger();
        let zero = NewCharge::new(1, "match_fee", Amount::ZERO, day(1));
        assert!(matches!(
            ledger.create_charge(zero, "t"),
            Err(LedgerError::Validation(ValidationError::NonPositiveAmount(_)))
        ));
        let no_player = NewCharge::new(0, "match_fee", Amount::units(5), day(1));
        assert!(matches!(
            ledger.create_charge(no_player, "t"),
            Err(LedgerError::Validation(ValidationError::MissingPlayer))
        ));
        let no_type = NewCharge::new(1, " ", Amount::units(5), day(1));
        assert!(matches!(
            ledger.create_charge(no_type, "t"),
            Err(LedgerError::Validation(ValidationError::MissingChargeType))
        ));
    }

    #[test]
    fn oversized_charges_are_rejected_and_large_totals_stay_exact() {
        let ledger = ledger();
        let huge = NewCharge::new(1, "match_fee", Amount::units(900_000_000_000_000), day(1));
        assert!(matches!(
            ledger.create_charge(huge, "t"),
            Err(LedgerError::Validation(ValidationError::AmountTooLarge(_)))
        ));

        for d in 1..=2 {
            let at_limit = NewCharge::new(1, "match_fee", Amount::MAX, day(d));
            ledger.create_charge(at_limit, "t").unwrap();
        }
        let balance = ledger.player_balance(1).unwrap();
        assert_eq!(balance.total_charges, Amount::units(2_000_000_000));
        assert_eq!(balance.balance, Amount::units(-2_000_000_000));
    }

    #[test]
    fn void_unallocated_charge_drops_it_from_balance() {
        let ledger = ledger();
        let charge = seed_charge(&ledger, 1, 20, 1);

        let voided = ledger.void_charge(charge.id, "fixture cancelled", "t").unwrap();
        assert!(voided.voided);
        assert_eq!(voided.voided_reason.as_deref(), Some("fixture cancelled"));

        let stored = ledger.store_charge(charge.id);
        assert!(stored.voided);
        assert_eq!(ledger.player_balance(1).unwrap().total_charges, Amount::ZERO);
    }

    #[test]
    fn void_twice_fails() {
        let ledger = ledger();
        let charge = seed_charge(&ledger, 1, 20, 1);
        ledger.void_charge(charge.id, "x", "t").unwrap();
        assert!(matches!(
            ledger.void_charge(charge.id, "x", "t"),
            Err(LedgerError::Void(VoidError::AlreadyVoided(_)))
        ));
    }

    #[test]
    fn void_with_allocations_is_forbidden_by_default() {
        let ledger = ledger();
        let charge = seed_charge(&ledger, 1, 20, 1);
        seed_verified_payment(&ledger, 1, 20, "REF1");

        let result = ledger.void_charge(charge.id, "x", "t");
        assert!(matches!(
            result,
            Err(LedgerError::Void(VoidError::HasAllocations(_, a))) if a == Amount::units(20)
        ));
        assert!(!ledger.store_charge(charge.id).voided);
    }

    #[test]
    fn cascade_void_reallocates_to_remaining_charges() {
        let config = LedgerConfig {
            void_policy: VoidPolicy::Cascade,
            ..LedgerConfig::default()
        };
        let ledger = ledger_with(config);
        let first = seed_charge(&ledger, 1, 20, 1);
        let second = seed_charge(&ledger, 1, 15, 2);
        let payment = seed_verified_payment(&ledger, 1, 25, "REF1");

        ledger.void_charge(first.id, "billed twice", "t").unwrap();

        let allocations = ledger.store_allocations(payment.id);
        assert_eq!(allocations.len(), 2);
        assert!(allocations.iter().all(|a| a.charge_id == second.id));
        let total: Amount = allocations.iter().map(|a| a.amount).sum();
        assert_eq!(total, Amount::units(15));
        assert_eq!(ledger.unallocated_amount(payment.id).unwrap(), Amount::units(10));

        let balance = ledger.player_balance(1).unwrap();
        assert_eq!(balance.balance, Amount::units(10));
    }
}
