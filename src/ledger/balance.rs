//! Per-player balances, derived from the current charges, payments and
//! allocations on every read. Nothing here is cached or stored.

use std::collections::{BTreeMap, HashMap};

use super::{Ledger, LedgerError};
use crate::Amount;
use crate::model::{Allocation, Charge, Id, Payment, PlayerId};
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerBalance {
    pub player_id: PlayerId,
    /// Sum of non-voided charges.
    pub total_charges: Amount,
    /// Sum of verified payments.
    pub total_payments: Amount,
    /// `total_payments - total_charges`; negative means the player owes money.
    pub balance: Amount,
    /// Verified payment money not applied to any charge.
    pub unallocated: Amount,
}

/// A charge together with how much of it is still unpaid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingCharge {
    pub charge: Charge,
    pub allocated: Amount,
    pub outstanding: Amount,
}

pub struct BalanceCalculator;

impl BalanceCalculator {
    /// Balances for every player appearing in `charges` or `payments`.
    pub fn compute(
        charges: &[Charge],
        payments: &[Payment],
        allocations: &[Allocation],
    ) -> BTreeMap<PlayerId, PlayerBalance> {
        let mut balances: BTreeMap<PlayerId, PlayerBalance> = BTreeMap::new();

        for charge in charges {
            let balance = Self::entry(&mut balances, charge.player_id);
            if !charge.voided {
                balance.total_charges += charge.amount;
            }
        }

        let allocated = Self::allocated_by_payment(allocations);
        for payment in payments {
            let balance = Self::entry(&mut balances, payment.player_id);
            if payment.verified {
                balance.total_payments += payment.amount;
                let applied = allocated.get(&payment.id).copied().unwrap_or_default();
                balance.unallocated += (payment.amount - applied).max(Amount::ZERO);
            }
        }

        for balance in balances.values_mut() {
            balance.balance = balance.total_payments - balance.total_charges;
        }
        balances
    }

    /// Non-voided charges of `player` with something left to pay, oldest first.
    pub fn outstanding(
        player: PlayerId,
        charges: &[Charge],
        allocations: &[Allocation],
    ) -> Vec<OutstandingCharge> {
        let mut by_charge: HashMap<Id, Amount> = HashMap::new();
        for allocation in allocations {
            *by_charge.entry(allocation.charge_id).or_default() += allocation.amount;
        }

        let mut outstanding: Vec<OutstandingCharge> = charges
            .iter()
            .filter(|c| c.player_id == player && !c.voided)
            .map(|c| {
                let allocated = by_charge.get(&c.id).copied().unwrap_or_default();
                OutstandingCharge {
                    charge: c.clone(),
                    allocated,
                    outstanding: c.amount - allocated,
                }
            })
            .filter(|o| o.outstanding.is_positive())
            .collect();
        outstanding.sort_by_key(|o| (o.charge.charge_date, o.charge.id));
        outstanding
    }

    fn entry(
        balances: &mut BTreeMap<PlayerId, PlayerBalance>,
        player: PlayerId,
    ) -> &mut PlayerBalance {
        balances.entry(player).or_insert_with(|| PlayerBalance {
            player_id: player,
            ..PlayerBalance::default()
        })
    }

    fn allocated_by_payment(allocations: &[Allocation]) -> HashMap<Id, Amount> {
        let mut by_payment: HashMap<Id, Amount> = HashMap::new();
        for allocation in allocations {
            *by_payment.entry(allocation.payment_id).or_default() += allocation.amount;
        }
        by_payment
    }
}

impl<S: LedgerStore> Ledger<S> {
    /// Balances of every player, recomputed from scratch.
    pub fn balances(&self) -> Result<BTreeMap<PlayerId, PlayerBalance>, LedgerError> {
        let snapshot = self.store.snapshot(None)?;
        Ok(BalanceCalculator::compute(
            &snapshot.charges,
            &snapshot.payments,
            &snapshot.allocations,
        ))
    }

    /// Balance of one player; all zeros for an unknown player.
    pub fn player_balance(&self, player: PlayerId) -> Result<PlayerBalance, LedgerError> {
        let snapshot = self.store.snapshot(Some(player))?;
        let balances =
            BalanceCalculator::compute(&snapshot.charges, &snapshot.payments, &snapshot.allocations);
        Ok(balances.get(&player).copied().unwrap_or(PlayerBalance {
            player_id: player,
            ..PlayerBalance::default()
        }))
    }

    pub fn outstanding_charges(&self, player: PlayerId) -> Result<Vec<OutstandingCharge>, LedgerError> {
        let snapshot = self.store.snapshot(Some(player))?;
        Ok(BalanceCalculator::outstanding(
            player,
            &snapshot.charges,
            &snapshot.allocations,
        ))
    }

    /// `payment.amount` minus what has been applied to charges.
    pub fn unallocated_amount(&self, payment_id: Id) -> Result<Amount, LedgerError> {
        let payment = self.require_payment(payment_id)?;
        let allocated: Amount = self
            .store
            .allocations_for_payment(payment_id)?
            .iter()
            .map(|a| a.amount)
            .sum();
        Ok((payment.amount - allocated).max(Amount::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{charge, payment};

    fn verified(mut p: Payment) -> Payment {
        p.verified = true;
        p
    }

    fn alloc(id: Id, payment_id: Id, charge_id: Id, amount: i64) -> Allocation {
        Allocation {
            id,
            payment_id,
            charge_id,
            amount: Amount::units(amount),
            allocation_date: crate::testing::day(1),
            allocated_by: "t".to_string(),
            notes: None,
        }
    }

    #[test]
    fn only_verified_payments_and_live_charges_count() {
        let mut voided = charge(3, 1, 100, 3);
        voided.voided = true;
        let charges = [charge(1, 1, 20, 1), charge(2, 1, 15, 2), voided];
        let payments = [verified(payment(4, 1, 25, "A")), payment(5, 1, 50, "B")];

        let balances = BalanceCalculator::compute(&charges, &payments, &[]);
        let balance = balances[&1];
        assert_eq!(balance.total_charges, Amount::units(35));
        assert_eq!(balance.total_payments, Amount::units(25));
        assert_eq!(balance.balance, Amount::units(-10));
    }

    #[test]
    fn players_are_independent() {
        let charges = [charge(1, 1, 20, 1), charge(2, 2, 10, 1)];
        let payments = [verified(payment(3, 2, 30, "A"))];

        let balances = BalanceCalculator::compute(&charges, &payments, &[]);
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[&1].balance, Amount::units(-20));
        assert_eq!(balances[&2].balance, Amount::units(20));
    }

    #[test]
    fn unallocated_is_derived_from_allocations() {
        let charges = [charge(1, 1, 20, 1)];
        let payments = [verified(payment(2, 1, 50, "A"))];
        let allocations = [alloc(3, 2, 1, 20)];

        let balances = BalanceCalculator::compute(&charges, &payments, &allocations);
        assert_eq!(balances[&1].unallocated, Amount::units(30));
        assert_eq!(balances[&1].balance, Amount::units(30));
    }

    #[test]
    fn outstanding_lists_unsettled_charges_in_fifo_order() {
        let charges = [charge(2, 1, 15, 2), charge(1, 1, 20, 1), charge(3, 1, 5, 3)];
        let allocations = [alloc(4, 9, 1, 20), alloc(5, 9, 2, 5)];

        let outstanding = BalanceCalculator::outstanding(1, &charges, &allocations);
        let shape: Vec<_> = outstanding.iter().map(|o| (o.charge.id, o.outstanding)).collect();
        assert_eq!(shape, vec![(2, Amount::units(10)), (3, Amount::units(5))]);
        assert_eq!(outstanding[0].allocated, Amount::units(5));
    }

    #[test]
    fn empty_input_gives_no_balances() {
        assert!(BalanceCalculator::compute(&[], &[], &[]).is_empty());
    }
}
