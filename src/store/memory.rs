use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{Change, ChangeSet, LedgerSnapshot, LedgerStore, StoreError};
use crate::Amount;
use crate::model::{
    Allocation, AuditEvent, Charge, EntityKind, Id, Payment, PlayerId, SponsorshipPayment,
    Transaction,
};

/// In-process store. A commit applies its changes in place under the write
/// lock, keeping an undo log; if any change or invariant check fails the log
/// is replayed backwards and nothing is audited.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    next_id: Id,
    charges: BTreeMap<Id, Charge>,
    payments: BTreeMap<Id, Payment>,
    allocations: BTreeMap<Id, Allocation>,
    sponsorship_payments: BTreeMap<Id, SponsorshipPayment>,
    transactions: BTreeMap<Id, Transaction>,
    audit: Vec<AuditEvent>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_id: 1,
            charges: BTreeMap::new(),
            payments: BTreeMap::new(),
            allocations: BTreeMap::new(),
            sponsorship_payments: BTreeMap::new(),
            transactions: BTreeMap::new(),
            audit: Vec::new(),
        }
    }
}

/// Prior value of a row (`None` if it did not exist) or of the id sequence.
#[derive(Debug)]
enum Undo {
    NextId(Id),
    Charge(Id, Option<Charge>),
    Payment(Id, Option<Payment>),
    Allocation(Id, Option<Allocation>),
    SponsorshipPayment(Id, Option<SponsorshipPayment>),
    Transaction(Id, Option<Transaction>),
}

/// Bookkeeping for one in-flight commit.
struct Staging<'a> {
    meta: &'a ChangeSet,
    undo: Vec<Undo>,
    events: Vec<AuditEvent>,
    /// Existing charges and payments whose allocation totals must be
    /// re-checked. Fresh inserts only land here through an allocation.
    charges: BTreeSet<Id>,
    payments: BTreeSet<Id>,
}

impl<'a> Staging<'a> {
    fn new(meta: &'a ChangeSet) -> Self {
        Self {
            meta,
            undo: Vec::new(),
            events: Vec::new(),
            charges: BTreeSet::new(),
            payments: BTreeSet::new(),
        }
    }
}

fn to_json<T: Serialize>(record: &T) -> Option<serde_json::Value> {
    serde_json::to_value(record).ok()
}

fn restore<T>(map: &mut BTreeMap<Id, T>, id: Id, previous: Option<T>) {
    match previous {
        Some(row) => {
            map.insert(id, row);
        }
        None => {
            map.remove(&id);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn record(
        &self,
        staging: &mut Staging<'_>,
        entity: EntityKind,
        entity_id: Id,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        let sequence = (self.audit.len() + staging.events.len()) as u64 + 1;
        staging.events.push(AuditEvent {
            sequence,
            at: staging.meta.at,
            actor: staging.meta.actor.clone(),
            action: staging.meta.action.to_string(),
            entity,
            entity_id,
            before,
            after,
        });
    }

    fn claim_id(&mut self, id: Id, staging: &mut Staging<'_>) {
        if id >= self.next_id {
            staging.undo.push(Undo::NextId(self.next_id));
            self.next_id = id + 1;
        }
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::NextId(id) => self.next_id = id,
                Undo::Charge(id, row) => restore(&mut self.charges, id, row),
                Undo::Payment(id, row) => restore(&mut self.payments, id, row),
                Undo::Allocation(id, row) => restore(&mut self.allocations, id, row),
                Undo::SponsorshipPayment(id, row) => {
                    restore(&mut self.sponsorship_payments, id, row)
                }
                Undo::Transaction(id, row) => restore(&mut self.transactions, id, row),
            }
        }
    }

    fn apply(&mut self, change: &Change, staging: &mut Staging<'_>) -> Result<(), StoreError> {
        use EntityKind as K;

        match change {
            Change::InsertCharge(charge) => {
                if self.charges.contains_key(&charge.id) {
                    return Err(StoreError::DuplicateId(K::Charge, charge.id));
                }
                staging.undo.push(Undo::Charge(charge.id, None));
                self.charges.insert(charge.id, charge.clone());
                self.claim_id(charge.id, staging);
                self.record(staging, K::Charge, charge.id, None, to_json(charge));
            }
            Change::VoidCharge { id, reason } => {
                let before = self
                    .charges
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(K::Charge, *id))?;
                let mut after = before.clone();
                after.voided = true;
                after.voided_reason = Some(reason.clone());
                self.record(staging, K::Charge, *id, to_json(&before), to_json(&after));
                self.charges.insert(*id, after);
                staging.undo.push(Undo::Charge(*id, Some(before)));
                staging.charges.insert(*id);
            }
            Change::InsertPayment(payment) => {
                if self.payments.contains_key(&payment.id) {
                    return Err(StoreError::DuplicateId(K::Payment, payment.id));
                }
                staging.undo.push(Undo::Payment(payment.id, None));
                self.payments.insert(payment.id, payment.clone());
                self.claim_id(payment.id, staging);
                self.record(staging, K::Payment, payment.id, None, to_json(payment));
            }
            Change::MarkVerified {
                id,
                verified_by,
                verified_date,
            } => {
                let before = self
                    .payments
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(K::Payment, *id))?;
                if before.verified {
                    return Err(StoreError::Conflict(
                        K::Payment,
                        *id,
                        "already verified".to_string(),
                    ));
                }
                let mut after = before.clone();
                after.verified = true;
                after.verified_by = Some(verified_by.clone());
                after.verified_date = Some(*verified_date);
                self.update_payment(staging, before, after);
            }
            Change::SetPaymentAmount { id, amount } => {
                let before = self
                    .payments
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(K::Payment, *id))?;
                let mut after = before.clone();
                after.amount = *amount;
                self.update_payment(staging, before, after);
            }
            Change::DeletePayment(id) => {
                let payment = self
                    .payments
                    .remove(id)
                    .ok_or(StoreError::MissingRecord(K::Payment, *id))?;
                staging.payments.insert(*id);
                self.record(staging, K::Payment, *id, to_json(&payment), None);
                staging.undo.push(Undo::Payment(*id, Some(payment)));
            }
            Change::InsertAllocation(allocation) => {
                if self.allocations.contains_key(&allocation.id) {
                    return Err(StoreError::DuplicateId(K::Allocation, allocation.id));
                }
                staging.undo.push(Undo::Allocation(allocation.id, None));
                self.allocations.insert(allocation.id, allocation.clone());
                self.claim_id(allocation.id, staging);
                staging.charges.insert(allocation.charge_id);
                staging.payments.insert(allocation.payment_id);
                self.record(staging, K::Allocation, allocation.id, None, to_json(allocation));
            }
            Change::DeleteAllocation(id) => {
                let allocation = self
                    .allocations
                    .remove(id)
                    .ok_or(StoreError::MissingRecord(K::Allocation, *id))?;
                staging.charges.insert(allocation.charge_id);
                staging.payments.insert(allocation.payment_id);
                self.record(staging, K::Allocation, *id, to_json(&allocation), None);
                staging.undo.push(Undo::Allocation(*id, Some(allocation)));
            }
            Change::InsertSponsorshipPayment(payment) => {
                if self.sponsorship_payments.contains_key(&payment.id) {
                    return Err(StoreError::DuplicateId(K::SponsorshipPayment, payment.id));
                }
                staging.undo.push(Undo::SponsorshipPayment(payment.id, None));
                self.sponsorship_payments.insert(payment.id, payment.clone());
                self.claim_id(payment.id, staging);
                self.record(staging, K::SponsorshipPayment, payment.id, None, to_json(payment));
            }
            Change::UpdateSponsorshipPayment(payment) => {
                let before = self
                    .sponsorship_payments
                    .get(&payment.id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(K::SponsorshipPayment, payment.id))?;
                self.sponsorship_payments.insert(payment.id, payment.clone());
                self.record(
                    staging,
                    K::SponsorshipPayment,
                    payment.id,
                    to_json(&before),
                    to_json(payment),
                );
                staging.undo.push(Undo::SponsorshipPayment(payment.id, Some(before)));
            }
            Change::DeleteSponsorshipPayment(id) => {
                let payment = self
                    .sponsorship_payments
                    .remove(id)
                    .ok_or(StoreError::MissingRecord(K::SponsorshipPayment, *id))?;
                self.record(staging, K::SponsorshipPayment, *id, to_json(&payment), None);
                staging.undo.push(Undo::SponsorshipPayment(*id, Some(payment)));
            }
            Change::InsertTransaction(transaction) => {
                if self.transactions.contains_key(&transaction.id) {
                    return Err(StoreError::DuplicateId(K::Transaction, transaction.id));
                }
                staging.undo.push(Undo::Transaction(transaction.id, None));
                self.transactions.insert(transaction.id, transaction.clone());
                self.claim_id(transaction.id, staging);
                self.record(staging, K::Transaction, transaction.id, None, to_json(transaction));
            }
            Change::UpdateTransaction(transaction) => {
                let before = self
                    .transactions
                    .get(&transaction.id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(K::Transaction, transaction.id))?;
                self.update_transaction(staging, before, transaction.clone());
            }
            Change::SoftDeleteTransaction {
                id,
                deleted_at,
                deleted_by,
            } => {
                let before = self
                    .transactions
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(K::Transaction, *id))?;
                let mut after = before.clone();
                after.is_deleted = true;
                after.deleted_at = Some(*deleted_at);
                after.deleted_by = Some(deleted_by.clone());
                self.update_transaction(staging, before, after);
            }
        }
        Ok(())
    }

    fn update_payment(&mut self, staging: &mut Staging<'_>, before: Payment, after: Payment) {
        let id = before.id;
        self.record(staging, EntityKind::Payment, id, to_json(&before), to_json(&after));
        self.payments.insert(id, after);
        staging.undo.push(Undo::Payment(id, Some(before)));
        staging.payments.insert(id);
    }

    fn update_transaction(
        &mut self,
        staging: &mut Staging<'_>,
        before: Transaction,
        after: Transaction,
    ) {
        let id = before.id;
        self.record(staging, EntityKind::Transaction, id, to_json(&before), to_json(&after));
        self.transactions.insert(id, after);
        staging.undo.push(Undo::Transaction(id, Some(before)));
    }

    /// Re-check the allocation invariants for everything a change set touched.
    fn check_invariants(&self, staging: &Staging<'_>) -> Result<(), StoreError> {
        if staging.charges.is_empty() && staging.payments.is_empty() {
            return Ok(());
        }
        let mut by_charge: HashMap<Id, Amount> = HashMap::new();
        let mut by_payment: HashMap<Id, Amount> = HashMap::new();

        for allocation in self.allocations.values() {
            let relevant = staging.charges.contains(&allocation.charge_id)
                || staging.payments.contains(&allocation.payment_id);
            if !relevant {
                continue;
            }
            if !allocation.amount.is_positive() {
                return Err(StoreError::Invariant(format!(
                    "allocation {} has non-positive amount {}",
                    allocation.id, allocation.amount
                )));
            }
            let charge = self.charges.get(&allocation.charge_id).ok_or_else(|| {
                StoreError::Invariant(format!(
                    "allocation {} references missing charge {}",
                    allocation.id, allocation.charge_id
                ))
            })?;
            let payment = self.payments.get(&allocation.payment_id).ok_or_else(|| {
                StoreError::Invariant(format!(
                    "allocation {} references missing payment {}",
                    allocation.id, allocation.payment_id
                ))
            })?;
            if charge.voided {
                return Err(StoreError::Invariant(format!(
                    "allocation {} references voided charge {}",
                    allocation.id, charge.id
                )));
            }
            if charge.player_id != payment.player_id {
                return Err(StoreError::Invariant(format!(
                    "allocation {} crosses players: charge {} belongs to {}, payment {} to {}",
                    allocation.id, charge.id, charge.player_id, payment.id, payment.player_id
                )));
            }
            *by_charge.entry(charge.id).or_default() += allocation.amount;
            *by_payment.entry(payment.id).or_default() += allocation.amount;
        }

        for (id, allocated) in by_charge {
            if let Some(charge) = self.charges.get(&id) {
                if allocated > charge.amount {
                    return Err(StoreError::Invariant(format!(
                        "charge {id} over-allocated: {allocated} > {}",
                        charge.amount
                    )));
                }
            }
        }
        for (id, allocated) in by_payment {
            if let Some(payment) = self.payments.get(&id) {
                if allocated > payment.amount {
                    return Err(StoreError::Invariant(format!(
                        "payment {id} over-allocated: {allocated} > {}",
                        payment.amount
                    )));
                }
            }
        }
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn reserve_id(&self) -> Result<Id, StoreError> {
        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;
        Ok(id)
    }

    fn snapshot(&self, player: Option<PlayerId>) -> Result<LedgerSnapshot, StoreError> {
        let state = self.state.read();
        let Some(player) = player else {
            return Ok(LedgerSnapshot {
                charges: state.charges.values().cloned().collect(),
                payments: state.payments.values().cloned().collect(),
                allocations: state.allocations.values().cloned().collect(),
            });
        };

        let payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.player_id == player)
            .cloned()
            .collect();
        let payment_ids: BTreeSet<Id> = payments.iter().map(|p| p.id).collect();
        Ok(LedgerSnapshot {
            charges: state
                .charges
                .values()
                .filter(|c| c.player_id == player)
                .cloned()
                .collect(),
            allocations: state
                .allocations
                .values()
                .filter(|a| payment_ids.contains(&a.payment_id))
                .cloned()
                .collect(),
            payments,
        })
    }

    fn charge(&self, id: Id) -> Result<Option<Charge>, StoreError> {
        Ok(self.state.read().charges.get(&id).cloned())
    }

    fn payment(&self, id: Id) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().payments.get(&id).cloned())
    }

    fn allocations_for_payment(&self, payment: Id) -> Result<Vec<Allocation>, StoreError> {
        let state = self.state.read();
        Ok(state
            .allocations
            .values()
            .filter(|a| a.payment_id == payment)
            .cloned()
            .collect())
    }

    fn allocations_for_charge(&self, charge: Id) -> Result<Vec<Allocation>, StoreError> {
        let state = self.state.read();
        Ok(state
            .allocations
            .values()
            .filter(|a| a.charge_id == charge)
            .cloned()
            .collect())
    }

    fn sponsorship_payment(&self, id: Id) -> Result<Option<SponsorshipPayment>, StoreError> {
        Ok(self.state.read().sponsorship_payments.get(&id).cloned())
    }

    fn transactions(&self, category: Option<&str>) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read();
        Ok(state
            .transactions
            .values()
            .filter(|t| category.is_none_or(|c| t.category == c))
            .cloned()
            .collect())
    }

    fn transaction_for_sponsorship_payment(
        &self,
        sponsorship_payment: Id,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read();
        Ok(state
            .transactions
            .values()
            .find(|t| t.sponsorship_payment_id == Some(sponsorship_payment) && !t.is_deleted)
            .cloned())
    }

    fn audit_log(&self) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self.state.read().audit.clone())
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let mut staging = Staging::new(&changes);

        let applied = changes
            .changes
            .iter()
            .try_for_each(|change| state.apply(change, &mut staging))
            .and_then(|()| state.check_invariants(&staging));
        if let Err(e) = applied {
            state.rollback(staging.undo);
            return Err(e);
        }

        state.audit.append(&mut staging.events);
        Ok(())
    }
}
