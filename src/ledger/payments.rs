use tracing::{info, warn};

use super::allocation::outcome;
use super::{AllocationOutcome, DuplicateDetector, Ledger, LedgerError, ValidationError};
use crate::Amount;
use crate::model::{ActorId, Id, NewPayment, Payment, PlayerId};
use crate::store::{Change, ChangeSet, LedgerStore};

/// How [`Ledger::create_payment`] treats a new payment.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Record the payment even if it looks like a duplicate.
    pub force: bool,
    /// Privileged entry: verify (and allocate) in the same commit.
    pub verify_as: Option<ActorId>,
}

impl<S: LedgerStore> Ledger<S> {
    /// Record money received from a player, unverified unless
    /// `options.verify_as` is set.
    ///
    /// Fails with a [`DuplicateWarning`](super::DuplicateWarning) before
    /// writing anything when the payment matches an existing one, unless
    /// `options.force` is set.
    pub fn create_payment(
        &self,
        new: NewPayment,
        options: CreateOptions,
        actor: &str,
    ) -> Result<Payment, LedgerError> {
        if new.player_id == 0 {
            return Err(ValidationError::MissingPlayer.into());
        }
        ValidationError::check_amount(new.amount)?;
        let reference = new
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .ok_or(ValidationError::MissingReference)?;

        let existing = self.store.snapshot(None)?.payments;
        if let Some(warning) = DuplicateDetector::check(&new, &existing) {
            if !options.force {
                warn!(
                    player = new.player_id,
                    reference = %reference,
                    existing = warning.existing.id,
                    kind = ?warning.kind,
                    "possible duplicate payment"
                );
                return Err(warning.into());
            }
            info!(
                player = new.player_id,
                existing = warning.existing.id,
                "duplicate warning overridden"
            );
        }

        let id = match new.id {
            Some(id) => id,
            None => self.store.reserve_id()?,
        };
        let mut payment = Payment {
            id,
            player_id: new.player_id,
            amount: new.amount,
            payment_date: new.payment_date,
            payment_method: new.payment_method,
            reference: Some(reference),
            verified: false,
            verified_by: None,
            verified_date: None,
            notes: new.notes,
        };

        let mut changes = ChangeSet::new("create_payment", actor, self.clock.now());
        changes.push(Change::InsertPayment(payment.clone()));

        let mut allocated = None;
        if let Some(approver) = &options.verify_as {
            let now = self.clock.now();
            changes.push(Change::MarkVerified {
                id,
                verified_by: approver.clone(),
                verified_date: now,
            });
            payment.verified = true;
            payment.verified_by = Some(approver.clone());
            payment.verified_date = Some(now);

            let plan = self.plan_for(&payment, payment.amount, false)?;
            let rows = self.push_plan(&mut changes, &plan, approver, "FIFO allocation")?;
            allocated = Some(rows);
        }
        self.store.commit(changes)?;

        info!(
            player = payment.player_id,
            payment = payment.id,
            amount = %payment.amount,
            verified = payment.verified,
            "payment recorded"
        );
        if let Some(rows) = allocated {
            Self::log_allocation("create", &outcome(payment.clone(), rows));
        }
        Ok(payment)
    }

    /// Mark a payment verified and allocate it FIFO against the player's
    /// outstanding charges, in one commit.
    ///
    /// The verified flag is set conditionally, so of two concurrent
    /// verifications of the same payment exactly one succeeds.
    pub fn verify_payment(
        &self,
        payment_id: Id,
        approver: &str,
    ) -> Result<AllocationOutcome, LedgerError> {
        let mut payment = self.require_payment(payment_id)?;
        if payment.verified {
            return Err(ValidationError::AlreadyVerified(payment_id).into());
        }

        let now = self.clock.now();
        let mut changes = ChangeSet::new("verify_payment", approver, now);
        changes.push(Change::MarkVerified {
            id: payment_id,
            verified_by: approver.to_string(),
            verified_date: now,
        });

        let existing = self.store.allocations_for_payment(payment_id)?;
        let allocations = if existing.is_empty() {
            let plan = self.plan_for(&payment, payment.amount, false)?;
            self.push_plan(&mut changes, &plan, approver, "FIFO allocation")?
        } else {
            existing
        };
        self.store.commit(changes)?;

        payment.verified = true;
        payment.verified_by = Some(approver.to_string());
        payment.verified_date = Some(now);

        let result = outcome(payment, allocations);
        Self::log_allocation("verify", &result);
        Ok(result)
    }

    /// Reject a payment: its allocations and the payment itself are deleted.
    ///
    /// Unlike charges this is a hard delete; the removed rows remain visible
    /// only through the audit log.
    pub fn reject_payment(&self, payment_id: Id, actor: &str) -> Result<Payment, LedgerError> {
        let payment = self.require_payment(payment_id)?;
        let allocations = self.store.allocations_for_payment(payment_id)?;

        let mut changes = ChangeSet::new("reject_payment", actor, self.clock.now());
        changes.extend(allocations.iter().map(|a| Change::DeleteAllocation(a.id)));
        changes.push(Change::DeletePayment(payment_id));
        self.store.commit(changes)?;

        info!(
            player = payment.player_id,
            payment = payment_id,
            amount = %payment.amount,
            allocations = allocations.len(),
            "payment rejected"
        );
        Ok(payment)
    }

    /// Change a payment's amount. Verified payments get their allocations
    /// recalculated in the same commit.
    pub fn amend_payment_amount(
        &self,
        payment_id: Id,
        new_amount: Amount,
        actor: &str,
    ) -> Result<Payment, LedgerError> {
        ValidationError::check_amount(new_amount)?;
        let mut payment = self.require_payment(payment_id)?;
        if payment.verified {
            return Ok(self.recalculate(payment_id, new_amount, actor)?.payment);
        }

        if payment.amount != new_amount {
            let mut changes = ChangeSet::new("amend_payment", actor, self.clock.now());
            changes.push(Change::SetPaymentAmount {
                id: payment_id,
                amount: new_amount,
            });
            self.store.commit(changes)?;
            info!(
                payment = payment_id,
                from = %payment.amount,
                to = %new_amount,
                "payment amount amended"
            );
            payment.amount = new_amount;
        }
        Ok(payment)
    }

    /// Payments for a player still awaiting verification, oldest first.
    pub fn pending_payments(&self, player: Option<PlayerId>) -> Result<Vec<Payment>, LedgerError> {
        let mut pending: Vec<Payment> = self
            .store
            .snapshot(player)?
            .payments
            .into_iter()
            .filter(|p| !p.verified)
            .collect();
        pending.sort_by_key(|p| (p.payment_date, p.id));
        Ok(pending)
    }
}
