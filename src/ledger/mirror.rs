//! Sponsorship payments mirrored into the general transaction ledger.
//!
//! Each sponsorship payment owns at most one live Income/Sponsorship
//! transaction, linked through `Transaction::sponsorship_payment_id`. The
//! reference text also carries an `[SP:<id>]` marker, which is how mirrors
//! written before the key existed are still found.

use tracing::{info, warn};

use super::{Ledger, LedgerError, NotFoundError, ValidationError};
use crate::model::{
    Id, NewSponsorshipPayment, SPONSORSHIP_CATEGORY, SponsorshipPayment, Transaction,
    TransactionType,
};
use crate::store::{Change, ChangeSet, LedgerStore};

pub fn mirror_marker(sponsorship_payment: Id) -> String {
    format!("[SP:{sponsorship_payment}]")
}

/// `"<reference> [SP:<id>]"`, or just the marker when there is no reference.
pub fn mirror_reference(reference: Option<&str>, sponsorship_payment: Id) -> String {
    let marker = mirror_marker(sponsorship_payment);
    match reference.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reference) => format!("{reference} {marker}"),
        None => marker,
    }
}

fn validate(new: &NewSponsorshipPayment) -> Result<(), ValidationError> {
    if new.sponsor_name.trim().is_empty() {
        return Err(ValidationError::MissingSponsor);
    }
    ValidationError::check_amount(new.amount)?;
    Ok(())
}

fn describe(payment: &SponsorshipPayment) -> String {
    format!("Sponsorship payment - {}", payment.sponsor_name)
}

/// Copy the mirrored fields of `payment` onto `transaction`.
fn project(payment: &SponsorshipPayment, transaction: &mut Transaction) {
    transaction.transaction_type = TransactionType::Income;
    transaction.category = SPONSORSHIP_CATEGORY.to_string();
    transaction.amount = payment.amount;
    transaction.date = payment.payment_date;
    transaction.description = describe(payment);
    transaction.reference = mirror_reference(payment.reference.as_deref(), payment.id);
    transaction.payment_method = payment.payment_method;
    transaction.sponsorship_payment_id = Some(payment.id);
}

impl<S: LedgerStore> Ledger<S> {
    /// Record a sponsorship payment and its ledger transaction together.
    pub fn create_sponsorship_payment(
        &self,
        new: NewSponsorshipPayment,
        actor: &str,
    ) -> Result<(SponsorshipPayment, Transaction), LedgerError> {
        validate(&new)?;

        let payment = SponsorshipPayment {
            id: self.store.reserve_id()?,
            sponsorship_id: new.sponsorship_id,
            sponsor_name: new.sponsor_name.trim().to_string(),
            amount: new.amount,
            payment_date: new.payment_date,
            payment_method: new.payment_method,
            reference: new.reference,
            notes: new.notes,
        };
        let transaction = self.new_mirror(&payment)?;

        let mut changes = ChangeSet::new("create_sponsorship_payment", actor, self.clock.now());
        changes.push(Change::InsertSponsorshipPayment(payment.clone()));
        changes.push(Change::InsertTransaction(transaction.clone()));
        self.store.commit(changes)?;

        info!(
            sponsorship_payment = payment.id,
            transaction = transaction.id,
            amount = %payment.amount,
            sponsor = %payment.sponsor_name,
            "sponsorship payment mirrored"
        );
        Ok((payment, transaction))
    }

    /// Edit a sponsorship payment and bring its mirror in line. A missing
    /// mirror is recreated.
    pub fn update_sponsorship_payment(
        &self,
        id: Id,
        update: NewSponsorshipPayment,
        actor: &str,
    ) -> Result<(SponsorshipPayment, Transaction), LedgerError> {
        validate(&update)?;
        let current = self
            .store
            .sponsorship_payment(id)?
            .ok_or(NotFoundError::SponsorshipPayment(id))?;

        let payment = SponsorshipPayment {
            id,
            sponsorship_id: update.sponsorship_id,
            sponsor_name: update.sponsor_name.trim().to_string(),
            amount: update.amount,
            payment_date: update.payment_date,
            payment_method: update.payment_method,
            reference: update.reference,
            notes: update.notes,
        };

        let mut changes = ChangeSet::new("update_sponsorship_payment", actor, self.clock.now());
        changes.push(Change::UpdateSponsorshipPayment(payment.clone()));
        let transaction = match self.find_mirror(id)? {
            Some(mut transaction) => {
                project(&payment, &mut transaction);
                changes.push(Change::UpdateTransaction(transaction.clone()));
                transaction
            }
            None => {
                warn!(sponsorship_payment = id, "mirror transaction missing, recreating");
                let transaction = self.new_mirror(&payment)?;
                changes.push(Change::InsertTransaction(transaction.clone()));
                transaction
            }
        };
        self.store.commit(changes)?;

        info!(
            sponsorship_payment = id,
            transaction = transaction.id,
            from = %current.amount,
            to = %payment.amount,
            "sponsorship payment updated"
        );
        Ok((payment, transaction))
    }

    /// Delete a sponsorship payment. The payment row is removed; its mirror
    /// transaction is soft-deleted and returned.
    pub fn delete_sponsorship_payment(
        &self,
        id: Id,
        actor: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.store
            .sponsorship_payment(id)?
            .ok_or(NotFoundError::SponsorshipPayment(id))?;

        let now = self.clock.now();
        let mut changes = ChangeSet::new("delete_sponsorship_payment", actor, now);
        let mirror = self.find_mirror(id)?;
        if let Some(transaction) = &mirror {
            changes.push(Change::SoftDeleteTransaction {
                id: transaction.id,
                deleted_at: now,
                deleted_by: actor.to_string(),
            });
        } else {
            warn!(sponsorship_payment = id, "no mirror transaction to delete");
        }
        changes.push(Change::DeleteSponsorshipPayment(id));
        self.store.commit(changes)?;

        let mirror = mirror.map(|mut t| {
            t.is_deleted = true;
            t.deleted_at = Some(now);
            t.deleted_by = Some(actor.to_string());
            t
        });
        info!(
            sponsorship_payment = id,
            transaction = ?mirror.as_ref().map(|t| t.id),
            "sponsorship payment deleted"
        );
        Ok(mirror)
    }

    /// The live mirror of a sponsorship payment: by key first, then by the
    /// reference marker among keyless Sponsorship transactions.
    pub fn find_mirror(&self, sponsorship_payment: Id) -> Result<Option<Transaction>, LedgerError> {
        if let Some(transaction) = self
            .store
            .transaction_for_sponsorship_payment(sponsorship_payment)?
        {
            return Ok(Some(transaction));
        }

        let marker = mirror_marker(sponsorship_payment);
        Ok(self
            .store
            .transactions(Some(SPONSORSHIP_CATEGORY))?
            .into_iter()
            .find(|t| {
                !t.is_deleted && t.sponsorship_payment_id.is_none() && t.reference.contains(&marker)
            }))
    }

    fn new_mirror(&self, payment: &SponsorshipPayment) -> Result<Transaction, LedgerError> {
        let mut transaction = Transaction {
            id: self.store.reserve_id()?,
            transaction_type: TransactionType::Income,
            category: SPONSORSHIP_CATEGORY.to_string(),
            amount: payment.amount,
            date: payment.payment_date,
            description: String::new(),
            reference: String::new(),
            payment_method: payment.payment_method,
            sponsorship_payment_id: Some(payment.id),
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
        };
        project(payment, &mut transaction);
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::PaymentMethod;
    use crate::testing::{day, ledger};

    fn sponsorship(amount: i64, reference: Option<&str>) -> NewSponsorshipPayment {
        NewSponsorshipPayment {
            sponsorship_id: 50,
            sponsor_name: "Village Bakery".to_string(),
            amount: Amount::units(amount),
            payment_date: day(3),
            payment_method: PaymentMethod::BankTransfer,
            reference: reference.map(str::to_string),
            notes: None,
        }
    }

    #[test]
    fn reference_carries_marker() {
        assert_eq!(mirror_reference(Some("INV-9"), 12), "INV-9 [SP:12]");
        assert_eq!(mirror_reference(Some("  "), 12), "[SP:12]");
        assert_eq!(mirror_reference(None, 12), "[SP:12]");
    }

    #[test]
    fn create_mirrors_into_ledger() {
        let ledger = ledger();
        let (payment, transaction) = ledger
            .create_sponsorship_payment(sponsorship(500, Some("INV-9")), "treasurer")
            .unwrap();

        assert_eq!(transaction.transaction_type, TransactionType::Income);
        assert_eq!(transaction.category, SPONSORSHIP_CATEGORY);
        assert_eq!(transaction.amount, Amount::units(500));
        assert_eq!(transaction.sponsorship_payment_id, Some(payment.id));
        assert_eq!(transaction.reference, format!("INV-9 [SP:{}]", payment.id));
        assert_eq!(transaction.description, "Sponsorship payment - Village Bakery");

        let stored = ledger.store().transactions(Some(SPONSORSHIP_CATEGORY)).unwrap();
        assert_eq!(stored, vec![transaction]);
    }

    #[test]
    fn create_validates_input() {
        let ledger = ledger();
        let mut bad = sponsorship(500, None);
        bad.sponsor_name = " ".to_string();
        assert!(matches!(
            ledger.create_sponsorship_payment(bad, "t"),
            Err(LedgerError::Validation(ValidationError::MissingSponsor))
        ));
        assert!(matches!(
            ledger.create_sponsorship_payment(sponsorship(0, None), "t"),
            Err(LedgerError::Validation(ValidationError::NonPositiveAmount(_)))
        ));
        assert!(ledger.store().transactions(None).unwrap().is_empty());
    }

    #[test]
    fn update_follows_the_mirror() {
        let ledger = ledger();
        let (payment, original) = ledger
            .create_sponsorship_payment(sponsorship(500, Some("INV-9")), "t")
            .unwrap();

        let (_, updated) = ledger
            .update_sponsorship_payment(payment.id, sponsorship(650, Some("INV-10")), "t")
            .unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.amount, Amount::units(650));
        assert_eq!(updated.reference, format!("INV-10 [SP:{}]", payment.id));
        assert_eq!(ledger.store().transactions(None).unwrap().len(), 1);
    }

    #[test]
    fn update_finds_legacy_mirror_by_marker() {
        let ledger = ledger();
        let (payment, mirror) = ledger
            .create_sponsorship_payment(sponsorship(500, None), "t")
            .unwrap();

        // strip the key to look like a mirror written before it existed
        let mut legacy = mirror.clone();
        legacy.sponsorship_payment_id = None;
        let mut changes = ChangeSet::new("legacy", "t", chrono::Utc::now());
        changes.push(Change::UpdateTransaction(legacy));
        ledger.store().commit(changes).unwrap();

        let (_, updated) = ledger
            .update_sponsorship_payment(payment.id, sponsorship(700, None), "t")
            .unwrap();
        assert_eq!(updated.id, mirror.id);
        assert_eq!(updated.sponsorship_payment_id, Some(payment.id));
        assert_eq!(updated.amount, Amount::units(700));
    }

    #[test]
    fn update_recreates_missing_mirror() {
        let ledger = ledger();
        let (payment, mirror) = ledger
            .create_sponsorship_payment(sponsorship(500, None), "t")
            .unwrap();
        let mut changes = ChangeSet::new("manual", "t", chrono::Utc::now());
        changes.push(Change::SoftDeleteTransaction {
            id: mirror.id,
            deleted_at: chrono::Utc::now(),
            deleted_by: "t".to_string(),
        });
        ledger.store().commit(changes).unwrap();

        let (_, recreated) = ledger
            .update_sponsorship_payment(payment.id, sponsorship(500, None), "t")
            .unwrap();
        assert_ne!(recreated.id, mirror.id);
        assert!(!recreated.is_deleted);
    }

    #[test]
    fn delete_hard_deletes_payment_and_soft_deletes_mirror() {
        let ledger = ledger();
        let (payment, mirror) = ledger
            .create_sponsorship_payment(sponsorship(500, None), "t")
            .unwrap();

        let deleted = ledger
            .delete_sponsorship_payment(payment.id, "chair")
            .unwrap()
            .unwrap();
        assert_eq!(deleted.id, mirror.id);
        assert!(deleted.is_deleted);
        assert_eq!(deleted.deleted_by.as_deref(), Some("chair"));

        assert!(ledger.store().sponsorship_payment(payment.id).unwrap().is_none());
        let rows = ledger.store().transactions(None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_deleted);
        assert!(ledger.find_mirror(payment.id).unwrap().is_none());
    }

    #[test]
    fn missing_sponsorship_payment() {
        let ledger = ledger();
        assert!(matches!(
            ledger.delete_sponsorship_payment(9, "t"),
            Err(LedgerError::NotFound(NotFoundError::SponsorshipPayment(9)))
        ));
        assert!(matches!(
            ledger.update_sponsorship_payment(9, sponsorship(1, None), "t"),
            Err(LedgerError::NotFound(NotFoundError::SponsorshipPayment(9)))
        ));
    }
}
