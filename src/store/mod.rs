//! Persistence boundary.
//!
//! The ledger never writes rows one at a time: every mutation is described as
//! a [`ChangeSet`] and handed to [`LedgerStore::commit`], which applies all of
//! it or none of it.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    ActorId, Allocation, AuditEvent, Charge, EntityKind, Id, Payment, PlayerId,
    SponsorshipPayment, Transaction,
};

mod memory;
pub use memory::MemoryStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} {1} already exists")]
    DuplicateId(EntityKind, Id),

    #[error("{0} {1} not found")]
    MissingRecord(EntityKind, Id),

    /// A conditional update lost against a concurrent writer.
    #[error("conflicting update on {0} {1}: {2}")]
    Conflict(EntityKind, Id, String),

    /// The change set would break a ledger invariant; nothing was written.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// A single row-level change.
#[derive(Debug, Clone)]
pub enum Change {
    InsertCharge(Charge),
    VoidCharge {
        id: Id,
        reason: String,
    },
    InsertPayment(Payment),
    /// Only succeeds while the payment is still unverified.
    MarkVerified {
        id: Id,
        verified_by: ActorId,
        verified_date: DateTime<Utc>,
    },
    SetPaymentAmount {
        id: Id,
        amount: crate::Amount,
    },
    DeletePayment(Id),
    InsertAllocation(Allocation),
    DeleteAllocation(Id),
    InsertSponsorshipPayment(SponsorshipPayment),
    UpdateSponsorshipPayment(SponsorshipPayment),
    DeleteSponsorshipPayment(Id),
    InsertTransaction(Transaction),
    UpdateTransaction(Transaction),
    SoftDeleteTransaction {
        id: Id,
        deleted_at: DateTime<Utc>,
        deleted_by: ActorId,
    },
}

/// An ordered batch of changes committed as one unit.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub action: &'static str,
    pub actor: ActorId,
    pub at: DateTime<Utc>,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(action: &'static str, actor: impl Into<ActorId>, at: DateTime<Utc>) -> Self {
        Self {
            action,
            actor: actor.into(),
            at,
            changes: Vec::new(),
        }
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }
}

impl Extend<Change> for ChangeSet {
    fn extend<T: IntoIterator<Item = Change>>(&mut self, iter: T) {
        self.changes.extend(iter);
    }
}

/// A consistent point-in-time read of charges, payments and allocations.
///
/// When scoped to a player, `allocations` holds those whose payment belongs
/// to that player.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub charges: Vec<Charge>,
    pub payments: Vec<Payment>,
    pub allocations: Vec<Allocation>,
}

/// Entity persistence used by the ledger.
pub trait LedgerStore: Send + Sync {
    /// Reserve a fresh id for a row about to be inserted.
    fn reserve_id(&self) -> Result<Id, StoreError>;

    /// Read charges, payments and allocations, optionally scoped to one player.
    fn snapshot(&self, player: Option<PlayerId>) -> Result<LedgerSnapshot, StoreError>;

    fn charge(&self, id: Id) -> Result<Option<Charge>, StoreError>;

    fn payment(&self, id: Id) -> Result<Option<Payment>, StoreError>;

    fn allocations_for_payment(&self, payment: Id) -> Result<Vec<Allocation>, StoreError>;

    fn allocations_for_charge(&self, charge: Id) -> Result<Vec<Allocation>, StoreError>;

    fn sponsorship_payment(&self, id: Id) -> Result<Option<SponsorshipPayment>, StoreError>;

    /// General ledger rows, including soft-deleted ones, optionally by category.
    fn transactions(&self, category: Option<&str>) -> Result<Vec<Transaction>, StoreError>;

    /// Lookup through the explicit mirror key.
    fn transaction_for_sponsorship_payment(
        &self,
        sponsorship_payment: Id,
    ) -> Result<Option<Transaction>, StoreError>;

    fn audit_log(&self) -> Result<Vec<AuditEvent>, StoreError>;

    /// Apply every change in order, or none of them.
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
