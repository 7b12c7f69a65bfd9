//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{Id, Payment};
use crate::store::StoreError;

/// Top-level error returned by [`Ledger`](super::Ledger) operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Duplicate(#[from] DuplicateWarning),

    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    #[error("void failed: {0}")]
    Void(#[from] VoidError),

    #[error("store rejected change: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("player is required")]
    MissingPlayer,
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
    #[error("amount {0} exceeds the limit of {max}", max = Amount::MAX)]
    AmountTooLarge(Amount),
    #[error("payment reference is required")]
    MissingReference,
    #[error("charge type is required")]
    MissingChargeType,
    #[error("sponsor name is required")]
    MissingSponsor,
    #[error("payment {0} is already verified")]
    AlreadyVerified(Id),
    #[error("payment {0} is not verified")]
    NotVerified(Id),
}

impl ValidationError {
    /// Amounts entered into the ledger are positive and at most [`Amount::MAX`].
    pub(super) fn check_amount(amount: Amount) -> Result<(), ValidationError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        if amount > Amount::MAX {
            return Err(ValidationError::AmountTooLarge(amount));
        }
        Ok(())
    }
}

/// Which duplicate rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// Same reference, compared case-insensitively.
    Reference,
    /// Same player, amount and payment date.
    PlayerAmountDate,
}

/// Advisory: the new payment looks like one already recorded. Callers may
/// review `existing` and force creation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("possible duplicate of payment {} ({kind:?})", .existing.id)]
pub struct DuplicateWarning {
    pub kind: DuplicateKind,
    pub existing: Box<Payment>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("charge {0} not found")]
    Charge(Id),
    #[error("payment {0} not found")]
    Payment(Id),
    #[error("sponsorship payment {0} not found")]
    SponsorshipPayment(Id),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoidError {
    #[error("charge {0} is already voided")]
    AlreadyVoided(Id),
    #[error("charge {0} has {1} allocated against it")]
    HasAllocations(Id, Amount),
}
