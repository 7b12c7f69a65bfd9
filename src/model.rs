//! Core domain types for the club ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Amount;

/// Record identifier, shared by every entity kind.
pub type Id = u32;

/// Player identifier.
pub type PlayerId = u32;

/// Whoever performed a mutation: a treasurer's user id or an automated marker.
pub type ActorId = String;

/// Category under which sponsorship income is mirrored into the general ledger.
pub const SPONSORSHIP_CATEGORY: &str = "Sponsorship";

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    #[serde(rename = "Bank Transfer")]
    BankTransfer,
    Card,
    Online,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::BankTransfer => "Bank Transfer",
            PaymentMethod::Card => "Card",
            PaymentMethod::Online => "Online",
            PaymentMethod::Cheque => "Cheque",
        }
    }

    /// Lenient parse: case-insensitive, accepts `bank_transfer` style spellings.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "banktransfer" | "bank" | "transfer" => Some(PaymentMethod::BankTransfer),
            "card" => Some(PaymentMethod::Card),
            "online" => Some(PaymentMethod::Online),
            "cheque" | "check" => Some(PaymentMethod::Cheque),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A billable obligation owed by a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: Id,
    pub player_id: PlayerId,
    /// Open set, e.g. `match_fee`, `membership_fee`.
    pub charge_type: String,
    pub amount: Amount,
    pub charge_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub voided: bool,
    pub voided_reason: Option<String>,
}

/// Money received from a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Id,
    pub player_id: PlayerId,
    pub amount: Amount,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub reference: Option<String>,
    pub verified: bool,
    pub verified_by: Option<ActorId>,
    pub verified_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Part (or all) of a payment applied to one charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Id,
    pub payment_id: Id,
    pub charge_id: Id,
    pub amount: Amount,
    pub allocation_date: NaiveDate,
    pub allocated_by: ActorId,
    pub notes: Option<String>,
}

/// A payment received from a sponsor, mirrored into the general ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorshipPayment {
    pub id: Id,
    pub sponsorship_id: Id,
    pub sponsor_name: String,
    pub amount: Amount,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Income,
    Expense,
}

/// A row of the club's general transaction ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub transaction_type: TransactionType,
    pub category: String,
    pub amount: Amount,
    pub date: NaiveDate,
    pub description: String,
    pub reference: String,
    pub payment_method: PaymentMethod,
    /// Mirror key; `None` for manual entries and legacy mirrors.
    pub sponsorship_payment_id: Option<Id>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<ActorId>,
}

/// Entity kinds, used by the store and the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Charge,
    Payment,
    Allocation,
    SponsorshipPayment,
    Transaction,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Charge => "charge",
            EntityKind::Payment => "payment",
            EntityKind::Allocation => "allocation",
            EntityKind::SponsorshipPayment => "sponsorship payment",
            EntityKind::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

/// One append-only record per committed row change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub actor: ActorId,
    /// The ledger operation that produced the change, e.g. `verify_payment`.
    pub action: String,
    pub entity: EntityKind,
    pub entity_id: Id,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

/// Input for creating a charge.
#[derive(Debug, Clone)]
pub struct NewCharge {
    /// Caller-chosen id; the store assigns one when `None`.
    pub id: Option<Id>,
    pub player_id: PlayerId,
    pub charge_type: String,
    pub amount: Amount,
    pub charge_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
}

impl NewCharge {
    pub fn new(
        player_id: PlayerId,
        charge_type: impl Into<String>,
        amount: Amount,
        charge_date: NaiveDate,
    ) -> Self {
        Self {
            id: None,
            player_id,
            charge_type: charge_type.into(),
            amount,
            charge_date,
            due_date: None,
            reference_type: None,
            reference_id: None,
        }
    }
}

/// Input for creating a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Option<Id>,
    pub player_id: PlayerId,
    pub amount: Amount,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl NewPayment {
    pub fn new(
        player_id: PlayerId,
        amount: Amount,
        payment_date: NaiveDate,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            player_id,
            amount,
            payment_date,
            payment_method: PaymentMethod::BankTransfer,
            reference: Some(reference.into()),
            notes: None,
        }
    }
}

/// Input for creating or editing a sponsorship payment.
#[derive(Debug, Clone)]
pub struct NewSponsorshipPayment {
    pub sponsorship_id: Id,
    pub sponsor_name: String,
    pub amount: Amount,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// A ledger mutation, as fed to [`Ledger::run`](crate::Ledger::run).
#[derive(Debug, Clone)]
pub enum LedgerCommand {
    /// Bill a player.
    Charge { charge: NewCharge, actor: ActorId },
    /// Record money received, unverified.
    Payment {
        payment: NewPayment,
        /// Record despite a duplicate warning.
        force: bool,
        actor: ActorId,
    },
    /// Approve a payment; allocates it FIFO.
    Verify { payment: Id, actor: ActorId },
    /// Delete a payment and its allocations.
    Reject { payment: Id, actor: ActorId },
    /// Change a payment's amount, recalculating allocations if verified.
    Amend {
        payment: Id,
        amount: Amount,
        actor: ActorId,
    },
    /// Cancel a charge without deleting it.
    Void {
        charge: Id,
        reason: String,
        actor: ActorId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_parse_is_lenient() {
        assert_eq!(PaymentMethod::parse("Bank Transfer"), Some(PaymentMethod::BankTransfer));
        assert_eq!(PaymentMethod::parse("bank_transfer"), Some(PaymentMethod::BankTransfer));
        assert_eq!(PaymentMethod::parse(" CASH "), Some(PaymentMethod::Cash));
        assert_eq!(PaymentMethod::parse("cheque"), Some(PaymentMethod::Cheque));
        assert_eq!(PaymentMethod::parse("bitcoin"), None);
    }

    #[test]
    fn payment_method_serializes_display_name() {
        let json = serde_json::to_string(&PaymentMethod::BankTransfer).unwrap();
        assert_eq!(json, "\"Bank Transfer\"");
        assert_eq!(PaymentMethod::BankTransfer.to_string(), "Bank Transfer");
    }
}
