//! Shared fixtures for unit tests.

use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use crate::clock::FixedClock;
use crate::config::LedgerConfig;
use crate::ledger::{CreateOptions, Ledger};
use crate::model::{Allocation, Charge, Id, NewCharge, NewPayment, Payment, PaymentMethod, PlayerId};
use crate::store::{LedgerStore, MemoryStore};
use crate::Amount;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
}

pub fn ledger() -> Ledger<MemoryStore> {
    ledger_with(LedgerConfig::default())
}

pub fn ledger_with(config: LedgerConfig) -> Ledger<MemoryStore> {
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 4, 30, 18, 0, 0).unwrap());
    Ledger::with_clock(MemoryStore::new(), config, Arc::new(clock))
}

/// A bare charge record, for the pure planners and calculators.
pub fn charge(id: Id, player: PlayerId, amount: i64, d: u32) -> Charge {
    Charge {
        id,
        player_id: player,
        charge_type: "match_fee".to_string(),
        amount: Amount::units(amount),
        charge_date: day(d),
        due_date: None,
        reference_type: None,
        reference_id: None,
        voided: false,
        voided_reason: None,
    }
}

/// A bare unverified payment record dated the 10th.
pub fn payment(id: Id, player: PlayerId, amount: i64, reference: &str) -> Payment {
    Payment {
        id,
        player_id: player,
        amount: Amount::units(amount),
        payment_date: day(10),
        payment_method: PaymentMethod::BankTransfer,
        reference: Some(reference.to_string()),
        verified: false,
        verified_by: None,
        verified_date: None,
        notes: None,
    }
}

pub fn seed_charge(ledger: &Ledger<MemoryStore>, player: PlayerId, amount: i64, d: u32) -> Charge {
    let new = NewCharge::new(player, "match_fee", Amount::units(amount), day(d));
    ledger.create_charge(new, "treasurer").unwrap()
}

pub fn seed_payment(
    ledger: &Ledger<MemoryStore>,
    player: PlayerId,
    amount: i64,
    reference: &str,
) -> Payment {
    seed_payment_on(ledger, player, amount, reference, 10)
}

/// Like [`seed_payment`], paid on April `d`. Distinct dates keep equal
/// payments from the same player clear of the duplicate check.
pub fn seed_payment_on(
    ledger: &Ledger<MemoryStore>,
    player: PlayerId,
    amount: i64,
    reference: &str,
    d: u32,
) -> Payment {
    let new = NewPayment::new(player, Amount::units(amount), day(d), reference);
    ledger
        .create_payment(new, CreateOptions::default(), "treasurer")
        .unwrap()
}

pub fn seed_verified_payment(
    ledger: &Ledger<MemoryStore>,
    player: PlayerId,
    amount: i64,
    reference: &str,
) -> Payment {
    let payment = seed_payment(ledger, player, amount, reference);
    ledger.verify_payment(payment.id, "treasurer").unwrap().payment
}

impl Ledger<MemoryStore> {
    pub fn store_charge(&self, id: Id) -> Charge {
        self.store().charge(id).unwrap().unwrap()
    }

    pub fn store_allocations(&self, payment: Id) -> Vec<Allocation> {
        self.store().allocations_for_payment(payment).unwrap()
    }
}
