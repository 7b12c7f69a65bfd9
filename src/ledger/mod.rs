//! Payment ledger and allocation engine.
//!
//! Tracks what players owe (charges), what they paid (payments) and how the
//! two are matched (allocations). Allocation only happens when a payment is
//! verified, oldest charge first. Every multi-row mutation is committed to the
//! store as one change set.

use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::model::{Id, LedgerCommand, PlayerId};
use crate::store::LedgerStore;

mod allocation;
pub use allocation::{AllocationOutcome, AllocationPlan, FifoPlanner, PlannedAllocation};

mod balance;
pub use balance::{BalanceCalculator, OutstandingCharge, PlayerBalance};

mod charges;

mod duplicate;
pub use duplicate::DuplicateDetector;

mod error;
pub use error::{
    DuplicateKind, DuplicateWarning, LedgerError, NotFoundError, ValidationError, VoidError,
};

mod mirror;
pub use mirror::{mirror_marker, mirror_reference};

mod payments;
pub use payments::CreateOptions;

mod statement;
pub use statement::{ExtractedStatement, MatchReport, ReferenceScanner, StatementLine};

/// The ledger facade over a [`LedgerStore`].
pub struct Ledger<S> {
    store: S,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
}

/// Public API
impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Run the ledger over a stream of commands, one at a time.
    pub async fn run(&self, mut stream: impl Stream<Item = LedgerCommand> + Unpin) {
        while let Some(command) = stream.next().await {
            // a failed command is logged and skipped
            let _ = self.apply(command);
        }
    }

    /// Apply a single command on top of the current ledger state.
    pub fn apply(&self, command: LedgerCommand) -> Result<(), LedgerError> {
        match command {
            LedgerCommand::Charge { charge, actor } => {
                let player = charge.player_id;
                let result = self.create_charge(charge, &actor).map(|c| c.id);
                Self::log_result("charge", Some(player), &result);
                result?;
            }
            LedgerCommand::Payment {
                payment,
                force,
                actor,
            } => {
                let player = payment.player_id;
                let options = CreateOptions {
                    force,
                    verify_as: None,
                };
                let result = self.create_payment(payment, options, &actor).map(|p| p.id);
                Self::log_result("payment", Some(player), &result);
                result?;
            }
            LedgerCommand::Verify { payment, actor } => {
                let result = self.verify_payment(payment, &actor).map(|_| payment);
                Self::log_result("verify", None, &result);
                result?;
            }
            LedgerCommand::Reject { payment, actor } => {
                let result = self.reject_payment(payment, &actor).map(|_| payment);
                Self::log_result("reject", None, &result);
                result?;
            }
            LedgerCommand::Amend {
                payment,
                amount,
                actor,
            } => {
                let result = self
                    .amend_payment_amount(payment, amount, &actor)
                    .map(|_| payment);
                Self::log_result("amend", None, &result);
                result?;
            }
            LedgerCommand::Void {
                charge,
                reason,
                actor,
            } => {
                let result = self.void_charge(charge, &reason, &actor).map(|_| charge);
                Self::log_result("void", None, &result);
                result?;
            }
        }
        Ok(())
    }
}

/// Private API
impl<S: LedgerStore> Ledger<S> {
    /// Small helper to log `apply` results
    fn log_result(command: &str, player: Option<PlayerId>, result: &Result<Id, LedgerError>) {
        match (result, player) {
            (Ok(id), Some(player)) => info!(player, id, "{command} applied"),
            (Ok(id), None) => info!(id, "{command} applied"),
            (Err(e), Some(player)) => info!(player, reason = %e, "{command} skipped"),
            (Err(e), None) => info!(reason = %e, "{command} skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{NewCharge, NewPayment};
    use crate::testing::{day, ledger};

    fn charge_cmd(id: Id, player: PlayerId, amount: i64, d: u32) -> LedgerCommand {
        let mut charge = NewCharge::new(player, "match_fee", Amount::units(amount), day(d));
        charge.id = Some(id);
        LedgerCommand::Charge {
            charge,
            actor: "treasurer".to_string(),
        }
    }

    fn payment_cmd(id: Id, player: PlayerId, amount: i64, reference: &str) -> LedgerCommand {
        let mut payment = NewPayment::new(player, Amount::units(amount), day(10), reference);
        payment.id = Some(id);
        LedgerCommand::Payment {
            payment,
            force: false,
            actor: "treasurer".to_string(),
        }
    }

    fn verify_cmd(payment: Id) -> LedgerCommand {
        LedgerCommand::Verify {
            payment,
            actor: "treasurer".to_string(),
        }
    }

    #[tokio::test]
    async fn run_processes_all_commands() {
        let ledger = ledger();
        let commands = vec![
            charge_cmd(1, 7, 20, 1),
            charge_cmd(2, 7, 15, 2),
            payment_cmd(3, 7, 25, "BANK100"),
            verify_cmd(3),
        ];

        ledger.run(tokio_stream::iter(commands)).await;

        let balance = ledger.player_balance(7).unwrap();
        assert_eq!(balance.total_charges, Amount::units(35));
        assert_eq!(balance.total_payments, Amount::units(25));
        assert_eq!(balance.balance, Amount::units(-10));
    }

    #[tokio::test]
    async fn run_skips_failed_commands_and_continues() {
        let ledger = ledger();
        let commands = vec![
            charge_cmd(1, 7, 20, 1),
            payment_cmd(2, 7, 20, "BANK100"),
            payment_cmd(3, 7, 5, "bank100"), // duplicate reference, skipped
            verify_cmd(99),                  // unknown payment, skipped
            verify_cmd(2),
        ];

        ledger.run(tokio_stream::iter(commands)).await;

        assert!(ledger.store().payment(3).unwrap().is_none());
        let balance = ledger.player_balance(7).unwrap();
        assert_eq!(balance.balance, Amount::ZERO);
    }

    #[test]
    fn apply_surfaces_errors() {
        let ledger = ledger();
        let result = ledger.apply(verify_cmd(42));
        assert!(matches!(
            result,
            Err(LedgerError::NotFound(NotFoundError::Payment(42)))
        ));
    }
}
