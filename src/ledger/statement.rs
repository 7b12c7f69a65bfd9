//! Automatic verification of pending payments from bank statement text.

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::duplicate::normalize_reference;
use super::{AllocationOutcome, Ledger, LedgerError};
use crate::Amount;
use crate::model::Id;
use crate::store::LedgerStore;

/// Runs of letters, digits and the separators banks keep inside references.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9](?:[A-Za-z0-9/_-]*[A-Za-z0-9])?").expect("static regex compiles")
});

/// One transaction line from the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatementLine {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// What the extraction collaborator returns for an uploaded statement.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractedStatement {
    #[serde(default)]
    pub transactions: Vec<StatementLine>,
    #[serde(default)]
    pub raw_text: String,
}

/// Pulls candidate payment references out of statement text.
///
/// Raw text is split on anything other than letters, digits and `/ _ -`, so a
/// reference containing `.`, `#` or spaces only matches through a line's
/// `reference` field. Raw-text tokens shorter than `min_len` are ignored.
#[derive(Debug, Clone)]
pub struct ReferenceScanner {
    min_len: usize,
}

impl ReferenceScanner {
    pub fn new(min_len: usize) -> Self {
        Self { min_len }
    }

    /// Uppercased tokens from the raw text and from every line's reference.
    /// A line reference is kept whole, whatever its length, as well as split.
    pub fn tokens(&self, statement: &ExtractedStatement) -> BTreeSet<String> {
        let mut tokens = BTreeSet::new();
        self.scan(&statement.raw_text, &mut tokens);
        for line in &statement.transactions {
            if let Some(reference) = line.reference.as_deref() {
                let whole = normalize_reference(reference);
                if !whole.is_empty() {
                    tokens.insert(whole);
                }
                self.scan(reference, &mut tokens);
            }
        }
        tokens
    }

    fn scan(&self, text: &str, tokens: &mut BTreeSet<String>) {
        tokens.extend(
            TOKEN
                .find_iter(text)
                .map(|m| m.as_str())
                .filter(|t| t.chars().count() >= self.min_len)
                .map(str::to_uppercase),
        );
    }
}

/// Outcome of matching one statement.
#[derive(Debug, Default)]
pub struct MatchReport {
    pub tokens: usize,
    pub verified: Vec<AllocationOutcome>,
    /// Matched payments whose verification failed, with the reason.
    pub failed: Vec<(Id, String)>,
}

impl<S: LedgerStore> Ledger<S> {
    /// Verify every pending payment whose reference appears in `statement`.
    ///
    /// Payments are verified one at a time, oldest first, each fully committed
    /// before the next starts, so FIFO allocation order stays deterministic.
    /// A failed verification is reported and does not stop the run.
    pub fn match_statement(&self, statement: &ExtractedStatement) -> Result<MatchReport, LedgerError> {
        let scanner = ReferenceScanner::new(self.config.min_reference_len);
        let tokens = scanner.tokens(statement);
        let mut report = MatchReport {
            tokens: tokens.len(),
            ..MatchReport::default()
        };
        if tokens.is_empty() {
            warn!("statement contains no reference tokens");
            return Ok(report);
        }

        let approver = self.config.automated_approver.clone();
        for payment in self.pending_payments(None)? {
            let Some(reference) = payment.reference.as_deref().map(normalize_reference) else {
                continue;
            };
            if !tokens.contains(&reference) {
                continue;
            }
            match self.verify_payment(payment.id, &approver) {
                Ok(outcome) => report.verified.push(outcome),
                Err(e) => {
                    warn!(payment = payment.id, reference = %reference, reason = %e, "statement match not verified");
                    report.failed.push((payment.id, e.to_string()));
                }
            }
        }

        info!(
            tokens = report.tokens,
            verified = report.verified.len(),
            failed = report.failed.len(),
            "statement matched"
        );
        Ok(report)
    }
}
