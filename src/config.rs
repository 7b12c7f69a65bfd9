//! Ledger configuration, with environment overrides.

use std::env;
use thiserror::Error;

use crate::model::ActorId;

const ENV_AUTO_APPROVER: &str = "CLUB_LEDGER_AUTO_APPROVER";
const ENV_VOID_POLICY: &str = "CLUB_LEDGER_VOID_POLICY";
const ENV_MIN_REFERENCE_LEN: &str = "CLUB_LEDGER_MIN_REFERENCE_LEN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: unknown void policy '{value}' (expected forbid or cascade)")]
    VoidPolicy { var: &'static str, value: String },

    #[error("{var}: expected a positive integer, got '{value}'")]
    NotPositive { var: &'static str, value: String },

    #[error("{var}: must not be empty")]
    Empty { var: &'static str },
}

/// What happens when a charge that already carries allocations is voided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoidPolicy {
    /// Refuse the void.
    #[default]
    Forbid,
    /// Reverse the allocations and re-run FIFO for the affected payments.
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Recorded as `verified_by` when a bank statement verifies a payment.
    pub automated_approver: ActorId,
    pub void_policy: VoidPolicy,
    /// Shortest statement token considered a payment reference.
    pub min_reference_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            automated_approver: "statement-matcher".to_string(),
            void_policy: VoidPolicy::Forbid,
            min_reference_len: 4,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `CLUB_LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_AUTO_APPROVER) {
            let value = value.trim();
            if value.is_empty() {
                return Err(ConfigError::Empty {
                    var: ENV_AUTO_APPROVER,
                });
            }
            config.automated_approver = value.to_string();
        }

        if let Some(value) = lookup(ENV_VOID_POLICY) {
            config.void_policy = match value.trim().to_ascii_lowercase().as_str() {
                "forbid" => VoidPolicy::Forbid,
                "cascade" => VoidPolicy::Cascade,
                _ => {
                    return Err(ConfigError::VoidPolicy {
                        var: ENV_VOID_POLICY,
                        value,
                    });
                }
            };
        }

        if let Some(value) = lookup(ENV_MIN_REFERENCE_LEN) {
            config.min_reference_len = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::NotPositive {
                        var: ENV_MIN_REFERENCE_LEN,
                        value,
                    });
                }
            };
        }

        Ok(config)
    }
}
