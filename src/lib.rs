pub mod amount;
pub mod clock;
pub mod config;
pub mod csv;
pub mod ledger;
pub mod model;
pub mod store;

#[cfg(test)]
mod testing;

pub use amount::Amount;
pub use config::LedgerConfig;
pub use ledger::{Ledger, LedgerError, PlayerBalance};
pub use model::{ActorId, Id, LedgerCommand, PlayerId};
pub use store::{LedgerStore, MemoryStore};
