// src/services/mod.rs
pub mod chat;
pub mod directory;
pub mod ledger;
pub mod payments;
pub mod pricing;
pub mod settlement;

#[cfg(test)]
pub(crate) mod test_support;

pub use chat::ChatGate;
pub use directory::AccountDirectory;
pub use ledger::SessionLedger;
pub use payments::{PaymentOrchestrator, VerificationOutcome};
pub use settlement::{SettlementEngine, SettlementReceipt};
