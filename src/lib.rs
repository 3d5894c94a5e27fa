// lib.rs - exam-guide session marketplace backend
pub mod config;
pub mod daily_client;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod razorpay_client;
pub mod services;
pub mod store;

use identity::IdentityResolver;
use services::{AccountDirectory, ChatGate, PaymentOrchestrator, SessionLedger, SettlementEngine};

/// Service handles shared by every request, built once in `main`.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub identity: IdentityResolver,
    pub ledger: SessionLedger,
    pub payments: PaymentOrchestrator,
    pub settlement: SettlementEngine,
    pub chat: ChatGate,
    pub directory: AccountDirectory,
}
