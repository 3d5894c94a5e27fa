// src/models/mod.rs
use serde::Serialize;

pub mod account;
pub mod message;
pub mod payment;
pub mod session;

pub use account::{Account, AccountRole};
pub use message::Message;
pub use session::{ChatMode, Participant, PaymentStatus, Session, SessionStatus};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub message: String,
}
