// src/models/session.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// A refund claim older than this is treated as abandoned and may be taken over.
pub const REFUND_CLAIM_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Booked,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Booked => "booked",
            SessionStatus::InProgress => "in-progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(SessionStatus::Booked),
            "in-progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(CoreError::validation(format!("Invalid session status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(CoreError::validation(format!("Invalid payment status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatMode {
    /// Only the guide may post.
    OneWay,
    #[default]
    TwoWay,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::OneWay => "one-way",
            ChatMode::TwoWay => "two-way",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one-way" => Ok(ChatMode::OneWay),
            "two-way" => Ok(ChatMode::TwoWay),
            other => Err(CoreError::validation(format!("Invalid chat mode: {}", other))),
        }
    }
}

/// Which side of a session an account is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participant {
    Guide,
    User,
}

impl Participant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Participant::Guide => "guide",
            Participant::User => "user",
        }
    }
}

impl FromStr for Participant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guide" => Ok(Participant::Guide),
            "user" => Ok(Participant::User),
            other => Err(CoreError::validation(format!("Invalid participant role: {}", other))),
        }
    }
}

/// One selected line item, e.g. "Strategy Session" or "Exam Day Support".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    #[serde(rename = "type", alias = "name")]
    pub kind: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub guide_id: Uuid,
    pub user_id: Uuid,
    pub preferences: Vec<Preference>,
    pub total_amount: Decimal,
    pub platform_fee: Decimal,
    pub guide_amount: Decimal,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: SessionStatus,
    pub payment_status: PaymentStatus,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub refund_id: Option<String>,
    /// Set while a refund is in flight at the gateway; at most one refund runs per session.
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_transferred: bool,
    pub transferred_at: Option<DateTime<Utc>>,
    pub room_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rating: Option<i16>,
    pub feedback: Option<String>,
    pub feedback_at: Option<DateTime<Utc>>,
    pub chat_mode: ChatMode,
    /// Bumped on every committed write; used for compare-and-swap.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn participant(&self, account_id: Uuid) -> Option<Participant> {
        if account_id == self.guide_id {
            Some(Participant::Guide)
        } else if account_id == self.user_id {
            Some(Participant::User)
        } else {
            None
        }
    }

    pub fn is_guide(&self, account_id: Uuid) -> bool {
        self.participant(account_id) == Some(Participant::Guide)
    }

    pub fn is_user(&self, account_id: Uuid) -> bool {
        self.participant(account_id) == Some(Participant::User)
    }

    /// True while another caller holds a live refund claim on this session.
    pub fn refund_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.refund_requested_at
            .map_or(false, |at| now - at < chrono::Duration::seconds(REFUND_CLAIM_TTL_SECS))
    }

    /// Completed sessions whose paid amount has not yet been booked to the guide.
    pub fn awaiting_settlement(&self) -> bool {
        self.status == SessionStatus::Completed
            && self.payment_status == PaymentStatus::Completed
            && !self.payment_transferred
    }
}

/// Row shape of the `sessions` table.
#[derive(Debug, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub guide_id: Uuid,
    pub user_id: Uuid,
    pub preferences: sqlx::types::Json<Vec<Preference>>,
    pub total_amount: Decimal,
    pub platform_fee: Decimal,
    pub guide_amount: Decimal,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: String,
    pub payment_status: String,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub refund_id: Option<String>,
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_transferred: bool,
    pub transferred_at: Option<DateTime<Utc>>,
    pub room_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rating: Option<i16>,
    pub feedback: Option<String>,
    pub feedback_at: Option<DateTime<Utc>>,
    pub chat_mode: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRecord> for Session {
    type Error = CoreError;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        Ok(Session {
            id: record.id,
            guide_id: record.guide_id,
            user_id: record.user_id,
            preferences: record.preferences.0,
            total_amount: record.total_amount,
            platform_fee: record.platform_fee,
            guide_amount: record.guide_amount,
            scheduled_at: record.scheduled_at,
            duration_minutes: record.duration_minutes,
            status: record.status.parse()?,
            payment_status: record.payment_status.parse()?,
            order_id: record.order_id,
            payment_id: record.payment_id,
            refund_id: record.refund_id,
            refund_requested_at: record.refund_requested_at,
            paid_at: record.paid_at,
            payment_transferred: record.payment_transferred,
            transferred_at: record.transferred_at,
            room_id: record.room_id,
            started_at: record.started_at,
            ended_at: record.ended_at,
            rating: record.rating,
            feedback: record.feedback,
            feedback_at: record.feedback_at,
            chat_mode: record.chat_mode.parse()?,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

// Request/Response DTOs

#[derive(Debug, Deserialize)]
pub struct BookSessionRequest {
    pub guide_id: Option<Uuid>,
    #[serde(default)]
    pub preferences: Vec<Preference>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(alias = "duration")]
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub session_id: Uuid,
    pub rating: i16,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatModeRequest {
    pub mode: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub session: Session,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub success: bool,
    pub room_id: String,
    pub session: Session,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub success: bool,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
pub struct ChatModeResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub chat_mode: ChatMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_match_storage_values() {
        for status in [
            SessionStatus::Booked,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_value(SessionStatus::InProgress).unwrap(),
            serde_json::json!("in-progress")
        );
    }

    #[test]
    fn test_chat_mode_rejects_unknown_values() {
        assert_eq!("one-way".parse::<ChatMode>().unwrap(), ChatMode::OneWay);
        assert!(matches!("broadcast".parse::<ChatMode>(), Err(CoreError::Validation(_))));
        assert_eq!(ChatMode::default(), ChatMode::TwoWay);
    }

    #[test]
    fn test_preference_accepts_type_field() {
        let pref: Preference =
            serde_json::from_value(serde_json::json!({"type": "Strategy", "price": 1000})).unwrap();
        assert_eq!(pref.kind, "Strategy");
        assert_eq!(pref.price, Decimal::from(1000));
    }
}
