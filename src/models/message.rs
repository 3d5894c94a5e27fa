// src/models/message.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::session::Participant;
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: Participant,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct MessageRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = CoreError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        Ok(Message {
            id: record.id,
            session_id: record.session_id,
            sender_id: record.sender_id,
            sender_role: record.sender_role.parse()?,
            text: record.text,
            created_at: record.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub success: bool,
    pub messages: Vec<Message>,
}
