// Session ledger: booking and every status transition of a session.
// All writes go through apply_transition so concurrent requests serialise on the
// session version; external calls happen only after the state change is committed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::pricing::FeeSplit;
use super::settlement::SettlementEngine;
use crate::daily_client::{RoomError, RoomOutcome, RoomProperties, RoomProvisioner};
use crate::error::CoreError;
use crate::models::session::BookSessionRequest;
use crate::models::{Account, ChatMode, PaymentStatus, Session, SessionStatus};
use crate::store::{apply_transition, AccountStore, SessionStore};

/// Cap on the "my sessions" style listings.
pub const SESSION_LIST_LIMIT: i64 = 50;

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;

#[derive(Clone)]
pub struct SessionLedger {
    sessions: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountStore>,
    settlement: SettlementEngine,
    rooms: Option<Arc<dyn RoomProvisioner>>,
    room_timeout: Duration,
}

impl SessionLedger {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
        settlement: SettlementEngine,
        rooms: Option<Arc<dyn RoomProvisioner>>,
        room_timeout: Duration,
    ) -> Self {
        if rooms.is_none() {
            tracing::warn!("No room provisioner configured - sessions will start without video rooms");
        }
        Self {
            sessions,
            accounts,
            settlement,
            rooms,
            room_timeout,
        }
    }

    pub async fn book(&self, user: &Account, request: BookSessionRequest) -> Result<Session, CoreError> {
        let guide_id = request
            .guide_id
            .ok_or_else(|| CoreError::validation("guide_id is required"))?;
        let scheduled_at = request
            .scheduled_at
            .ok_or_else(|| CoreError::validation("scheduled_at is required"))?;
        let duration_minutes = match request.duration_minutes {
            Some(minutes) if minutes > 0 => minutes,
            Some(_) => return Err(CoreError::validation("Duration must be positive")),
            None => return Err(CoreError::validation("Duration is required")),
        };
        let split = FeeSplit::from_preferences(&request.preferences)?;

        if guide_id == user.id {
            return Err(CoreError::validation("You cannot book a session with yourself"));
        }
        match self.accounts.find_by_id(guide_id).await? {
            Some(guide) if guide.is_guide() => {}
            _ => return Err(CoreError::validation("Selected guide does not exist")),
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            guide_id,
            user_id: user.id,
            preferences: request.preferences,
            total_amount: split.total_amount,
            platform_fee: split.platform_fee,
            guide_amount: split.guide_amount,
            scheduled_at,
            duration_minutes,
            status: SessionStatus::Booked,
            payment_status: PaymentStatus::Pending,
            order_id: None,
            payment_id: None,
            refund_id: None,
            refund_requested_at: None,
            paid_at: None,
            payment_transferred: false,
            transferred_at: None,
            room_id: None,
            started_at: None,
            ended_at: None,
            rating: None,
            feedback: None,
            feedback_at: None,
            chat_mode: ChatMode::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(&session).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %session.user_id,
            guide_id = %session.guide_id,
            total_amount = %session.total_amount,
            "session booked"
        );
        Ok(session)
    }

    /// Participants only.
    pub async fn get_session(&self, session_id: Uuid, actor: &Account) -> Result<Session, CoreError> {
        let session = self.load(session_id).await?;
        if session.participant(actor.id).is_none() {
            return Err(CoreError::authorization("You are not a participant of this session"));
        }
        Ok(session)
    }

    pub async fn list_for_user(&self, actor: &Account, status: Option<&str>) -> Result<Vec<Session>, CoreError> {
        let status = status.map(str::parse::<SessionStatus>).transpose()?;
        self.sessions.list_for_user(actor.id, status, SESSION_LIST_LIMIT).await
    }

    pub async fn list_for_guide(&self, actor: &Account, status: Option<&str>) -> Result<Vec<Session>, CoreError> {
        if !actor.is_guide() {
            return Err(CoreError::authorization("Only guides have guide sessions"));
        }
        let status = status.map(str::parse::<SessionStatus>).transpose()?;
        self.sessions.list_for_guide(actor.id, status, SESSION_LIST_LIMIT).await
    }

    /// booked → in-progress. The room is requested only after the transition commits,
    /// and only by the caller that won it.
    pub async fn start(&self, session_id: Uuid, actor: &Account) -> Result<Session, CoreError> {
        let (session, room_id) = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if !session.is_guide(actor.id) {
                return Err(CoreError::authorization("Only the guide can start this session"));
            }
            if session.status != SessionStatus::Booked {
                return Err(CoreError::invalid_state(format!(
                    "Cannot start a session that is {}",
                    session.status
                )));
            }

            let now = Utc::now();
            let room_id = format!("session-{}-{}", session.id, now.timestamp_millis());
            session.status = SessionStatus::InProgress;
            session.started_at = Some(now);
            session.room_id = Some(room_id.clone());
            Ok(room_id)
        })
        .await?;

        tracing::info!(session_id = %session.id, room_id = %room_id, "session started");

        match self.provision_room(&room_id).await {
            Ok(outcome) => {
                tracing::debug!(session_id = %session.id, room_id = %room_id, ?outcome, "video room ready")
            }
            Err(e) => tracing::warn!(
                session_id = %session.id,
                room_id = %room_id,
                error = %e,
                "video room provisioning failed, clients will retry on join"
            ),
        }

        Ok(session)
    }

    async fn provision_room(&self, room_id: &str) -> Result<RoomOutcome, RoomError> {
        let Some(rooms) = &self.rooms else {
            return Err(RoomError::Request("room provisioning is not configured".to_string()));
        };

        match tokio::time::timeout(
            self.room_timeout,
            rooms.ensure_room(room_id, &RoomProperties::default()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RoomError::Timeout(self.room_timeout)),
        }
    }

    /// in-progress → completed, then a best-effort payout.
    pub async fn end(&self, session_id: Uuid, actor: &Account) -> Result<Session, CoreError> {
        let (session, ()) = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if !session.is_guide(actor.id) {
                return Err(CoreError::authorization("Only the guide can end this session"));
            }
            if session.status != SessionStatus::InProgress {
                return Err(CoreError::invalid_state(format!(
                    "Cannot end a session that is {}",
                    session.status
                )));
            }
            let now = Utc::now();
            if session.refund_in_flight(now) {
                return Err(CoreError::conflict("A refund is in progress for this session"));
            }

            session.status = SessionStatus::Completed;
            session.ended_at = Some(now);
            Ok(())
        })
        .await?;

        tracing::info!(session_id = %session.id, "session completed");

        if !session.awaiting_settlement() {
            return Ok(session);
        }

        match self.settlement.settle(session.id).await {
            Ok((settled, _)) => Ok(settled),
            Err(e) => {
                // the sweep picks it up later
                tracing::warn!(session_id = %session.id, error = %e, "settlement after end failed");
                Ok(session)
            }
        }
    }

    pub async fn submit_feedback(
        &self,
        session_id: Uuid,
        actor: &Account,
        rating: i16,
        feedback: Option<String>,
    ) -> Result<Session, CoreError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(CoreError::validation("Rating must be between 1 and 5"));
        }
        let feedback = feedback
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        let (session, ()) = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if !session.is_user(actor.id) {
                return Err(CoreError::authorization("Only the session's user can leave feedback"));
            }
            if session.status != SessionStatus::Completed {
                return Err(CoreError::invalid_state("Feedback is only accepted for completed sessions"));
            }
            if session.rating.is_some() {
                return Err(CoreError::conflict("Feedback already submitted for this session"));
            }

            session.rating = Some(rating);
            session.feedback = feedback.clone();
            session.feedback_at = Some(Utc::now());
            Ok(())
        })
        .await?;

        match self.accounts.record_review(session.guide_id, rating).await {
            Ok(guide) => tracing::info!(
                session_id = %session.id,
                guide_id = %guide.id,
                rating,
                guide_rating = %guide.rating,
                "feedback recorded"
            ),
            Err(e) => tracing::error!(
                session_id = %session.id,
                guide_id = %session.guide_id,
                error = %e,
                "feedback saved but guide rating aggregate was not updated"
            ),
        }

        Ok(session)
    }

    pub async fn set_chat_mode(&self, session_id: Uuid, actor: &Account, mode: &str) -> Result<Session, CoreError> {
        let (session, ()) = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if !session.is_guide(actor.id) {
                return Err(CoreError::authorization("Only the guide can change the chat mode"));
            }
            session.chat_mode = mode.parse::<ChatMode>()?;
            Ok(())
        })
        .await?;

        tracing::debug!(session_id = %session.id, chat_mode = %session.chat_mode, "chat mode changed");
        Ok(session)
    }

    async fn load(&self, session_id: Uuid) -> Result<Session, CoreError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Session not found"))
    }
}
