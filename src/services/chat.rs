// Chat gate: who may post into a session's message stream.
// Messages never lock the session; the mode is read fresh on every send, so a mode
// switch applies to the next message without coordinating with in-flight ones.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Account, ChatMode, Message, Participant, Session};
use crate::store::{MessageStore, SessionStore};

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MESSAGE_PAGE_LIMIT: i64 = 200;

/// Guides may always post; users only while the session is two-way.
pub fn can_send(session: &Session, actor_id: Uuid) -> bool {
    match session.participant(actor_id) {
        Some(Participant::Guide) => true,
        Some(Participant::User) => session.chat_mode == ChatMode::TwoWay,
        None => false,
    }
}

#[derive(Clone)]
pub struct ChatGate {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
}

impl ChatGate {
    pub fn new(sessions: Arc<dyn SessionStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { sessions, messages }
    }

    pub async fn send(&self, session_id: Uuid, actor: &Account, text: Option<&str>) -> Result<Message, CoreError> {
        let session = self.load(session_id).await?;
        let Some(sender_role) = session.participant(actor.id) else {
            return Err(CoreError::authorization("You are not a participant of this session"));
        };
        if !can_send(&session, actor.id) {
            return Err(CoreError::authorization("Only the guide can send messages in one-way mode"));
        }

        let text = text.map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(CoreError::validation("Message text is required"));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(CoreError::validation(format!(
                "Message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            sender_id: actor.id,
            sender_role,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.messages.insert(&message).await?;

        tracing::debug!(session_id = %session_id, sender_id = %actor.id, "message posted");
        Ok(message)
    }

    pub async fn list_since(
        &self,
        session_id: Uuid,
        actor: &Account,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, CoreError> {
        let session = self.load(session_id).await?;
        if session.participant(actor.id).is_none() {
            return Err(CoreError::authorization("You are not a participant of this session"));
        }
        self.messages.list(session_id, since, MESSAGE_PAGE_LIMIT).await
    }

    async fn load(&self, session_id: Uuid) -> Result<Session, CoreError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Session not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountRole;
    use crate::services::test_support::{account, booked_session};
    use crate::store::{MemoryMessageStore, MemorySessionStore};

    struct Fixture {
        chat: ChatGate,
        guide: Account,
        user: Account,
        session: Session,
    }

    async fn fixture(mode: ChatMode) -> Fixture {
        let sessions = Arc::new(MemorySessionStore::new());
        let guide = account(AccountRole::Guide);
        let user = account(AccountRole::User);
        let mut session = booked_session(guide.id, user.id);
        session.chat_mode = mode;
        sessions.insert(&session).await.unwrap();

        let chat = ChatGate::new(sessions, Arc::new(MemoryMessageStore::new()));
        Fixture { chat, guide, user, session }
    }

    #[test]
    fn test_can_send_matrix() {
        let guide = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut session = booked_session(guide, user);

        assert!(can_send(&session, guide));
        assert!(can_send(&session, user));
        assert!(!can_send(&session, Uuid::new_v4()));

        session.chat_mode = ChatMode::OneWay;
        assert!(can_send(&session, guide));
        assert!(!can_send(&session, user));
    }

    #[tokio::test]
    async fn test_one_way_blocks_user() {
        let f = fixture(ChatMode::OneWay).await;

        assert!(matches!(
            f.chat.send(f.session.id, &f.user, Some("hello")).await,
            Err(CoreError::Authorization(_))
        ));
        let sent = f.chat.send(f.session.id, &f.guide, Some("  welcome  ")).await.unwrap();
        assert_eq!(sent.text, "welcome");
        assert_eq!(sent.sender_role, Participant::Guide);
    }

    #[tokio::test]
    async fn test_text_validation() {
        let f = fixture(ChatMode::TwoWay).await;

        assert!(matches!(
            f.chat.send(f.session.id, &f.user, Some("   ")).await,
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            f.chat.send(f.session.id, &f.user, None).await,
            Err(CoreError::Validation(_))
        ));

        // counted in characters, not bytes
        let at_limit = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(f.chat.send(f.session.id, &f.user, Some(&at_limit)).await.is_ok());
        let over = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            f.chat.send(f.session.id, &f.user, Some(&over)).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_since_participants_only() {
        let f = fixture(ChatMode::TwoWay).await;
        let first = f.chat.send(f.session.id, &f.user, Some("one")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        f.chat.send(f.session.id, &f.guide, Some("two")).await.unwrap();

        let all = f.chat.list_since(f.session.id, &f.guide, None).await.unwrap();
        assert_eq!(all.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), vec!["one", "two"]);

        let newer = f
            .chat
            .list_since(f.session.id, &f.user, Some(first.created_at))
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].text, "two");

        let stranger = account(AccountRole::User);
        assert!(matches!(
            f.chat.list_since(f.session.id, &stranger, None).await,
            Err(CoreError::Authorization(_))
        ));
    }
}
