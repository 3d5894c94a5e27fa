// src/store/memory.rs
//! In-process stores with the same contracts as the Postgres ones. Used by tests and
//! handy for running the service logic without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AccountStore, GuideFilter, GuideMatch, MessageStore, SessionStore};
use crate::error::CoreError;
use crate::models::account::ProfileFields;
use crate::models::{Account, AccountRole, Message, Session, SessionStatus};

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an account as-is, bypassing the first-account-is-admin rule.
    pub async fn put(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, CoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_external_uid(&self, external_uid: &str) -> Result<Option<Account>, CoreError> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.external_uid == external_uid)
            .cloned())
    }

    async fn create_if_absent(
        &self,
        external_uid: &str,
        profile: ProfileFields,
    ) -> Result<(Account, bool), CoreError> {
        let mut accounts = self.accounts.write().await;
        if let Some(existing) = accounts.values().find(|a| a.external_uid == external_uid) {
            return Ok((existing.clone(), false));
        }

        let role = if accounts.is_empty() { AccountRole::Admin } else { AccountRole::User };
        let account = Account::new(external_uid.to_string(), role, profile);
        accounts.insert(account.id, account.clone());
        Ok((account, true))
    }

    async fn save_profile(&self, account: &Account) -> Result<(), CoreError> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts
            .get_mut(&account.id)
            .ok_or_else(|| CoreError::not_found("Account not found"))?;

        // role and rating aggregate are owned by other operations
        let role = stored.role;
        let (rating, rating_sum, review_count) = (stored.rating, stored.rating_sum, stored.review_count);
        *stored = account.clone();
        stored.role = role;
        stored.rating = rating;
        stored.rating_sum = rating_sum;
        stored.review_count = review_count;
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: AccountRole) -> Result<Option<Account>, CoreError> {
        let mut accounts = self.accounts.write().await;
        Ok(accounts.get_mut(&id).map(|account| {
            account.role = role;
            account.updated_at = Utc::now();
            account.clone()
        }))
    }

    async fn record_review(&self, guide_id: Uuid, rating: i16) -> Result<Account, CoreError> {
        let mut accounts = self.accounts.write().await;
        let guide = accounts
            .get_mut(&guide_id)
            .ok_or_else(|| CoreError::not_found("Guide not found"))?;
        guide.record_review(rating);
        Ok(guide.clone())
    }

    async fn list_guides(&self, filter: &GuideFilter) -> Result<Vec<GuideMatch>, CoreError> {
        let accounts = self.accounts.read().await;
        let mut guides: Vec<GuideMatch> = accounts
            .values()
            .filter(|a| a.is_guide())
            .filter(|a| match &filter.exam {
                Some(exam) => a.guide_exams.iter().any(|e| &e.exam_name == exam),
                None => true,
            })
            .filter(|a| match &filter.city {
                Some(city) => a.attempt_cities().iter().any(|c| c == city),
                None => true,
            })
            .filter_map(|a| match &filter.near {
                Some(origin) => a
                    .nearest_attempt_meters(origin)
                    .filter(|d| *d <= filter.radius_meters)
                    .map(|d| GuideMatch { account: a.clone(), distance_meters: Some(d) }),
                None => Some(GuideMatch { account: a.clone(), distance_meters: None }),
            })
            .collect();

        match filter.near {
            Some(_) => guides.sort_by(|a, b| {
                let (da, db) = (a.distance_meters.unwrap_or(f64::MAX), b.distance_meters.unwrap_or(f64::MAX));
                da.total_cmp(&db)
            }),
            None => guides.sort_by(|a, b| b.account.updated_at.cmp(&a.account.updated_at)),
        }

        Ok(guides
            .into_iter()
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn list_accounts(&self, limit: i64) -> Result<Vec<Account>, CoreError> {
        let mut accounts: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        accounts.truncate(limit.max(0) as usize);
        Ok(accounts)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn list_matching<P>(&self, predicate: P, limit: i64) -> Vec<Session>
    where
        P: Fn(&Session) -> bool,
    {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| predicate(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        sessions.truncate(limit.max(0) as usize);
        sessions
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<(), CoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(CoreError::conflict("Session already exists"));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, CoreError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn compare_and_swap(&self, session: &Session, expected_version: i64) -> Result<bool, CoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(stored) = sessions.get_mut(&session.id) else {
            return Err(CoreError::not_found("Session not found"));
        };
        if stored.version != expected_version {
            return Ok(false);
        }

        if let Some(room_id) = &session.room_id {
            // mirrors the UNIQUE constraint on sessions.room_id
            let taken = sessions
                .values()
                .any(|other| other.id != session.id && other.room_id.as_ref() == Some(room_id));
            if taken {
                return Err(CoreError::conflict("Room id already assigned to another session"));
            }
        }

        let mut updated = session.clone();
        updated.version = expected_version + 1;
        sessions.insert(updated.id, updated);
        Ok(true)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<Session>, CoreError> {
        Ok(self
            .list_matching(|s| s.user_id == user_id && status.map_or(true, |st| s.status == st), limit)
            .await)
    }

    async fn list_for_guide(
        &self,
        guide_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<Session>, CoreError> {
        Ok(self
            .list_matching(|s| s.guide_id == guide_id && status.map_or(true, |st| s.status == st), limit)
            .await)
    }

    async fn list_awaiting_settlement(&self, limit: i64) -> Result<Vec<Session>, CoreError> {
        Ok(self.list_matching(Session::awaiting_settlement, limit).await)
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: &Message) -> Result<(), CoreError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn list(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>, CoreError> {
        let mut messages: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id)
            .filter(|m| since.map_or(true, |since| m.created_at > since))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::{ChatMode, PaymentStatus, Preference};
    use rust_decimal::Decimal;

    fn sample_session() -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            guide_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            preferences: vec![Preference { kind: "Strategy".into(), price: Decimal::from(100) }],
            total_amount: Decimal::from(100),
            platform_fee: Decimal::from(5),
            guide_amount: Decimal::from(95),
            scheduled_at: now,
            duration_minutes: 30,
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
            chat_mode: ChatMode::TwoWay,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = MemorySessionStore::new();
        let session = sample_session();
        store.insert(&session).await.unwrap();

        let mut first = session.clone();
        first.status = SessionStatus::InProgress;
        assert!(store.compare_and_swap(&first, 0).await.unwrap());

        let mut stale = session.clone();
        stale.status = SessionStatus::Cancelled;
        assert!(!store.compare_and_swap(&stale, 0).await.unwrap());

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::InProgress);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_first_account_becomes_admin() {
        let store = MemoryAccountStore::new();
        let (first, created) = store.create_if_absent("uid-a", ProfileFields::default()).await.unwrap();
        assert!(created);
        let (second, _) = store.create_if_absent("uid-b", ProfileFields::default()).await.unwrap();
        let (again, created_again) = store.create_if_absent("uid-a", ProfileFields::default()).await.unwrap();

        assert_eq!(first.role, AccountRole::Admin);
        assert_eq!(second.role, AccountRole::User);
        assert_eq!(again.id, first.id);
        assert!(!created_again);
    }
}
