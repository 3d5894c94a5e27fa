// src/store/mod.rs
//! Persistence seams for accounts, sessions and session messages.
//!
//! Session writes go through [`SessionStore::compare_and_swap`]: every committed write
//! bumps `version`, and a write whose expected version is stale is refused. All
//! lifecycle transitions are funnelled through [`apply_transition`], which re-reads
//! and re-validates on a lost race, so concurrent callers always see the state the
//! winner left behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::account::{GeoPoint, ProfileFields};
use crate::models::{Account, AccountRole, Message, Session, SessionStatus};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryAccountStore, MemoryMessageStore, MemorySessionStore};
pub use postgres::{PgAccountStore, PgMessageStore, PgSessionStore};

/// How many times a transition is re-evaluated after losing a version race.
pub const MAX_TRANSITION_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct GuideFilter {
    pub exam: Option<String>,
    pub city: Option<String>,
    /// When set, only guides with an exam attempt within `radius_meters` of this point
    /// match, nearest first.
    pub near: Option<GeoPoint>,
    pub radius_meters: f64,
    pub limit: i64,
    pub skip: i64,
}

#[derive(Debug, Clone)]
pub struct GuideMatch {
    pub account: Account,
    /// Distance to the closest attempt; only populated for proximity searches.
    pub distance_meters: Option<f64>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, CoreError>;

    async fn find_by_external_uid(&self, external_uid: &str) -> Result<Option<Account>, CoreError>;

    /// Creates the account for `external_uid` unless it already exists, in which case
    /// the existing record is returned untouched and the flag is `false`. The very first
    /// account becomes admin.
    async fn create_if_absent(
        &self,
        external_uid: &str,
        profile: ProfileFields,
    ) -> Result<(Account, bool), CoreError>;

    async fn save_profile(&self, account: &Account) -> Result<(), CoreError>;

    async fn set_role(&self, id: Uuid, role: AccountRole) -> Result<Option<Account>, CoreError>;

    /// Atomically folds one rating into the guide aggregate and returns the updated guide.
    async fn record_review(&self, guide_id: Uuid, rating: i16) -> Result<Account, CoreError>;

    async fn list_guides(&self, filter: &GuideFilter) -> Result<Vec<GuideMatch>, CoreError>;

    async fn list_accounts(&self, limit: i64) -> Result<Vec<Account>, CoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), CoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Session>, CoreError>;

    /// Writes every mutable field of `session` iff the stored version still equals
    /// `expected_version`; the stored version becomes `expected_version + 1`.
    async fn compare_and_swap(&self, session: &Session, expected_version: i64) -> Result<bool, CoreError>;

    async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<Session>, CoreError>;

    async fn list_for_guide(
        &self,
        guide_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<Session>, CoreError>;

    /// Completed, paid, not yet transferred.
    async fn list_awaiting_settlement(&self, limit: i64) -> Result<Vec<Session>, CoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &Message) -> Result<(), CoreError>;

    /// Messages strictly newer than `since`, oldest first.
    async fn list(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>, CoreError>;
}

/// Loads the session, runs `transition` on it and commits with a version check.
///
/// The closure must be a pure function of the session it is given: on a lost race it
/// runs again against the fresh record, which is how a second concurrent `start`
/// ends up observing `in-progress` and failing with `InvalidState`.
pub async fn apply_transition<T, F>(
    store: &dyn SessionStore,
    session_id: Uuid,
    mut transition: F,
) -> Result<(Session, T), CoreError>
where
    F: FnMut(&mut Session) -> Result<T, CoreError> + Send,
    T: Send,
{
    for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
        let mut session = store
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Session not found"))?;
        let expected_version = session.version;

        let outcome = transition(&mut session)?;
        session.updated_at = Utc::now();

        if store.compare_and_swap(&session, expected_version).await? {
            session.version = expected_version + 1;
            return Ok((session, outcome));
        }

        tracing::debug!(
            session_id = %session_id,
            attempt,
            "session changed underneath transition, retrying"
        );
    }

    tracing::warn!(session_id = %session_id, "giving up on contended session transition");
    Err(CoreError::conflict("Session is being modified concurrently, please retry"))
}
