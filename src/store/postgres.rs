// src/store/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{AccountStore, GuideFilter, GuideMatch, MessageStore, SessionStore};
use crate::error::CoreError;
use crate::models::account::{AccountRecord, ProfileFields, EARTH_RADIUS_METERS};
use crate::models::message::MessageRecord;
use crate::models::session::SessionRecord;
use crate::models::{Account, AccountRole, Message, Session, SessionStatus};

const ACCOUNT_COLUMNS: &str = "id, external_uid, role, name, email, phone, photo_url, exam_type, \
     exam_city, exam_date, exam_center_address, admit_card_url, support_type, hotel_price_range, \
     travel_mode, travel_preference, additional_info, guide_exams, rating, rating_sum, review_count, \
     created_at, updated_at";

// Great-circle distance from ($5 lat, $6 lng) to the closest attempt with stored coords.
// Coordinates are GeoJSON `[lng, lat]`.
const NEAREST_ATTEMPT_METERS: &str = "(SELECT MIN(2 * $7::float8 * ASIN(LEAST(1.0, SQRT(
         POWER(SIN(RADIANS((attempt->'coords'->'coordinates'->>1)::float8 - $5::float8) / 2), 2)
         + COS(RADIANS($5::float8)) * COS(RADIANS((attempt->'coords'->'coordinates'->>1)::float8))
         * POWER(SIN(RADIANS((attempt->'coords'->'coordinates'->>0)::float8 - $6::float8) / 2), 2)))))
     FROM jsonb_array_elements(accounts.guide_exams) AS exam,
          jsonb_array_elements(exam->'attempts') AS attempt
     WHERE $5::float8 IS NOT NULL
       AND jsonb_typeof(attempt->'coords'->'coordinates') = 'array')";

const SESSION_COLUMNS: &str = "id, guide_id, user_id, preferences, total_amount, platform_fee, \
     guide_amount, scheduled_at, duration_minutes, status, payment_status, order_id, payment_id, \
     refund_id, refund_requested_at, paid_at, payment_transferred, transferred_at, room_id, \
     started_at, ended_at, rating, feedback, feedback_at, chat_mode, version, created_at, updated_at";

// Serialises first-account creation so only one account can ever take the admin seat.
const FIRST_ACCOUNT_LOCK_KEY: i64 = 0x6578_616d_696e;

#[derive(Debug, FromRow)]
struct GuideRecord {
    #[sqlx(flatten)]
    account: AccountRecord,
    distance_meters: Option<f64>,
}

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, CoreError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Account::try_from).transpose()
    }

    async fn find_by_external_uid(&self, external_uid: &str) -> Result<Option<Account>, CoreError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {} FROM accounts WHERE external_uid = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(external_uid)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Account::try_from).transpose()
    }

    async fn create_if_absent(
        &self,
        external_uid: &str,
        profile: ProfileFields,
    ) -> Result<(Account, bool), CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(FIRST_ACCOUNT_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {} FROM accounts WHERE external_uid = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(external_uid)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(record) = existing {
            tx.commit().await?;
            return Ok((Account::try_from(record)?, false));
        }

        let any_account: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts)")
            .fetch_one(&mut *tx)
            .await?;
        let role = if any_account { AccountRole::User } else { AccountRole::Admin };
        let account = Account::new(external_uid.to_string(), role, profile);

        sqlx::query(
            "INSERT INTO accounts (id, external_uid, role, name, email, phone, photo_url, exam_type,
                 exam_city, exam_date, exam_center_address, admit_card_url, support_type,
                 hotel_price_range, travel_mode, travel_preference, additional_info, guide_exams,
                 rating, rating_sum, review_count, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                 $19, $20, $21, $22, $23)",
        )
        .bind(account.id)
        .bind(&account.external_uid)
        .bind(account.role.as_str())
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.phone)
        .bind(&account.photo_url)
        .bind(&account.exam_type)
        .bind(&account.exam_city)
        .bind(&account.exam_date)
        .bind(&account.exam_center_address)
        .bind(&account.admit_card_url)
        .bind(&account.support_type)
        .bind(&account.hotel_price_range)
        .bind(&account.travel_mode)
        .bind(&account.travel_preference)
        .bind(&account.additional_info)
        .bind(Json(&account.guide_exams))
        .bind(account.rating)
        .bind(account.rating_sum)
        .bind(account.review_count)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if role == AccountRole::Admin {
            tracing::info!(account_id = %account.id, "first account created, granted admin role");
        }
        Ok((account, true))
    }

    async fn save_profile(&self, account: &Account) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE accounts SET name = $2, email = $3, phone = $4, photo_url = $5, exam_type = $6,
                 exam_city = $7, exam_date = $8, exam_center_address = $9, admit_card_url = $10,
                 support_type = $11, hotel_price_range = $12, travel_mode = $13,
                 travel_preference = $14, additional_info = $15, guide_exams = $16, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.phone)
        .bind(&account.photo_url)
        .bind(&account.exam_type)
        .bind(&account.exam_city)
        .bind(&account.exam_date)
        .bind(&account.exam_center_address)
        .bind(&account.admit_card_url)
        .bind(&account.support_type)
        .bind(&account.hotel_price_range)
        .bind(&account.travel_mode)
        .bind(&account.travel_preference)
        .bind(&account.additional_info)
        .bind(Json(&account.guide_exams))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: AccountRole) -> Result<Option<Account>, CoreError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "UPDATE accounts SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        record.map(Account::try_from).transpose()
    }

    async fn record_review(&self, guide_id: Uuid, rating: i16) -> Result<Account, CoreError> {
        // NUMERIC ROUND is half away from zero, same as average_rating()
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "UPDATE accounts
             SET rating_sum = rating_sum + $2,
                 review_count = review_count + 1,
                 rating = ROUND((rating_sum + $2)::numeric / (review_count + 1), 1),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(guide_id)
        .bind(i64::from(rating))
        .fetch_optional(&self.pool)
        .await?;

        record
            .map(Account::try_from)
            .transpose()?
            .ok_or_else(|| CoreError::not_found("Guide not found"))
    }

    async fn list_guides(&self, filter: &GuideFilter) -> Result<Vec<GuideMatch>, CoreError> {
        let records = sqlx::query_as::<_, GuideRecord>(&format!(
            "WITH candidates AS (
                 SELECT {}, {} AS distance_meters
                 FROM accounts
                 WHERE role = 'guide'
                   AND ($1::text IS NULL OR guide_exams @> jsonb_build_array(jsonb_build_object('exam_name', $1::text)))
                   AND ($2::text IS NULL OR EXISTS (
                         SELECT 1 FROM jsonb_array_elements(guide_exams) AS exam,
                                       jsonb_array_elements(exam->'attempts') AS attempt
                         WHERE attempt->>'city' = $2::text))
             )
             SELECT * FROM candidates
             WHERE $5::float8 IS NULL OR distance_meters <= $8::float8
             ORDER BY CASE WHEN $5::float8 IS NULL THEN NULL ELSE distance_meters END ASC NULLS LAST,
                      updated_at DESC
             LIMIT $3 OFFSET $4",
            ACCOUNT_COLUMNS, NEAREST_ATTEMPT_METERS
        ))
        .bind(&filter.exam)
        .bind(&filter.city)
        .bind(filter.limit)
        .bind(filter.skip)
        .bind(filter.near.map(|p| p.lat()))
        .bind(filter.near.map(|p| p.lng()))
        .bind(EARTH_RADIUS_METERS)
        .bind(filter.radius_meters)
        .fetch_all(&self.pool)
        .await?;

        records
            .into_iter()
            .map(|record| {
                Ok(GuideMatch {
                    account: Account::try_from(record.account)?,
                    distance_meters: record.distance_meters,
                })
            })
            .collect()
    }

    async fn list_accounts(&self, limit: i64) -> Result<Vec<Account>, CoreError> {
        let records = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {} FROM accounts ORDER BY created_at DESC LIMIT $1",
            ACCOUNT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Account::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_where(
        &self,
        column: &str,
        account_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<Session>, CoreError> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions
             WHERE {} = $1 AND ($2::text IS NULL OR status = $2::text)
             ORDER BY scheduled_at DESC
             LIMIT $3",
            SESSION_COLUMNS, column
        ))
        .bind(account_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Session::try_from).collect()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &Session) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, guide_id, user_id, preferences, total_amount, platform_fee,
                 guide_amount, scheduled_at, duration_minutes, status, payment_status, chat_mode,
                 version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(session.id)
        .bind(session.guide_id)
        .bind(session.user_id)
        .bind(Json(&session.preferences))
        .bind(session.total_amount)
        .bind(session.platform_fee)
        .bind(session.guide_amount)
        .bind(session.scheduled_at)
        .bind(session.duration_minutes)
        .bind(session.status.as_str())
        .bind(session.payment_status.as_str())
        .bind(session.chat_mode.as_str())
        .bind(session.version)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, CoreError> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Session::try_from).transpose()
    }

    async fn compare_and_swap(&self, session: &Session, expected_version: i64) -> Result<bool, CoreError> {
        // Monetary totals and participants are fixed at booking and never rewritten
        let result = sqlx::query(
            "UPDATE sessions SET
                 status = $3, payment_status = $4, order_id = $5, payment_id = $6, refund_id = $7,
                 refund_requested_at = $8, paid_at = $9, payment_transferred = $10, transferred_at = $11,
                 room_id = $12, started_at = $13, ended_at = $14, rating = $15, feedback = $16,
                 feedback_at = $17, chat_mode = $18, updated_at = $19, version = version + 1
             WHERE id = $1 AND version = $2",
        )
        .bind(session.id)
        .bind(expected_version)
        .bind(session.status.as_str())
        .bind(session.payment_status.as_str())
        .bind(&session.order_id)
        .bind(&session.payment_id)
        .bind(&session.refund_id)
        .bind(session.refund_requested_at)
        .bind(session.paid_at)
        .bind(session.payment_transferred)
        .bind(session.transferred_at)
        .bind(&session.room_id)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.rating)
        .bind(&session.feedback)
        .bind(session.feedback_at)
        .bind(session.chat_mode.as_str())
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<Session>, CoreError> {
        self.list_where("user_id", user_id, status, limit).await
    }

    async fn list_for_guide(
        &self,
        guide_id: Uuid,
        status: Option<SessionStatus>,
        limit: i64,
    ) -> Result<Vec<Session>, CoreError> {
        self.list_where("guide_id", guide_id, status, limit).await
    }

    async fn list_awaiting_settlement(&self, limit: i64) -> Result<Vec<Session>, CoreError> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions
             WHERE status = 'completed' AND payment_status = 'completed' AND NOT payment_transferred
             ORDER BY ended_at ASC NULLS LAST
             LIMIT $1",
            SESSION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Session::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: &Message) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO session_messages (id, session_id, sender_id, sender_role, text, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.sender_id)
        .bind(message.sender_role.as_str())
        .bind(&message.text)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>, CoreError> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, session_id, sender_id, sender_role, text, created_at
             FROM session_messages
             WHERE session_id = $1 AND ($2::timestamptz IS NULL OR created_at > $2)
             ORDER BY created_at ASC
             LIMIT $3",
        )
        .bind(session_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Message::try_from).collect()
    }
}
