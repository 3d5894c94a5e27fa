// Guide directory and admin account management.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::account::{GeoPoint, GuideQuery, GuideSummary};
use crate::models::{Account, AccountRole};
use crate::store::{AccountStore, GuideFilter};

const DEFAULT_GUIDE_PAGE: i64 = 30;
const MAX_GUIDE_PAGE: i64 = 100;
const DEFAULT_RADIUS_KM: f64 = 50.0;
// half the earth's circumference
const MAX_RADIUS_KM: f64 = 20_000.0;

// Values the directory UI sends for "no filter".
const ANY_EXAM: &str = "All Exams";
const ANY_CITY: &str = "All Cities";
pub const ADMIN_ACCOUNT_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AccountDirectory {
    accounts: Arc<dyn AccountStore>,
}

impl AccountDirectory {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    pub async fn list_guides(&self, query: GuideQuery) -> Result<Vec<GuideSummary>, CoreError> {
        // proximity search only when both coordinates are given
        let near = match (query.lat, query.lng) {
            (Some(lat), Some(lng)) => {
                let origin = GeoPoint::new(lat, lng);
                origin.validate()?;
                Some(origin)
            }
            _ => None,
        };
        let radius_km = query.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
        if !radius_km.is_finite() || radius_km <= 0.0 || radius_km > MAX_RADIUS_KM {
            return Err(CoreError::validation(format!(
                "radius_km must be between 0 and {}",
                MAX_RADIUS_KM
            )));
        }

        let filter = GuideFilter {
            exam: selected(query.exam, ANY_EXAM),
            city: selected(query.city, ANY_CITY),
            near,
            radius_meters: radius_km * 1000.0,
            limit: query.limit.unwrap_or(DEFAULT_GUIDE_PAGE).clamp(1, MAX_GUIDE_PAGE),
            skip: query.skip.unwrap_or(0).max(0),
        };
        let guides = self.accounts.list_guides(&filter).await?;
        Ok(guides
            .iter()
            .map(|m| GuideSummary::with_distance(&m.account, m.distance_meters))
            .collect())
    }

    pub async fn list_accounts(&self, admin: &Account) -> Result<Vec<Account>, CoreError> {
        require_admin(admin)?;
        self.accounts.list_accounts(ADMIN_ACCOUNT_LIMIT).await
    }

    pub async fn set_role(&self, admin: &Account, account_id: Uuid, role: &str) -> Result<Account, CoreError> {
        require_admin(admin)?;
        let role: AccountRole = role.parse()?;

        let account = self
            .accounts
            .set_role(account_id, role)
            .await?
            .ok_or_else(|| CoreError::not_found("User not found"))?;

        tracing::info!(
            admin_id = %admin.id,
            account_id = %account.id,
            role = %account.role,
            "account role changed"
        );
        Ok(account)
    }
}

fn selected(value: Option<String>, any: &str) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != any)
}

pub fn require_admin(account: &Account) -> Result<(), CoreError> {
    if account.is_admin() {
        Ok(())
    } else {
        Err(CoreError::authorization("Admin access required"))
    }
}
