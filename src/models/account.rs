// src/models/account.rs
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    User,
    Admin,
    Guide,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::User => "user",
            AccountRole::Admin => "admin",
            AccountRole::Guide => "guide",
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(AccountRole::User),
            "admin" => Ok(AccountRole::Admin),
            "guide" => Ok(AccountRole::Guide),
            other => Err(CoreError::validation(format!("Invalid role: {}", other))),
        }
    }
}

/// Mean earth radius used for great-circle distances, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// GeoJSON point, `coordinates` ordered `[lng, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoPoint {
    Point { coordinates: [f64; 2] },
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        GeoPoint::Point { coordinates: [lng, lat] }
    }

    pub fn lat(&self) -> f64 {
        let GeoPoint::Point { coordinates } = self;
        coordinates[1]
    }

    pub fn lng(&self) -> f64 {
        let GeoPoint::Point { coordinates } = self;
        coordinates[0]
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let (lat, lng) = (self.lat(), self.lng());
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoreError::validation(format!("Latitude {} is out of range", lat)));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(CoreError::validation(format!("Longitude {} is out of range", lng)));
        }
        Ok(())
    }

    /// Haversine distance in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat().to_radians(), other.lat().to_radians());
        let d_lat = (other.lat() - self.lat()).to_radians();
        let d_lng = (other.lng() - self.lng()).to_radians();
        let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideAttempt {
    pub year: Option<i32>,
    pub city: String,
    pub address: Option<String>,
    pub achievement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideExam {
    pub exam_name: String,
    #[serde(default = "default_total_attempts")]
    pub total_attempts: i32,
    #[serde(default)]
    pub attempts: Vec<GuideAttempt>,
}

fn default_total_attempts() -> i32 {
    1
}

/// Internal profile bound to an external identity.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub external_uid: String,
    pub role: AccountRole,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub exam_type: Option<String>,
    pub exam_city: Option<String>,
    pub exam_date: Option<String>,
    pub exam_center_address: Option<String>,
    pub admit_card_url: Option<String>,
    pub support_type: Vec<String>,
    pub hotel_price_range: Option<String>,
    pub travel_mode: Vec<String>,
    pub travel_preference: Vec<String>,
    pub additional_info: Option<String>,
    pub guide_exams: Vec<GuideExam>,
    pub rating: Decimal,
    pub rating_sum: i64,
    pub review_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(external_uid: String, role: AccountRole, profile: ProfileFields) -> Self {
        let now = Utc::now();
        let mut account = Self {
            id: Uuid::new_v4(),
            external_uid,
            role,
            name: String::new(),
            email: String::new(),
            phone: None,
            photo_url: None,
            exam_type: None,
            exam_city: None,
            exam_date: None,
            exam_center_address: None,
            admit_card_url: None,
            support_type: Vec::new(),
            hotel_price_range: None,
            travel_mode: Vec::new(),
            travel_preference: Vec::new(),
            additional_info: None,
            guide_exams: Vec::new(),
            rating: Decimal::ZERO,
            rating_sum: 0,
            review_count: 0,
            created_at: now,
            updated_at: now,
        };
        account.apply_profile(profile);
        account
    }

    pub fn is_guide(&self) -> bool {
        self.role == AccountRole::Guide
    }

    pub fn is_admin(&self) -> bool {
        self.role == AccountRole::Admin
    }

    /// Overwrites only the fields present in `profile`. Role and rating are never touched here.
    pub fn apply_profile(&mut self, profile: ProfileFields) {
        if let Some(name) = profile.name {
            self.name = name;
        }
        if let Some(email) = profile.email {
            self.email = email;
        }
        if profile.phone.is_some() {
            self.phone = profile.phone;
        }
        if profile.photo_url.is_some() {
            self.photo_url = profile.photo_url;
        }
        if profile.exam_type.is_some() {
            self.exam_type = profile.exam_type;
        }
        if profile.exam_city.is_some() {
            self.exam_city = profile.exam_city;
        }
        if profile.exam_date.is_some() {
            self.exam_date = profile.exam_date;
        }
        if profile.exam_center_address.is_some() {
            self.exam_center_address = profile.exam_center_address;
        }
        if profile.admit_card_url.is_some() {
            self.admit_card_url = profile.admit_card_url;
        }
        if let Some(support_type) = profile.support_type {
            self.support_type = support_type;
        }
        if profile.hotel_price_range.is_some() {
            self.hotel_price_range = profile.hotel_price_range;
        }
        if let Some(travel_mode) = profile.travel_mode {
            self.travel_mode = travel_mode;
        }
        if let Some(travel_preference) = profile.travel_preference {
            self.travel_preference = travel_preference;
        }
        if profile.additional_info.is_some() {
            self.additional_info = profile.additional_info;
        }
        if let Some(guide_exams) = profile.guide_exams {
            self.guide_exams = guide_exams;
        }
        self.updated_at = Utc::now();
    }

    /// Folds one more review into the guide aggregate.
    pub fn record_review(&mut self, rating: i16) {
        self.rating_sum += i64::from(rating);
        self.review_count += 1;
        self.rating = average_rating(self.rating_sum, self.review_count);
        self.updated_at = Utc::now();
    }

    pub fn exam_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for exam in &self.guide_exams {
            if !exam.exam_name.is_empty() && !names.contains(&exam.exam_name) {
                names.push(exam.exam_name.clone());
            }
        }
        names
    }

    pub fn attempt_cities(&self) -> Vec<String> {
        let mut cities: Vec<String> = Vec::new();
        for attempt in self.guide_exams.iter().flat_map(|e| e.attempts.iter()) {
            if !attempt.city.is_empty() && !cities.contains(&attempt.city) {
                cities.push(attempt.city.clone());
            }
        }
        cities
    }

    /// Distance from `origin` to the closest exam attempt that has coordinates.
    pub fn nearest_attempt_meters(&self, origin: &GeoPoint) -> Option<f64> {
        self.guide_exams
            .iter()
            .flat_map(|e| e.attempts.iter())
            .filter_map(|a| a.coords.as_ref())
            .map(|point| origin.distance_meters(point))
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// `round(sum / count, 1)`, half away from zero.
pub fn average_rating(rating_sum: i64, review_count: i32) -> Decimal {
    if review_count <= 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(rating_sum) / Decimal::from(review_count))
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

/// Row shape of the `accounts` table.
#[derive(Debug, FromRow)]
pub struct AccountRecord {
    pub id: Uuid,
    pub external_uid: String,
    pub role: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub exam_type: Option<String>,
    pub exam_city: Option<String>,
    pub exam_date: Option<String>,
    pub exam_center_address: Option<String>,
    pub admit_card_url: Option<String>,
    pub support_type: Vec<String>,
    pub hotel_price_range: Option<String>,
    pub travel_mode: Vec<String>,
    pub travel_preference: Vec<String>,
    pub additional_info: Option<String>,
    pub guide_exams: sqlx::types::Json<Vec<GuideExam>>,
    pub rating: Decimal,
    pub rating_sum: i64,
    pub review_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRecord> for Account {
    type Error = CoreError;

    fn try_from(record: AccountRecord) -> Result<Self, Self::Error> {
        Ok(Account {
            id: record.id,
            external_uid: record.external_uid,
            role: record.role.parse()?,
            name: record.name,
            email: record.email,
            phone: record.phone,
            photo_url: record.photo_url,
            exam_type: record.exam_type,
            exam_city: record.exam_city,
            exam_date: record.exam_date,
            exam_center_address: record.exam_center_address,
            admit_card_url: record.admit_card_url,
            support_type: record.support_type,
            hotel_price_range: record.hotel_price_range,
            travel_mode: record.travel_mode,
            travel_preference: record.travel_preference,
            additional_info: record.additional_info,
            guide_exams: record.guide_exams.0,
            rating: record.rating,
            rating_sum: record.rating_sum,
            review_count: record.review_count,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Profile fields accepted on `POST /api/users`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub exam_type: Option<String>,
    pub exam_city: Option<String>,
    pub exam_date: Option<String>,
    pub exam_center_address: Option<String>,
    pub admit_card_url: Option<String>,
    pub support_type: Option<Vec<String>>,
    pub hotel_price_range: Option<String>,
    pub travel_mode: Option<Vec<String>>,
    pub travel_preference: Option<Vec<String>>,
    pub additional_info: Option<String>,
    pub guide_exams: Option<Vec<GuideExam>>,
}

impl ProfileFields {
    pub fn validate(&self) -> Result<(), CoreError> {
        for exam in self.guide_exams.iter().flatten() {
            if exam.exam_name.trim().is_empty() {
                return Err(CoreError::validation("Guide exam name is required"));
            }
            if exam.total_attempts < 1 {
                return Err(CoreError::validation("Guide exam total_attempts must be at least 1"));
            }
            for attempt in &exam.attempts {
                if attempt.city.trim().is_empty() {
                    return Err(CoreError::validation("Exam attempt city is required"));
                }
                if let Some(coords) = &attempt.coords {
                    coords.validate()?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GuideQuery {
    pub exam: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GuideSummary {
    pub id: Uuid,
    pub name: String,
    pub photo_url: Option<String>,
    pub exams: Vec<String>,
    pub cities: Vec<String>,
    pub achievements: Vec<String>,
    pub rating: Decimal,
    pub review_count: i32,
    /// Set only for proximity searches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
}

impl GuideSummary {
    pub fn with_distance(account: &Account, distance_meters: Option<f64>) -> Self {
        GuideSummary {
            distance_meters,
            ..GuideSummary::from(account)
        }
    }
}

impl From<&Account> for GuideSummary {
    fn from(account: &Account) -> Self {
        GuideSummary {
            id: account.id,
            name: account.name.clone(),
            photo_url: account.photo_url.clone(),
            exams: account.exam_names(),
            cities: account.attempt_cities(),
            achievements: account
                .guide_exams
                .iter()
                .flat_map(|e| e.attempts.iter())
                .filter_map(|a| a.achievement.clone())
                .collect(),
            rating: account.rating,
            review_count: account.review_count,
            distance_meters: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}
