// src/identity.rs
//! Bearer token → external uid → internal account.
//!
//! Token issuance lives with the external identity provider; this module only checks
//! signatures and maps the `sub` claim onto an [`Account`].

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CoreError;
use crate::models::account::ProfileFields;
use crate::models::Account;
use crate::store::AccountStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the external uid carried by a valid token.
    async fn verify_token(&self, token: &str) -> Result<String, CoreError>;
}

pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn hs256(secret: &[u8], issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256, issuer, audience)
    }

    pub fn rs256_pem(pem: &[u8], issuer: Option<&str>, audience: Option<&str>) -> Result<Self, CoreError> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| CoreError::validation(format!("Invalid RSA public key: {}", e)))?;
        Ok(Self::with_key(key, Algorithm::RS256, issuer, audience))
    }

    fn with_key(
        decoding_key: DecodingKey,
        algorithm: Algorithm,
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Self {
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        Self { decoding_key, validation }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify_token(&self, token: &str) -> Result<String, CoreError> {
        let data = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            CoreError::Authentication("Invalid or expired token".to_string())
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(CoreError::Authentication("Token has no subject".to_string()));
        }
        Ok(data.claims.sub)
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    verifier: Arc<dyn TokenVerifier>,
    accounts: Arc<dyn AccountStore>,
}

impl IdentityResolver {
    pub fn new(verifier: Arc<dyn TokenVerifier>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { verifier, accounts }
    }

    pub async fn verify_token(&self, token: &str) -> Result<String, CoreError> {
        self.verifier.verify_token(token).await
    }

    pub async fn find_account(&self, external_uid: &str) -> Result<Option<Account>, CoreError> {
        self.accounts.find_by_external_uid(external_uid).await
    }

    /// Creates the profile on first call and merges the supplied fields afterwards.
    pub async fn upsert_profile(&self, external_uid: &str, profile: ProfileFields) -> Result<Account, CoreError> {
        profile.validate()?;
        if self.accounts.find_by_external_uid(external_uid).await?.is_none() {
            let missing_name = profile.name.as_deref().map_or(true, |n| n.trim().is_empty());
            let missing_email = profile.email.as_deref().map_or(true, |e| e.trim().is_empty());
            if missing_name || missing_email {
                return Err(CoreError::validation("Name and email are required"));
            }
        }

        let (mut account, created) = self.accounts.create_if_absent(external_uid, profile.clone()).await?;
        if created {
            tracing::info!(account_id = %account.id, role = %account.role, "account created");
            return Ok(account);
        }

        account.apply_profile(profile);
        self.accounts.save_profile(&account).await?;
        tracing::debug!(account_id = %account.id, "profile updated");
        Ok(account)
    }
}
