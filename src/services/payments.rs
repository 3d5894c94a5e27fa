// Payment orchestration against the external gateway.
// Gateway calls are never retried here: a duplicated order or refund costs real money,
// so a failed call surfaces to the client and the client decides.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::pricing::to_minor_units;
use crate::error::CoreError;
use crate::models::payment::{OrderDetails, VerifyPaymentRequest};
use crate::models::{Account, PaymentStatus, Session, SessionStatus};
use crate::razorpay_client::{OrderRequest, PaymentGateway, RefundRequest};
use crate::store::{apply_transition, SessionStore};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEX_LEN: usize = 64;

#[derive(Debug)]
pub enum VerificationOutcome {
    Verified(Session),
    /// Signature did not match; the session is now marked `failed`.
    Rejected(Session),
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    sessions: Arc<dyn SessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    key_secret: String,
    currency: String,
}

impl PaymentOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        key_secret: String,
        currency: String,
    ) -> Self {
        Self {
            sessions,
            gateway,
            key_secret,
            currency,
        }
    }

    pub async fn create_order(&self, session_id: Uuid, actor: &Account) -> Result<OrderDetails, CoreError> {
        let session = self.load(session_id).await?;
        if !session.is_user(actor.id) {
            return Err(CoreError::authorization("Only the session's user can pay for it"));
        }
        ensure_payable(&session)?;

        let amount_minor = to_minor_units(session.total_amount)?;
        let notes = HashMap::from([
            ("session_id".to_string(), session.id.to_string()),
            ("user_id".to_string(), session.user_id.to_string()),
            ("guide_id".to_string(), session.guide_id.to_string()),
        ]);
        let order = self
            .gateway
            .create_order(&OrderRequest {
                amount: amount_minor,
                currency: self.currency.clone(),
                receipt: format!("session_{}", session.id),
                notes,
            })
            .await?;

        if order.amount != amount_minor {
            tracing::warn!(
                session_id = %session_id,
                order_id = %order.id,
                requested = amount_minor,
                accepted = order.amount,
                "gateway order amount differs from session total"
            );
        }

        let order_id = order.id.clone();
        apply_transition(self.sessions.as_ref(), session_id, |session| {
            ensure_payable(session)?;
            session.order_id = Some(order_id.clone());
            Ok(())
        })
        .await?;

        tracing::info!(
            session_id = %session_id,
            order_id = %order.id,
            amount_minor,
            gateway_status = %order.status,
            "payment order created"
        );

        Ok(OrderDetails {
            session_id,
            order_id: order.id,
            amount: session.total_amount,
            amount_minor,
            currency: self.currency.clone(),
            key_id: self.gateway.key_id().to_string(),
        })
    }

    pub async fn verify_payment(
        &self,
        actor: &Account,
        request: &VerifyPaymentRequest,
    ) -> Result<VerificationOutcome, CoreError> {
        if request.order_id.trim().is_empty() || request.payment_id.trim().is_empty() {
            return Err(CoreError::validation("order_id and payment_id are required"));
        }

        let (session, verified) = apply_transition(self.sessions.as_ref(), request.session_id, |session| {
            if !session.is_user(actor.id) {
                return Err(CoreError::authorization("Only the session's user can confirm payment"));
            }
            if matches!(session.payment_status, PaymentStatus::Completed | PaymentStatus::Refunded) {
                return Err(CoreError::conflict(format!(
                    "Payment is already {}",
                    session.payment_status
                )));
            }

            let order_matches = session.order_id.as_deref() == Some(request.order_id.as_str());
            let verified = order_matches
                && signature_matches(
                    &self.key_secret,
                    &request.order_id,
                    &request.payment_id,
                    &request.signature,
                );

            if verified {
                session.payment_status = PaymentStatus::Completed;
                session.payment_id = Some(request.payment_id.clone());
                session.paid_at = Some(Utc::now());
            } else {
                session.payment_status = PaymentStatus::Failed;
            }
            Ok(verified)
        })
        .await?;

        if verified {
            tracing::info!(
                session_id = %session.id,
                payment_id = %request.payment_id,
                "✅ payment verified"
            );
            Ok(VerificationOutcome::Verified(session))
        } else {
            tracing::warn!(
                session_id = %session.id,
                order_id = %request.order_id,
                "payment signature rejected"
            );
            Ok(VerificationOutcome::Rejected(session))
        }
    }

    /// Full refund. Either participant may ask while the session has not completed.
    ///
    /// The refund is claimed on the session before the gateway is called, so concurrent
    /// requests produce exactly one gateway refund. The claim is released if the gateway
    /// call fails.
    pub async fn refund(
        &self,
        session_id: Uuid,
        actor: &Account,
        reason: Option<String>,
    ) -> Result<Session, CoreError> {
        let claimed_at = Utc::now();
        let (session, payment_id) = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if session.participant(actor.id).is_none() {
                return Err(CoreError::authorization("You are not a participant of this session"));
            }
            let payment_id = ensure_refundable(session)?;
            if session.refund_in_flight(claimed_at) {
                return Err(CoreError::conflict("A refund is already in progress for this session"));
            }
            if let Some(stale) = session.refund_requested_at {
                tracing::warn!(session_id = %session.id, claimed_at = %stale, "taking over stale refund claim");
            }
            session.refund_requested_at = Some(claimed_at);
            Ok(payment_id)
        })
        .await?;

        let mut notes = HashMap::from([
            ("session_id".to_string(), session.id.to_string()),
            ("requested_by".to_string(), actor.id.to_string()),
        ]);
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            notes.insert("reason".to_string(), reason);
        }

        let amount_minor = to_minor_units(session.total_amount)?;
        let refund = match self
            .gateway
            .refund(&payment_id, &RefundRequest { amount: amount_minor, notes })
            .await
        {
            Ok(refund) => refund,
            Err(e) => {
                self.release_refund_claim(session_id, claimed_at).await;
                return Err(e.into());
            }
        };

        if refund.amount != amount_minor {
            tracing::warn!(
                session_id = %session_id,
                refund_id = %refund.id,
                requested = amount_minor,
                refunded = refund.amount,
                "gateway refunded a different amount"
            );
        }

        let refund_id = refund.id.clone();
        let result = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if session.payment_status == PaymentStatus::Refunded {
                return Err(CoreError::conflict("Payment is already refunded"));
            }
            session.payment_status = PaymentStatus::Refunded;
            session.status = SessionStatus::Cancelled;
            session.refund_id = Some(refund_id.clone());
            session.refund_requested_at = None;
            Ok(())
        })
        .await;

        match result {
            Ok((session, ())) => {
                tracing::info!(
                    session_id = %session.id,
                    refund_id = %refund.id,
                    amount_minor = refund.amount,
                    gateway_status = %refund.status,
                    "payment refunded"
                );
                Ok(session)
            }
            Err(e) => {
                // money has moved at the gateway but the ledger did not follow
                tracing::error!(
                    session_id = %session_id,
                    refund_id = %refund.id,
                    error = %e,
                    "refund issued but session could not be updated"
                );
                Err(e)
            }
        }
    }

    async fn release_refund_claim(&self, session_id: Uuid, claimed_at: DateTime<Utc>) {
        let released = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if session.refund_requested_at == Some(claimed_at) {
                session.refund_requested_at = None;
            }
            Ok(())
        })
        .await;

        if let Err(e) = released {
            tracing::error!(session_id = %session_id, error = %e, "could not release refund claim");
        }
    }

    async fn load(&self, session_id: Uuid) -> Result<Session, CoreError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Session not found"))
    }
}

fn ensure_payable(session: &Session) -> Result<(), CoreError> {
    if matches!(session.payment_status, PaymentStatus::Completed | PaymentStatus::Refunded) {
        return Err(CoreError::conflict(format!("Payment is already {}", session.payment_status)));
    }
    if session.status.is_terminal() {
        return Err(CoreError::invalid_state(format!(
            "Cannot pay for a session that is {}",
            session.status
        )));
    }
    Ok(())
}

fn ensure_refundable(session: &Session) -> Result<String, CoreError> {
    if session.payment_status != PaymentStatus::Completed {
        return Err(CoreError::conflict(format!(
            "Cannot refund a payment that is {}",
            session.payment_status
        )));
    }
    let payment_id = session
        .payment_id
        .clone()
        .ok_or_else(|| CoreError::validation("Session has no payment to refund"))?;
    if !matches!(session.status, SessionStatus::Booked | SessionStatus::InProgress) {
        return Err(CoreError::invalid_state(format!(
            "Cannot refund a session that is {}",
            session.status
        )));
    }
    Ok(payment_id)
}

fn keyed_mac(key_secret: &str, order_id: &str, payment_id: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key_secret.as_bytes()).ok()?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Some(mac)
}

/// Hex HMAC-SHA256 of `"<order_id>|<payment_id>"`, the value the gateway sends back.
pub fn sign(key_secret: &str, order_id: &str, payment_id: &str) -> String {
    keyed_mac(key_secret, order_id, payment_id)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Constant-time comparison of the supplied signature, which must be exactly the
/// 64 lowercase hex characters the gateway produces.
pub fn signature_matches(key_secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let well_formed = signature.len() == SIGNATURE_HEX_LEN
        && signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !well_formed {
        return false;
    }
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    keyed_mac(key_secret, order_id, payment_id).map_or(false, |mac| mac.verify_slice(&provided).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountRole;
    use crate::services::test_support::{account, booked_session, FakeGateway, KEY_SECRET};
    use crate::store::MemorySessionStore;
    use rust_decimal::Decimal;
    use std::sync::atomic::Ordering;

    struct Fixture {
        payments: PaymentOrchestrator,
        sessions: Arc<MemorySessionStore>,
        gateway: Arc<FakeGateway>,
        guide: Account,
        user: Account,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let sessions = Arc::new(MemorySessionStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let guide = account(AccountRole::Guide);
        let user = account(AccountRole::User);
        let session = booked_session(guide.id, user.id);
        sessions.insert(&session).await.unwrap();

        let payments = PaymentOrchestrator::new(
            sessions.clone(),
            gateway.clone(),
            KEY_SECRET.to_string(),
            "INR".to_string(),
        );
        Fixture { payments, sessions, gateway, guide, user, session }
    }

    fn verify_request(session_id: Uuid, order_id: &str, payment_id: &str, signature: String) -> VerifyPaymentRequest {
        VerifyPaymentRequest {
            session_id,
            order_id: order_id.to_string(),
            payment_id: payment_id.to_string(),
            signature,
        }
    }

    async fn pay(f: &Fixture, payment_id: &str) {
        let order = f.payments.create_order(f.session.id, &f.user).await.unwrap();
        let valid = verify_request(
            f.session.id,
            &order.order_id,
            payment_id,
            sign(KEY_SECRET, &order.order_id, payment_id),
        );
        assert!(matches!(
            f.payments.verify_payment(&f.user, &valid).await.unwrap(),
            VerificationOutcome::Verified(_)
        ));
    }

    #[test]
    fn test_signature_roundtrip_and_forgery() {
        let good = sign(KEY_SECRET, "order_1", "pay_1");
        assert_eq!(good.len(), 64);
        assert!(signature_matches(KEY_SECRET, "order_1", "pay_1", &good));
        assert!(!signature_matches(KEY_SECRET, "order_1", "pay_2", &good));
        assert!(!signature_matches("other", "order_1", "pay_1", &good));
        assert!(!signature_matches(KEY_SECRET, "order_1", "pay_1", "not-hex"));
    }

    #[test]
    fn test_signature_must_be_exact_lowercase_hex() {
        let good = sign(KEY_SECRET, "order_1", "pay_1");
        assert!(!signature_matches(KEY_SECRET, "order_1", "pay_1", &good.to_uppercase()));
        assert!(!signature_matches(KEY_SECRET, "order_1", "pay_1", &format!(" {}", good)));
        assert!(!signature_matches(KEY_SECRET, "order_1", "pay_1", &format!("{}\n", good)));
        assert!(!signature_matches(KEY_SECRET, "order_1", "pay_1", &good[..62]));
    }

    #[tokio::test]
    async fn test_create_order_uses_minor_units() {
        let f = fixture().await;

        assert!(matches!(
            f.payments.create_order(f.session.id, &f.guide).await,
            Err(CoreError::Authorization(_))
        ));

        let order = f.payments.create_order(f.session.id, &f.user).await.unwrap();
        assert_eq!(order.amount, Decimal::from(1500));
        assert_eq!(order.amount_minor, 150_000);
        assert_eq!(order.currency, "INR");
        assert_eq!(order.key_id, "rzp_test_key");

        let sent = f.gateway.orders.lock().unwrap()[0].clone();
        assert_eq!(sent.amount, 150_000);
        assert_eq!(sent.receipt, format!("session_{}", f.session.id));
        assert_eq!(sent.notes["guide_id"], f.guide.id.to_string());

        let stored = f.sessions.get(f.session.id).await.unwrap().unwrap();
        assert_eq!(stored.order_id.as_deref(), Some(order.order_id.as_str()));
    }

    #[tokio::test]
    async fn test_gateway_failure_is_external_service_error() {
        let f = fixture().await;
        f.gateway.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            f.payments.create_order(f.session.id, &f.user).await,
            Err(CoreError::ExternalService { .. })
        ));
        assert!(f.sessions.get(f.session.id).await.unwrap().unwrap().order_id.is_none());
    }

    #[tokio::test]
    async fn test_forged_signature_marks_failed() {
        let f = fixture().await;
        let order = f.payments.create_order(f.session.id, &f.user).await.unwrap();

        let forged = verify_request(f.session.id, &order.order_id, "pay_1", sign("wrong", &order.order_id, "pay_1"));
        match f.payments.verify_payment(&f.user, &forged).await.unwrap() {
            VerificationOutcome::Rejected(session) => {
                assert_eq!(session.payment_status, PaymentStatus::Failed);
                assert!(session.payment_id.is_none());
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        let valid = verify_request(f.session.id, &order.order_id, "pay_1", sign(KEY_SECRET, &order.order_id, "pay_1"));
        match f.payments.verify_payment(&f.user, &valid).await.unwrap() {
            VerificationOutcome::Verified(session) => {
                assert_eq!(session.payment_status, PaymentStatus::Completed);
                assert_eq!(session.payment_id.as_deref(), Some("pay_1"));
                assert!(session.paid_at.is_some());
            }
            other => panic!("expected verification, got {:?}", other),
        }

        // a paid session is never downgraded by a later bad callback
        assert!(matches!(
            f.payments.verify_payment(&f.user, &forged).await,
            Err(CoreError::Conflict(_))
        ));
        assert!(matches!(
            f.payments.create_order(f.session.id, &f.user).await,
            Err(CoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_signature_for_other_order_rejected() {
        let f = fixture().await;
        f.payments.create_order(f.session.id, &f.user).await.unwrap();

        let request = verify_request(f.session.id, "order_other", "pay_1", sign(KEY_SECRET, "order_other", "pay_1"));
        assert!(matches!(
            f.payments.verify_payment(&f.user, &request).await.unwrap(),
            VerificationOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_refund_rules() {
        let f = fixture().await;

        // nothing paid yet
        assert!(matches!(
            f.payments.refund(f.session.id, &f.user, None).await,
            Err(CoreError::Conflict(_))
        ));

        let order = f.payments.create_order(f.session.id, &f.user).await.unwrap();
        let valid = verify_request(f.session.id, &order.order_id, "pay_9", sign(KEY_SECRET, &order.order_id, "pay_9"));
        f.payments.verify_payment(&f.user, &valid).await.unwrap();

        let stranger = account(AccountRole::User);
        assert!(matches!(
            f.payments.refund(f.session.id, &stranger, None).await,
            Err(CoreError::Authorization(_))
        ));

        let refunded = f
            .payments
            .refund(f.session.id, &f.guide, Some("guide unavailable".into()))
            .await
            .unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(refunded.status, SessionStatus::Cancelled);
        assert_eq!(refunded.refund_id.as_deref(), Some("rfnd_1"));

        let (payment_id, request) = f.gateway.refunds.lock().unwrap()[0].clone();
        assert_eq!(payment_id, "pay_9");
        assert_eq!(request.amount, 150_000);

        assert!(matches!(
            f.payments.refund(f.session.id, &f.user, None).await,
            Err(CoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_completed_session_not_refundable() {
        let f = fixture().await;
        let mut session = booked_session(f.guide.id, f.user.id);
        session.status = SessionStatus::Completed;
        session.payment_status = PaymentStatus::Completed;
        session.payment_id = Some("pay_done".into());
        f.sessions.insert(&session).await.unwrap();

        assert!(matches!(
            f.payments.refund(session.id, &f.user, None).await,
            Err(CoreError::InvalidState(_))
        ));
        assert!(f.gateway.refunds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_started_session_can_still_be_paid() {
        let f = fixture().await;
        let mut started = f.sessions.get(f.session.id).await.unwrap().unwrap();
        started.status = SessionStatus::InProgress;
        assert!(f.sessions.compare_and_swap(&started, started.version).await.unwrap());

        pay(&f, "pay_late").await;
        let stored = f.sessions.get(f.session.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
        assert_eq!(stored.status, SessionStatus::InProgress);
    }

    #[tokio::test]
    async fn test_finished_session_cannot_be_paid() {
        let f = fixture().await;
        let mut session = booked_session(f.guide.id, f.user.id);
        session.status = SessionStatus::Completed;
        f.sessions.insert(&session).await.unwrap();

        assert!(matches!(
            f.payments.create_order(session.id, &f.user).await,
            Err(CoreError::InvalidState(_))
        ));
        assert!(f.gateway.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_refunds_reach_gateway_once() {
        let f = fixture().await;
        pay(&f, "pay_once").await;
        f.gateway.refund_delay_ms.store(50, Ordering::SeqCst);

        let (by_user, by_guide) = tokio::join!(
            f.payments.refund(f.session.id, &f.user, None),
            f.payments.refund(f.session.id, &f.guide, None),
        );

        let outcomes = [by_user, by_guide];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(CoreError::Conflict(_))))
                .count(),
            1
        );
        assert_eq!(f.gateway.refunds.lock().unwrap().len(), 1);

        let stored = f.sessions.get(f.session.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert_eq!(stored.refund_id.as_deref(), Some("rfnd_1"));
        assert!(stored.refund_requested_at.is_none());
    }

    #[tokio::test]
    async fn test_failed_gateway_refund_releases_claim() {
        let f = fixture().await;
        pay(&f, "pay_retry").await;

        f.gateway.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            f.payments.refund(f.session.id, &f.user, None).await,
            Err(CoreError::ExternalService { .. })
        ));
        let stored = f.sessions.get(f.session.id).await.unwrap().unwrap();
        assert!(stored.refund_requested_at.is_none());
        assert_eq!(stored.payment_status, PaymentStatus::Completed);

        f.gateway.fail.store(false, Ordering::SeqCst);
        let refunded = f.payments.refund(f.session.id, &f.user, None).await.unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_stale_refund_claim_is_taken_over() {
        let f = fixture().await;
        pay(&f, "pay_stale").await;

        let mut stuck = f.sessions.get(f.session.id).await.unwrap().unwrap();
        stuck.refund_requested_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(f.sessions.compare_and_swap(&stuck, stuck.version).await.unwrap());

        let refunded = f.payments.refund(f.session.id, &f.user, None).await.unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(f.gateway.refunds.lock().unwrap().len(), 1);
    }
}
