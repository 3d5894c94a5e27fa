// Settlement: books the guide's share of a paid, completed session.
// The platform holds the full payment until the session completes; settling only flips
// the transfer flag, the split itself was fixed at booking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{PaymentStatus, Session, SessionStatus};
use crate::store::{apply_transition, SessionStore};

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub session_id: Uuid,
    pub guide_id: Uuid,
    pub guide_amount: Decimal,
    pub platform_fee: Decimal,
    pub transferred_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepSummary {
    pub settled: Vec<SettlementReceipt>,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SettlementEngine {
    sessions: Arc<dyn SessionStore>,
}

impl SettlementEngine {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    pub async fn settle(&self, session_id: Uuid) -> Result<(Session, SettlementReceipt), CoreError> {
        let (session, receipt) = apply_transition(self.sessions.as_ref(), session_id, |session| {
            if session.payment_status != PaymentStatus::Completed {
                return Err(CoreError::invalid_state(format!(
                    "Cannot settle a session whose payment is {}",
                    session.payment_status
                )));
            }
            if session.status != SessionStatus::Completed {
                return Err(CoreError::invalid_state(format!(
                    "Cannot settle a session that is {}",
                    session.status
                )));
            }
            if session.payment_transferred {
                return Err(CoreError::conflict("Payment already transferred to guide"));
            }

            let now = Utc::now();
            session.payment_transferred = true;
            session.transferred_at = Some(now);

            Ok(SettlementReceipt {
                session_id: session.id,
                guide_id: session.guide_id,
                guide_amount: session.guide_amount,
                platform_fee: session.platform_fee,
                transferred_at: now,
            })
        })
        .await?;

        tracing::info!(
            session_id = %receipt.session_id,
            guide_id = %receipt.guide_id,
            guide_amount = %receipt.guide_amount,
            platform_fee = %receipt.platform_fee,
            "💸 Guide payout recorded"
        );
        Ok((session, receipt))
    }

    /// Settles every completed, paid, untransferred session. Individual failures are
    /// logged and counted so one bad record cannot stall the rest.
    pub async fn settle_pending(&self, limit: i64) -> Result<SweepSummary, CoreError> {
        let pending = self.sessions.list_awaiting_settlement(limit).await?;
        let mut summary = SweepSummary::default();

        for session in pending {
            match self.settle(session.id).await {
                Ok((_, receipt)) => summary.settled.push(receipt),
                // someone else got there first
                Err(CoreError::Conflict(_)) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "settlement sweep failed for session");
                    summary.failed += 1;
                }
            }
        }

        if !summary.settled.is_empty() || summary.failed > 0 {
            tracing::info!(
                settled = summary.settled.len(),
                failed = summary.failed,
                "settlement sweep finished"
            );
        }
        Ok(summary)
    }
}
