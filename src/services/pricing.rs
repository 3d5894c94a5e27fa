// Session pricing: fee split between platform and guide
// Totals are computed once at booking and stored on the session; later changes to the
// fee rate never rewrite historical sessions.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::CoreError;
use crate::models::session::Preference;

/// Platform commission, 5%.
pub fn platform_fee_rate() -> Decimal {
    Decimal::new(5, 2)
}

/// Minor units per major unit for the configured currency (paise per rupee).
// TODO: derive from the currency code once a non two-decimal currency is enabled
const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Decimal places money is stored with (`NUMERIC(12, 2)`).
const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub total_amount: Decimal,
    pub platform_fee: Decimal,
    pub guide_amount: Decimal,
}

impl FeeSplit {
    /// `total = Σ price`, `fee = round(total * 0.05, 2)` half-up, `guide = total - fee`.
    pub fn from_preferences(preferences: &[Preference]) -> Result<Self, CoreError> {
        if preferences.is_empty() {
            return Err(CoreError::validation("At least one session preference is required"));
        }
        if let Some(bad) = preferences.iter().find(|p| p.price.is_sign_negative()) {
            return Err(CoreError::validation(format!(
                "Preference '{}' has a negative price",
                bad.kind
            )));
        }
        if let Some(bad) = preferences.iter().find(|p| p.price.normalize().scale() > MONEY_SCALE) {
            return Err(CoreError::validation(format!(
                "Preference '{}' price has more than {} decimal places",
                bad.kind, MONEY_SCALE
            )));
        }

        let total_amount: Decimal = preferences.iter().map(|p| p.price).sum();
        Ok(Self::from_total(total_amount))
    }

    pub fn from_total(total_amount: Decimal) -> Self {
        let platform_fee = round_money(total_amount * platform_fee_rate());
        Self {
            total_amount,
            platform_fee,
            guide_amount: total_amount - platform_fee,
        }
    }
}

/// Round half away from zero at 2 decimals.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts a display amount into the gateway's integer minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, CoreError> {
    round_money(amount * Decimal::from(MINOR_UNITS_PER_MAJOR))
        .trunc()
        .to_i64()
        .ok_or_else(|| CoreError::validation(format!("Amount {} is out of range", amount)))
}
