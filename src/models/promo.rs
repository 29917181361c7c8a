use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;
use super::gateway_mode::GatewayMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromoKind {
    Percent,
    Amount,
}

impl PromoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PromoKind::Percent => "percent",
            PromoKind::Amount => "amount",
        }
    }
}

impl TryFrom<String> for PromoKind {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "percent" => Ok(PromoKind::Percent),
            "amount" => Ok(PromoKind::Amount),
            other => Err(ParseEnumError::new("promo kind", other)),
        }
    }
}

/// Local mirror of a gateway coupon + promotion code pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PromoCode {
    pub promo_code_id: String,
    pub coupon_id: String,
    pub code: String,
    pub name: Option<String>,
    #[sqlx(try_from = "String")]
    pub kind: PromoKind,
    pub percent_off: Option<f64>,
    pub amount_off: Option<i64>,
    pub currency: Option<String>,
    pub max_redemptions: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub auto_enable_at_start: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub single_use_per_user: bool,
    pub creator_slug: Option<String>,
    pub test_mode: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn mode(&self) -> GatewayMode {
        GatewayMode::from_test_flag(self.test_mode)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Scheduled and due for activation by the list sweep.
    pub fn due_for_auto_enable(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted()
            && self.auto_enable_at_start
            && self.starts_at.is_some_and(|starts| starts <= now)
    }

    pub fn matches_code(&self, code: &str) -> bool {
        self.code.trim().eq_ignore_ascii_case(code.trim())
    }
}

/// Marker recording that a steam id has redeemed a single-use promo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoRedemption {
    pub steam_id: String,
    pub promo_code_id: String,
    pub session_id: String,
    pub used_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promo() -> PromoCode {
        let now = Utc::now();
        PromoCode {
            promo_code_id: "promo_1".into(),
            coupon_id: "coupon_1".into(),
            code: "SUMMER".into(),
            name: None,
            kind: PromoKind::Percent,
            percent_off: Some(10.0),
            amount_off: None,
            currency: None,
            max_redemptions: None,
            starts_at: None,
            auto_enable_at_start: false,
            expires_at: None,
            active: true,
            single_use_per_user: false,
            creator_slug: None,
            test_mode: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn code_match_ignores_case_and_whitespace() {
        assert!(promo().matches_code(" summer "));
        assert!(!promo().matches_code("winter"));
    }

    #[test]
    fn auto_enable_requires_flag_and_start() {
        let now = Utc::now();
        let mut p = promo();
        p.starts_at = Some(now - Duration::minutes(1));
        assert!(!p.due_for_auto_enable(now));

        p.auto_enable_at_start = true;
        assert!(p.due_for_auto_enable(now));

        p.starts_at = Some(now + Duration::hours(1));
        assert!(!p.due_for_auto_enable(now));

        p.starts_at = Some(now - Duration::minutes(1));
        p.deleted_at = Some(now);
        assert!(!p.due_for_auto_enable(now));
    }
}
