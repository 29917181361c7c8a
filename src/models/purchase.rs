use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseType {
    Pro,
    Credits,
    Spins,
    Consumable,
    Cart,
}

impl PurchaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseType::Pro => "pro",
            PurchaseType::Credits => "credits",
            PurchaseType::Spins => "spins",
            PurchaseType::Consumable => "consumable",
            PurchaseType::Cart => "cart",
        }
    }
}

impl fmt::Display for PurchaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pro" => Ok(PurchaseType::Pro),
            "credits" => Ok(PurchaseType::Credits),
            "spins" => Ok(PurchaseType::Spins),
            "consumable" => Ok(PurchaseType::Consumable),
            "cart" => Ok(PurchaseType::Cart),
            other => Err(ParseEnumError::new("purchase type", other)),
        }
    }
}

impl TryFrom<String> for PurchaseType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What triggered a fulfillment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseSource {
    Webhook,
    ManualVerification,
}

impl PurchaseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseSource::Webhook => "webhook",
            PurchaseSource::ManualVerification => "manual_verification",
        }
    }
}

impl TryFrom<String> for PurchaseSource {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "webhook" => Ok(PurchaseSource::Webhook),
            "manual_verification" => Ok(PurchaseSource::ManualVerification),
            other => Err(ParseEnumError::new("purchase source", other)),
        }
    }
}

/// Purchase history row. `session_id` is unique and doubles as the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub session_id: String,
    pub steam_id: String,
    #[serde(rename = "type")]
    #[sqlx(try_from = "String")]
    pub purchase_type: PurchaseType,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
    pub test_mode: bool,
    #[sqlx(try_from = "String")]
    pub source: PurchaseSource,
    pub fulfilled: bool,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub details: serde_json::Value,
    /// Grants of this purchase already applied, in order. Reruns resume here.
    pub grants_applied: i32,
    pub hidden: bool,
    pub hidden_at: Option<DateTime<Utc>>,
    pub discord_notified: bool,
    pub discord_notified_at: Option<DateTime<Utc>>,
    pub discord_notify_error: Option<String>,
    pub discord_notify_attempts: i32,
    pub discord_notify_last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PurchaseRecord {
    /// A fresh, unfulfilled claim row.
    pub fn claim(
        session_id: &str,
        steam_id: &str,
        purchase_type: PurchaseType,
        amount_minor: i64,
        currency: &str,
        test_mode: bool,
        source: PurchaseSource,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            steam_id: steam_id.to_string(),
            purchase_type,
            amount_minor,
            currency: currency.to_string(),
            payment_intent_id: None,
            customer_id: None,
            test_mode,
            source,
            fulfilled: false,
            fulfilled_at: None,
            details: serde_json::json!({}),
            grants_applied: 0,
            hidden: false,
            hidden_at: None,
            discord_notified: false,
            discord_notified_at: None,
            discord_notify_error: None,
            discord_notify_attempts: 0,
            discord_notify_last_attempt_at: None,
            created_at: Utc::now(),
        }
    }

    /// Amount in major currency units, as shown to admins and in notifications.
    pub fn amount_major(&self) -> f64 {
        self.amount_minor as f64 / 100.0
    }

    pub fn matches_discord(&self, filter: DiscordFilter) -> bool {
        match filter {
            DiscordFilter::Sent => self.discord_notified,
            DiscordFilter::Unsent => !self.discord_notified,
            DiscordFilter::Errored => !self.discord_notified && self.discord_notify_error.is_some(),
        }
    }
}

/// Outcome of a Discord delivery attempt recorded on a purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscordDelivery {
    pub attempted_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscordFilter {
    Unsent,
    Sent,
    Errored,
}

#[derive(Debug, Clone, Default)]
pub struct PurchaseFilter {
    pub steam_id: Option<String>,
    pub include_hidden: bool,
    pub discord: Option<DiscordFilter>,
    pub limit: i64,
}

impl PurchaseFilter {
    pub const DEFAULT_LIMIT: i64 = 1000;

    pub fn matches(&self, record: &PurchaseRecord) -> bool {
        if !self.include_hidden && record.hidden {
            return false;
        }
        if let Some(steam_id) = &self.steam_id {
            if &record.steam_id != steam_id {
                return false;
            }
        }
        match self.discord {
            Some(filter) => record.matches_discord(filter),
            None => true,
        }
    }
}

/// A grant that failed after the purchase was claimed, kept for manual re-fulfillment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FailedPurchase {
    pub id: Uuid,
    pub session_id: String,
    pub steam_id: String,
    #[serde(rename = "type")]
    #[sqlx(try_from = "String")]
    pub purchase_type: PurchaseType,
    pub error: String,
    pub amount_minor: i64,
    pub currency: String,
    pub test_mode: bool,
    pub created_at: DateTime<Utc>,
}
