use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const LEDGER_PURCHASE_CREDITS: &str = "purchase_credits";
pub const REWARD_SOURCE_PURCHASE: &str = "purchase";

/// Signed credits delta with a type tag and traceability metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditLedgerEntry {
    pub id: Uuid,
    pub steam_id: String,
    pub delta: i64,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CreditLedgerEntry {
    pub fn purchase(steam_id: &str, delta: i64, session_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            steam_id: steam_id.to_string(),
            delta,
            entry_type: LEDGER_PURCHASE_CREDITS.to_string(),
            meta: serde_json::json!({ "sessionId": session_id }),
            created_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.meta.get("sessionId").and_then(|v| v.as_str())
    }
}

/// One granted unit of a consumable. Quantity N is stored as N rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConsumableReward {
    pub id: Uuid,
    pub steam_id: String,
    #[serde(rename = "type")]
    pub reward_type: String,
    pub granted_at: DateTime<Utc>,
    pub source: String,
    pub session_id: Option<String>,
}

impl ConsumableReward {
    pub fn purchased(steam_id: &str, reward_type: &str, session_id: &str, granted_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            steam_id: steam_id.to_string(),
            reward_type: reward_type.to_string(),
            granted_at,
            source: REWARD_SOURCE_PURCHASE.to_string(),
            session_id: Some(session_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSummary {
    pub steam_id: String,
    pub pro_until: Option<DateTime<Utc>>,
    pub is_pro: bool,
    pub credits: i64,
    pub spins: i64,
    pub consumables: BTreeMap<String, i64>,
}
