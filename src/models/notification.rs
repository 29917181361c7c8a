use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserNotification {
    pub id: Uuid,
    pub steam_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl UserNotification {
    pub fn new(steam_id: &str, kind: &str, title: String, message: String, meta: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            steam_id: steam_id.to_string(),
            kind: kind.to_string(),
            title,
            message,
            meta,
            created_at: Utc::now(),
        }
    }
}

/// Purchase-side analytics row, attributed to a creator when the promo carries a slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub steam_id: String,
    pub event: String,
    pub session_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub creator_slug: Option<String>,
    pub promo_code: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
