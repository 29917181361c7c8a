use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::db::KeyValueStore;
use crate::db::repositories::kv_repository::{CREDITS_BANNED_KEY, CREDITS_TIMEOUTS_KEY};
use crate::error::{AppError, AppResult};
use crate::utils::sanitize::is_valid_steam_id;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreditsRestriction {
    pub banned: bool,
    pub timeout_until: Option<DateTime<Utc>>,
}

impl CreditsRestriction {
    pub fn timeout_active(&self, now: DateTime<Utc>) -> bool {
        self.timeout_until.is_some_and(|until| until > now)
    }

    /// `Forbidden` when credits may not be bought right now.
    pub fn ensure_allowed(&self, now: DateTime<Utc>) -> AppResult<()> {
        if self.banned {
            return Err(AppError::Forbidden("Credits access is banned for this user".to_string()));
        }
        if let Some(until) = self.timeout_until.filter(|_| self.timeout_active(now)) {
            return Err(AppError::Forbidden(format!(
                "Credits access is temporarily restricted for this user until {}",
                until.to_rfc3339()
            )));
        }
        Ok(())
    }
}

/// Ban list and timeout map as maintained by the moderation tools.
/// Malformed stored values read as "no restriction".
pub async fn credits_restriction(kv: &dyn KeyValueStore, steam_id: &str) -> AppResult<CreditsRestriction> {
    if !is_valid_steam_id(steam_id) {
        return Ok(CreditsRestriction::default());
    }

    let banned = kv
        .get(CREDITS_BANNED_KEY)
        .await?
        .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .is_some_and(|ids| ids.iter().any(|id| id == steam_id));

    let timeout_until = kv
        .get(CREDITS_TIMEOUTS_KEY)
        .await?
        .and_then(|v| serde_json::from_value::<HashMap<String, String>>(v).ok())
        .and_then(|map| map.get(steam_id).cloned())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(CreditsRestriction { banned, timeout_until })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::Duration;
    use serde_json::json;

    const STEAM_ID: &str = "76561198000000001";

    #[tokio::test]
    async fn banned_user_is_refused() {
        let store = MemoryStore::new();
        store.set(CREDITS_BANNED_KEY, json!([STEAM_ID])).await.unwrap();

        let restriction = credits_restriction(&store, STEAM_ID).await.unwrap();
        let err = restriction.ensure_allowed(Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(m) if m == "Credits access is banned for this user"));
    }

    #[tokio::test]
    async fn only_active_timeouts_apply() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .set(
                CREDITS_TIMEOUTS_KEY,
                json!({
                    STEAM_ID: (now + Duration::hours(1)).to_rfc3339(),
                    "76561198000000002": (now - Duration::hours(1)).to_rfc3339(),
                }),
            )
            .await
            .unwrap();

        let active = credits_restriction(&store, STEAM_ID).await.unwrap();
        assert!(active.ensure_allowed(now).is_err());

        let expired = credits_restriction(&store, "76561198000000002").await.unwrap();
        assert!(expired.ensure_allowed(now).is_ok());
    }

    #[tokio::test]
    async fn malformed_values_are_ignored() {
        let store = MemoryStore::new();
        store.set(CREDITS_BANNED_KEY, json!("nope")).await.unwrap();
        store.set(CREDITS_TIMEOUTS_KEY, json!({ STEAM_ID: "soon" })).await.unwrap();

        let restriction = credits_restriction(&store, STEAM_ID).await.unwrap();
        assert_eq!(restriction, CreditsRestriction::default());
    }
}
