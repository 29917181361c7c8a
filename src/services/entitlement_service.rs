use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use crate::config::AppSettings;
use crate::db::Stores;
use crate::error::{AppError, AppResult};
use crate::models::EntitlementSummary;
use crate::utils::sanitize::is_valid_steam_id;

/// Owners are Pro indefinitely; this is the date reported for them.
pub fn owner_pro_until() -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).single()
}

#[derive(Clone)]
pub struct EntitlementService {
    settings: Arc<AppSettings>,
    stores: Stores,
}

impl EntitlementService {
    pub fn new(settings: Arc<AppSettings>, stores: Stores) -> Self {
        Self { settings, stores }
    }

    pub async fn summary(&self, steam_id: &str, now: DateTime<Utc>) -> AppResult<EntitlementSummary> {
        let steam_id = steam_id.trim();
        if !is_valid_steam_id(steam_id) {
            return Err(AppError::BadRequest("Invalid steamId".to_string()));
        }

        let pro_until = if self.settings.is_owner(steam_id) {
            owner_pro_until()
        } else {
            self.stores.pro.get_pro_until(steam_id).await?
        };

        Ok(EntitlementSummary {
            steam_id: steam_id.to_string(),
            pro_until,
            is_pro: pro_until.is_some_and(|until| until > now),
            credits: self.stores.credits.credits_balance(steam_id).await?,
            spins: self.stores.credits.spins_balance(steam_id).await?,
            consumables: self.stores.rewards.counts(steam_id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreditStore, MemoryStore, ProStore, RewardStore};
    use crate::models::ConsumableReward;
    use crate::test_support::{BUYER, OWNER, test_settings};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn summarises_every_balance() {
        let store = Arc::new(MemoryStore::new());
        let service = EntitlementService::new(Arc::new(test_settings()), Stores::in_memory(store.clone()));
        let now = Utc::now();

        store.increment_credits(BUYER, 1500).await.unwrap();
        store.increment_spins(BUYER, 15).await.unwrap();
        let until = store.extend_pro(BUYER, 1, now).await.unwrap();
        store
            .grant(&[
                ConsumableReward::purchased(BUYER, "wishlist_slot", "cs_1", now),
                ConsumableReward::purchased(BUYER, "wishlist_slot", "cs_1", now),
            ])
            .await
            .unwrap();

        let summary = service.summary(BUYER, now).await.unwrap();
        assert_eq!(summary.credits, 1500);
        assert_eq!(summary.spins, 15);
        assert_eq!(summary.pro_until, Some(until));
        assert!(summary.is_pro);
        assert_eq!(summary.consumables.get("wishlist_slot"), Some(&2));
    }

    #[tokio::test]
    async fn owners_never_expire() {
        let store = Arc::new(MemoryStore::new());
        let service = EntitlementService::new(Arc::new(test_settings()), Stores::in_memory(store));

        let summary = service.summary(OWNER, Utc::now()).await.unwrap();
        assert_eq!(summary.pro_until, owner_pro_until());
        assert!(summary.is_pro);
        assert_eq!(summary.credits, 0);

        assert!(matches!(service.summary("nope", Utc::now()).await, Err(AppError::BadRequest(_))));
    }
}
