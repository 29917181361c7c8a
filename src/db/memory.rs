//! In-process implementation of every store, used when no database is configured
//! and by the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::db::repositories::pro_repository::extended_pro_until;
use crate::db::repositories::{
    ClaimOutcome, CreditStore, FailedPurchaseStore, FulfillmentUpdate, KeyValueStore,
    NotificationStore, PendingCartStore, ProStore, PromoStore, PurchaseStore, RewardStore,
};
use crate::error::AppError;
use crate::models::{
    AnalyticsEvent, ConsumableReward, CreditLedgerEntry, DiscordDelivery, FailedPurchase,
    GatewayMode, PendingCart, PromoCode, PromoRedemption, PurchaseFilter, PurchaseRecord,
    UserNotification,
};

#[derive(Default)]
struct MemoryState {
    kv: HashMap<String, serde_json::Value>,
    carts: HashMap<String, PendingCart>,
    purchases: HashMap<String, PurchaseRecord>,
    failed: Vec<FailedPurchase>,
    credits: HashMap<String, i64>,
    ledger: Vec<CreditLedgerEntry>,
    spins: HashMap<String, i64>,
    pro: HashMap<String, DateTime<Utc>>,
    rewards: Vec<ConsumableReward>,
    promos: Vec<PromoCode>,
    redemptions: HashMap<(String, String), PromoRedemption>,
    notifications: Vec<UserNotification>,
    analytics: Vec<AnalyticsEvent>,
    discord_links: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn link_discord(&self, steam_id: &str, discord_id: &str) {
        self.state
            .write()
            .await
            .discord_links
            .insert(steam_id.to_string(), discord_id.to_string());
    }

    pub async fn user_notifications(&self, steam_id: &str) -> Vec<UserNotification> {
        self.state
            .read()
            .await
            .notifications
            .iter()
            .filter(|n| n.steam_id == steam_id)
            .cloned()
            .collect()
    }

    pub async fn analytics_events(&self) -> Vec<AnalyticsEvent> {
        self.state.read().await.analytics.clone()
    }

    pub async fn redemption(&self, steam_id: &str, promo_code_id: &str) -> Option<PromoRedemption> {
        self.state
            .read()
            .await
            .redemptions
            .get(&(steam_id.to_string(), promo_code_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        Ok(self.state.read().await.kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError> {
        self.state.write().await.kv.insert(key.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl PendingCartStore for MemoryStore {
    async fn save(&self, cart: &PendingCart) -> Result<(), AppError> {
        self.state.write().await.carts.insert(cart.cart_id.clone(), cart.clone());
        Ok(())
    }

    async fn get(&self, cart_id: &str) -> Result<Option<PendingCart>, AppError> {
        Ok(self.state.read().await.carts.get(cart_id).cloned())
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn claim(&self, record: &PurchaseRecord) -> Result<ClaimOutcome, AppError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.purchases.get(&record.session_id) {
            return Ok(ClaimOutcome::Exists(existing.clone()));
        }
        state.purchases.insert(record.session_id.clone(), record.clone());
        Ok(ClaimOutcome::Claimed)
    }

    async fn find(&self, session_id: &str) -> Result<Option<PurchaseRecord>, AppError> {
        Ok(self.state.read().await.purchases.get(session_id).cloned())
    }

    async fn mark_fulfilled(&self, session_id: &str, update: &FulfillmentUpdate) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let Some(record) = state.purchases.get_mut(session_id).filter(|r| !r.fulfilled) else {
            return Ok(false);
        };
        record.fulfilled = true;
        record.fulfilled_at = Some(update.fulfilled_at);
        record.details = update.details.clone();
        if update.payment_intent_id.is_some() {
            record.payment_intent_id = update.payment_intent_id.clone();
        }
        if update.customer_id.is_some() {
            record.customer_id = update.customer_id.clone();
        }
        Ok(true)
    }

    async fn advance_grant_progress(&self, session_id: &str, from: i32, to: i32) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.purchases.get_mut(session_id) {
            Some(record) if !record.fulfilled && record.grants_applied == from => {
                record.grants_applied = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &PurchaseFilter) -> Result<Vec<PurchaseRecord>, AppError> {
        let state = self.state.read().await;
        let mut rows: Vec<PurchaseRecord> = state
            .purchases
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if filter.limit > 0 { filter.limit } else { PurchaseFilter::DEFAULT_LIMIT };
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn set_hidden(&self, session_id: &str, hidden: bool, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.purchases.get_mut(session_id) {
            Some(record) => {
                record.hidden = hidden;
                record.hidden_at = hidden.then_some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_discord_delivery(&self, session_id: &str, delivery: &DiscordDelivery) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if let Some(record) = state.purchases.get_mut(session_id) {
            record.discord_notify_attempts += 1;
            record.discord_notify_last_attempt_at = Some(delivery.attempted_at);
            if delivery.error.is_none() {
                record.discord_notified = true;
                record.discord_notified_at = Some(delivery.attempted_at);
            }
            record.discord_notify_error = delivery.error.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl FailedPurchaseStore for MemoryStore {
    async fn record(&self, failure: &FailedPurchase) -> Result<(), AppError> {
        self.state.write().await.failed.push(failure.clone());
        Ok(())
    }

    async fn exists_for_session(&self, session_id: &str) -> Result<bool, AppError> {
        Ok(self.state.read().await.failed.iter().any(|f| f.session_id == session_id))
    }

    async fn list(&self, steam_id: Option<&str>, limit: i64) -> Result<Vec<FailedPurchase>, AppError> {
        let state = self.state.read().await;
        let mut rows: Vec<FailedPurchase> = state
            .failed
            .iter()
            .filter(|f| steam_id.is_none_or(|id| f.steam_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn retain_latest(&self, keep: i64) -> Result<u64, AppError> {
        let mut state = self.state.write().await;
        state.failed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let keep = keep.max(0) as usize;
        let removed = state.failed.len().saturating_sub(keep);
        state.failed.truncate(keep);
        Ok(removed as u64)
    }
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn increment_credits(&self, steam_id: &str, delta: i64) -> Result<i64, AppError> {
        let mut state = self.state.write().await;
        let balance = state.credits.entry(steam_id.to_string()).or_insert(0);
        *balance += delta;
        Ok(*balance)
    }

    async fn append_ledger(&self, entry: &CreditLedgerEntry) -> Result<(), AppError> {
        self.state.write().await.ledger.push(entry.clone());
        Ok(())
    }

    async fn credits_balance(&self, steam_id: &str) -> Result<i64, AppError> {
        Ok(self.state.read().await.credits.get(steam_id).copied().unwrap_or(0))
    }

    async fn ledger_for(&self, steam_id: &str) -> Result<Vec<CreditLedgerEntry>, AppError> {
        let state = self.state.read().await;
        let mut rows: Vec<CreditLedgerEntry> =
            state.ledger.iter().filter(|e| e.steam_id == steam_id).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn increment_spins(&self, steam_id: &str, delta: i64) -> Result<i64, AppError> {
        let mut state = self.state.write().await;
        let balance = state.spins.entry(steam_id.to_string()).or_insert(0);
        *balance += delta;
        Ok(*balance)
    }

    async fn spins_balance(&self, steam_id: &str) -> Result<i64, AppError> {
        Ok(self.state.read().await.spins.get(steam_id).copied().unwrap_or(0))
    }
}

#[async_trait]
impl ProStore for MemoryStore {
    async fn extend_pro(&self, steam_id: &str, months: u32, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
        let mut state = self.state.write().await;
        let next = extended_pro_until(state.pro.get(steam_id).copied(), months, now)?;
        state.pro.insert(steam_id.to_string(), next);
        Ok(next)
    }

    async fn get_pro_until(&self, steam_id: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self.state.read().await.pro.get(steam_id).copied())
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn grant(&self, rewards: &[ConsumableReward]) -> Result<(), AppError> {
        self.state.write().await.rewards.extend_from_slice(rewards);
        Ok(())
    }

    async fn counts(&self, steam_id: &str) -> Result<BTreeMap<String, i64>, AppError> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for reward in state.rewards.iter().filter(|r| r.steam_id == steam_id) {
            *counts.entry(reward.reward_type.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl PromoStore for MemoryStore {
    async fn list(&self) -> Result<Vec<PromoCode>, AppError> {
        let mut rows = self.state.read().await.promos.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn get(&self, promo_code_id: &str) -> Result<Option<PromoCode>, AppError> {
        let state = self.state.read().await;
        Ok(state.promos.iter().find(|p| p.promo_code_id == promo_code_id).cloned())
    }

    async fn find_by_code(&self, code: &str, mode: GatewayMode) -> Result<Option<PromoCode>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .promos
            .iter()
            .filter(|p| !p.is_deleted() && p.mode() == mode && p.matches_code(code))
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn insert(&self, promo: &PromoCode) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.promos.iter().any(|p| p.promo_code_id == promo.promo_code_id) {
            return Err(AppError::Database(format!("Duplicate promo id {}", promo.promo_code_id)));
        }
        state.promos.push(promo.clone());
        Ok(())
    }

    async fn update(&self, promo: &PromoCode) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.promos.iter_mut().find(|p| p.promo_code_id == promo.promo_code_id) {
            existing.name = promo.name.clone();
            existing.starts_at = promo.starts_at;
            existing.auto_enable_at_start = promo.auto_enable_at_start;
            existing.active = promo.active;
            existing.single_use_per_user = promo.single_use_per_user;
            existing.creator_slug = promo.creator_slug.clone();
            existing.deleted_at = promo.deleted_at;
            existing.updated_at = promo.updated_at;
        }
        Ok(())
    }

    async fn has_redeemed(&self, steam_id: &str, promo_code_id: &str) -> Result<bool, AppError> {
        let key = (steam_id.to_string(), promo_code_id.to_string());
        Ok(self.state.read().await.redemptions.contains_key(&key))
    }

    async fn record_redemption(&self, redemption: &PromoRedemption) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let key = (redemption.steam_id.clone(), redemption.promo_code_id.clone());
        if state.redemptions.contains_key(&key) {
            return Ok(false);
        }
        state.redemptions.insert(key, redemption.clone());
        Ok(true)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_user_notification(&self, notification: &UserNotification) -> Result<(), AppError> {
        self.state.write().await.notifications.push(notification.clone());
        Ok(())
    }

    async fn record_analytics_event(&self, event: &AnalyticsEvent) -> Result<(), AppError> {
        self.state.write().await.analytics.push(event.clone());
        Ok(())
    }

    async fn discord_id_for(&self, steam_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.state.read().await.discord_links.get(steam_id).cloned())
    }
}
