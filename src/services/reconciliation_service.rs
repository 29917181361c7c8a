//! Admin views over purchase history and the failed purchase log.

use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;

use crate::db::{FailedPurchaseStore, PurchaseStore};
use crate::error::{AppError, AppResult};
use crate::models::{DiscordDelivery, FailedPurchase, Grant, PurchaseFilter, PurchaseRecord};
use crate::services::discord_service::{DiscordWebhookClient, PurchaseNotice, purchase_embed};

pub const FAILED_PURCHASES_LIST_LIMIT: i64 = 500;

/// Grants and Pro expiry as written into the purchase details at fulfillment.
fn recorded_grants(record: &PurchaseRecord) -> (Vec<Grant>, Option<DateTime<Utc>>) {
    let grants = record
        .details
        .get("grants")
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<Grant>>(v).ok())
        .unwrap_or_default();
    let pro_until = record
        .details
        .get("proUntil")
        .cloned()
        .and_then(|v| serde_json::from_value::<Option<DateTime<Utc>>>(v).ok())
        .flatten();
    (grants, pro_until)
}

#[derive(Clone)]
pub struct ReconciliationService {
    purchases: Arc<dyn PurchaseStore>,
    failed_purchases: Arc<dyn FailedPurchaseStore>,
    discord: DiscordWebhookClient,
}

impl ReconciliationService {
    pub fn new(
        purchases: Arc<dyn PurchaseStore>,
        failed_purchases: Arc<dyn FailedPurchaseStore>,
        discord: DiscordWebhookClient,
    ) -> Self {
        Self { purchases, failed_purchases, discord }
    }

    pub async fn purchases(&self, filter: &PurchaseFilter) -> AppResult<Vec<PurchaseRecord>> {
        self.purchases.list(filter).await
    }

    pub async fn failed_purchases(&self, steam_id: Option<&str>) -> AppResult<Vec<FailedPurchase>> {
        let steam_id = steam_id.map(str::trim).filter(|s| !s.is_empty());
        self.failed_purchases.list(steam_id, FAILED_PURCHASES_LIST_LIMIT).await
    }

    pub async fn hide(&self, session_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        if !self.purchases.set_hidden(session_id, true, now).await? {
            return Err(AppError::NotFound("Purchase not found".to_string()));
        }
        info!("Purchase {} hidden from admin history", session_id);
        Ok(())
    }

    /// Resend the purchase notice. Delivery errors are recorded on the purchase and returned.
    pub async fn retry_discord(&self, session_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        let record = self
            .purchases
            .find(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Purchase not found".to_string()))?;

        let (grants, pro_until) = recorded_grants(&record);
        let notice = PurchaseNotice {
            session_id: &record.session_id,
            steam_id: &record.steam_id,
            purchase_type: record.purchase_type,
            amount_minor: record.amount_minor,
            currency: &record.currency,
            test_mode: record.test_mode,
            grants: &grants,
            pro_until,
        };

        let result = self
            .discord
            .send_purchase(&purchase_embed(&notice, now))
            .await
            .map_err(|e| match e {
                AppError::External(_) => e,
                other => AppError::External(other.user_message().to_string()),
            });
        let delivery = DiscordDelivery { attempted_at: now, error: result.as_ref().err().map(|e| e.to_string()) };
        if let Err(e) = self.purchases.record_discord_delivery(session_id, &delivery).await {
            warn!("Could not record Discord retry for {}: {}", session_id, e);
        }
        result
    }
}
