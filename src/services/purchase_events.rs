//! Outbound purchase events and their subscribers.
//!
//! The checkout and fulfillment paths only publish. Each subscriber runs on
//! its own task per event, so a slow or failing integration never touches the
//! response or the other subscribers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::settings::NotificationConfig;
use crate::db::{NotificationStore, PromoStore, PurchaseStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    AnalyticsEvent, DiscordDelivery, GatewayMode, Grant, LineItem, PurchaseSource, PurchaseType, UserNotification,
};
use crate::services::discord_service::{
    DiscordWebhookClient, PurchaseNotice, checkout_embed, describe_grant, purchase_embed,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutStarted {
    pub cart_id: String,
    pub steam_id: String,
    pub mode: GatewayMode,
    pub line_items: Vec<LineItem>,
    pub total_minor: i64,
    pub currency: String,
    pub promo_code: Option<String>,
    pub owner_discount: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseFulfilled {
    pub session_id: String,
    pub steam_id: String,
    pub purchase_type: PurchaseType,
    pub mode: GatewayMode,
    pub source: PurchaseSource,
    pub amount_minor: i64,
    pub currency: String,
    pub grants: Vec<Grant>,
    pub pro_until: Option<DateTime<Utc>>,
    pub promo_code: Option<String>,
    pub promo_code_id: Option<String>,
}

impl PurchaseFulfilled {
    pub fn notice(&self) -> PurchaseNotice<'_> {
        PurchaseNotice {
            session_id: &self.session_id,
            steam_id: &self.steam_id,
            purchase_type: self.purchase_type,
            amount_minor: self.amount_minor,
            currency: &self.currency,
            test_mode: self.mode.is_test(),
            grants: &self.grants,
            pro_until: self.pro_until,
        }
    }

    pub fn grants_pro(&self) -> bool {
        self.grants.iter().any(|g| matches!(g, Grant::Pro { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    CheckoutStarted(CheckoutStarted),
    PurchaseFulfilled(PurchaseFulfilled),
}

impl PaymentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::CheckoutStarted(_) => "checkout_started",
            PaymentEvent::PurchaseFulfilled(_) => "purchase_fulfilled",
        }
    }
}

/// Publishing half of the event channel. Cheap to clone.
#[derive(Clone)]
pub struct PaymentEventSender {
    tx: mpsc::UnboundedSender<Arc<PaymentEvent>>,
}

pub type PaymentEventReceiver = mpsc::UnboundedReceiver<Arc<PaymentEvent>>;

impl PaymentEventSender {
    pub fn channel() -> (Self, PaymentEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Never fails the caller. A closed channel only loses the side effects.
    pub fn publish(&self, event: PaymentEvent) {
        let name = event.name();
        if self.tx.send(Arc::new(event)).is_err() {
            warn!("Payment event channel closed, dropping {} event", name);
        }
    }
}

#[async_trait]
pub trait PaymentEventSubscriber: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, event: &PaymentEvent) -> AppResult<()>;
}

/// Fans every received event out to all subscribers until the channel closes.
pub fn spawn_dispatcher(
    mut rx: PaymentEventReceiver,
    subscribers: Vec<Arc<dyn PaymentEventSubscriber>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Payment event dispatcher started with {} subscribers", subscribers.len());
        while let Some(event) = rx.recv().await {
            for subscriber in &subscribers {
                let subscriber = subscriber.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = subscriber.handle(&event).await {
                        warn!("Subscriber {} failed on {} event: {}", subscriber.name(), event.name(), e);
                    }
                });
            }
        }
        info!("Payment event dispatcher stopped");
    })
}

/// Discord purchase and checkout notices. Purchase deliveries are recorded on the purchase row.
pub struct DiscordPurchaseNotifier {
    discord: DiscordWebhookClient,
    purchases: Arc<dyn PurchaseStore>,
}

impl DiscordPurchaseNotifier {
    pub fn new(discord: DiscordWebhookClient, purchases: Arc<dyn PurchaseStore>) -> Self {
        Self { discord, purchases }
    }
}

#[async_trait]
impl PaymentEventSubscriber for DiscordPurchaseNotifier {
    fn name(&self) -> &'static str {
        "discord_purchase_notifier"
    }

    async fn handle(&self, event: &PaymentEvent) -> AppResult<()> {
        match event {
            PaymentEvent::CheckoutStarted(started) => {
                let embed = checkout_embed(
                    &started.steam_id,
                    &started.cart_id,
                    &started.line_items,
                    started.total_minor,
                    &started.currency,
                    started.promo_code.as_deref(),
                    Utc::now(),
                );
                self.discord.send_checkout(&embed).await
            }
            PaymentEvent::PurchaseFulfilled(purchase) => {
                if !self.discord.has_purchase_channel() {
                    debug!("No Discord purchase channel, skipping notice for {}", purchase.session_id);
                    return Ok(());
                }
                let embed = purchase_embed(&purchase.notice(), Utc::now());
                let result = self.discord.send_purchase(&embed).await;
                let delivery = DiscordDelivery {
                    attempted_at: Utc::now(),
                    error: result.as_ref().err().map(|e| e.to_string()),
                };
                self.purchases.record_discord_delivery(&purchase.session_id, &delivery).await?;
                result
            }
        }
    }
}

/// In-app notification for the buyer.
pub struct UserNotificationWriter {
    notifications: Arc<dyn NotificationStore>,
}

impl UserNotificationWriter {
    pub fn new(notifications: Arc<dyn NotificationStore>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl PaymentEventSubscriber for UserNotificationWriter {
    fn name(&self) -> &'static str {
        "user_notification_writer"
    }

    async fn handle(&self, event: &PaymentEvent) -> AppResult<()> {
        let PaymentEvent::PurchaseFulfilled(purchase) = event else {
            return Ok(());
        };

        let items = purchase.grants.iter().map(describe_grant).collect::<Vec<_>>().join(", ");
        let mut message = format!("Thanks for your purchase! Added to your account: {}.", items);
        if let Some(pro_until) = purchase.pro_until {
            message.push_str(&format!(" Pro active until {}.", pro_until.format("%Y-%m-%d")));
        }
        let notification = UserNotification::new(
            &purchase.steam_id,
            "purchase",
            "Purchase complete".to_string(),
            message,
            json!({ "sessionId": purchase.session_id, "type": purchase.purchase_type }),
        );
        self.notifications.create_user_notification(&notification).await
    }
}

/// Purchase analytics, attributed to the creator behind the promo code when there is one.
pub struct AnalyticsRecorder {
    notifications: Arc<dyn NotificationStore>,
    promos: Arc<dyn PromoStore>,
}

impl AnalyticsRecorder {
    pub fn new(notifications: Arc<dyn NotificationStore>, promos: Arc<dyn PromoStore>) -> Self {
        Self { notifications, promos }
    }
}

#[async_trait]
impl PaymentEventSubscriber for AnalyticsRecorder {
    fn name(&self) -> &'static str {
        "analytics_recorder"
    }

    async fn handle(&self, event: &PaymentEvent) -> AppResult<()> {
        let PaymentEvent::PurchaseFulfilled(purchase) = event else {
            return Ok(());
        };

        let creator_slug = match purchase.promo_code_id.as_deref() {
            Some(id) => self
                .promos
                .get(id)
                .await?
                .and_then(|p| p.creator_slug)
                .filter(|s| !s.trim().is_empty()),
            None => None,
        };

        let analytics = AnalyticsEvent {
            id: uuid::Uuid::new_v4(),
            steam_id: purchase.steam_id.clone(),
            event: "purchase".to_string(),
            session_id: Some(purchase.session_id.clone()),
            amount_minor: purchase.amount_minor,
            currency: purchase.currency.clone(),
            creator_slug,
            promo_code: purchase.promo_code.clone(),
            meta: json!({
                "type": purchase.purchase_type,
                "testMode": purchase.mode.is_test(),
                "source": purchase.source.as_str(),
            }),
            created_at: Utc::now(),
        };
        self.notifications.record_analytics_event(&analytics).await
    }
}

/// Asks the Discord bot to refresh roles after a Pro grant, for linked accounts only.
pub struct DiscordRoleSync {
    http: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
    notifications: Arc<dyn NotificationStore>,
}

impl DiscordRoleSync {
    pub fn new(
        config: &NotificationConfig,
        timeout_secs: u64,
        notifications: Arc<dyn NotificationStore>,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build role sync HTTP client: {}", e)))?;
        Ok(Self {
            http,
            url: config.discord_role_sync_url.clone(),
            token: config.discord_role_sync_token.clone(),
            notifications,
        })
    }
}

#[async_trait]
impl PaymentEventSubscriber for DiscordRoleSync {
    fn name(&self) -> &'static str {
        "discord_role_sync"
    }

    async fn handle(&self, event: &PaymentEvent) -> AppResult<()> {
        let PaymentEvent::PurchaseFulfilled(purchase) = event else {
            return Ok(());
        };
        if !purchase.grants_pro() {
            return Ok(());
        }
        let Some(url) = self.url.as_deref() else {
            return Ok(());
        };
        let Some(discord_id) = self.notifications.discord_id_for(&purchase.steam_id).await? else {
            debug!("No Discord link for {}, skipping role sync", purchase.steam_id);
            return Ok(());
        };

        let mut request = self.http.post(url).json(&json!({
            "discordId": discord_id,
            "steamId": purchase.steam_id,
            "proUntil": purchase.pro_until,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::External(format!("Role sync request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::External(format!("Role sync returned {}", response.status())));
        }
        info!("Synced Discord roles for {} ({})", purchase.steam_id, discord_id);
        Ok(())
    }
}
