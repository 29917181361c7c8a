use std::sync::Arc;

use crate::config::AppSettings;
use crate::db::Stores;
use crate::error::AppResult;
use crate::models::GatewayMode;
use crate::services::checkout_service::CheckoutService;
use crate::services::discord_service::DiscordWebhookClient;
use crate::services::entitlement_service::EntitlementService;
use crate::services::fulfillment_service::FulfillmentService;
use crate::services::gateway_mode_service::current_mode;
use crate::services::promo_service::PromoService;
use crate::services::purchase_events::{
    AnalyticsRecorder, DiscordPurchaseNotifier, DiscordRoleSync, PaymentEventSender, PaymentEventSubscriber,
    UserNotificationWriter,
};
use crate::services::reconciliation_service::ReconciliationService;
use crate::services::stripe_service::{PaymentGateway, WebhookVerifier};

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub stores: Stores,
    pub verifier: WebhookVerifier,
    pub checkout: CheckoutService,
    pub fulfillment: FulfillmentService,
    pub promos: PromoService,
    pub entitlements: EntitlementService,
    pub reconciliation: ReconciliationService,
}

impl AppState {
    pub fn new(
        settings: Arc<AppSettings>,
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        events: PaymentEventSender,
    ) -> AppResult<Self> {
        let discord = DiscordWebhookClient::new(&settings.notifications, settings.stripe.request_timeout_secs)?;

        Ok(Self {
            verifier: WebhookVerifier::from_config(&settings.stripe),
            checkout: CheckoutService::new(settings.clone(), stores.clone(), gateway.clone(), events.clone()),
            fulfillment: FulfillmentService::new(
                stores.clone(),
                gateway.clone(),
                events,
                settings.retention.failed_purchases_keep,
            ),
            promos: PromoService::new(stores.clone(), gateway),
            entitlements: EntitlementService::new(settings.clone(), stores.clone()),
            reconciliation: ReconciliationService::new(
                stores.purchases.clone(),
                stores.failed_purchases.clone(),
                discord,
            ),
            settings,
            stores,
        })
    }

    /// The stored live/test switch, read once per request.
    pub async fn gateway_mode(&self) -> AppResult<GatewayMode> {
        current_mode(self.stores.kv.as_ref()).await
    }
}

/// Every side-effect subscriber of the payment event channel.
pub fn payment_subscribers(settings: &AppSettings, stores: &Stores) -> AppResult<Vec<Arc<dyn PaymentEventSubscriber>>> {
    let timeout = settings.stripe.request_timeout_secs;
    let discord = DiscordWebhookClient::new(&settings.notifications, timeout)?;

    Ok(vec![
        Arc::new(DiscordPurchaseNotifier::new(discord, stores.purchases.clone())),
        Arc::new(UserNotificationWriter::new(stores.notifications.clone())),
        Arc::new(AnalyticsRecorder::new(stores.notifications.clone(), stores.promos.clone())),
        Arc::new(DiscordRoleSync::new(&settings.notifications, timeout, stores.notifications.clone())?),
    ])
}
