//! Webhook fulfillment: turn a paid checkout session into entitlements exactly once.
//!
//! The purchase row for a session id is claimed (insert-if-absent) before any
//! balance moves. A second delivery of the same session finds the claim and
//! stops. Grant errors are written to the failed purchase log and reported to
//! the caller as an outcome, never as an error, so the gateway stops retrying.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{ClaimOutcome, FulfillmentUpdate, Stores};
use crate::error::{AppError, AppResult};
use crate::models::cart::{CURRENCY, resolve_cart};
use crate::models::{
    ConsumableReward, CreditLedgerEntry, FailedPurchase, GatewayMode, Grant, PromoRedemption, PurchaseRecord,
    PurchaseSource, PurchaseType,
};
use crate::services::purchase_events::{PaymentEvent, PaymentEventSender, PurchaseFulfilled};
use crate::services::stripe_service::PaymentGateway;
use crate::stripe_types::{CheckoutSession, Event, EventType, PAYMENT_STATUS_NO_PAYMENT_REQUIRED, PAYMENT_STATUS_PAID};

/// What a checkout session's metadata asks us to grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKind {
    Pro { months: u32 },
    Credits { amount: i64 },
    Spins { amount: i64 },
    Consumable { consumable_type: String, quantity: i64 },
    Cart { cart_id: String },
}

impl OrderKind {
    pub fn purchase_type(&self) -> PurchaseType {
        match self {
            OrderKind::Pro { .. } => PurchaseType::Pro,
            OrderKind::Credits { .. } => PurchaseType::Credits,
            OrderKind::Spins { .. } => PurchaseType::Spins,
            OrderKind::Consumable { .. } => PurchaseType::Consumable,
            OrderKind::Cart { .. } => PurchaseType::Cart,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrder {
    pub session_id: String,
    pub steam_id: String,
    pub kind: OrderKind,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
    pub promo_code: Option<String>,
    pub promo_code_id: Option<String>,
}

impl PurchaseOrder {
    /// `None` when the session carries no steam id or nothing we know how to grant.
    pub fn from_session(session: &CheckoutSession) -> Option<Self> {
        let steam_id = session.meta("steamId")?.to_string();

        let kind = match session.meta("type") {
            Some("credits") => {
                let amount = session.meta_number("credits");
                (amount > 0).then_some(OrderKind::Credits { amount })?
            }
            Some("spins") => {
                let amount = session.meta_number("spins");
                (amount > 0).then_some(OrderKind::Spins { amount })?
            }
            Some("consumable") => {
                let consumable_type = session.meta("consumableType")?.to_string();
                let quantity = session.meta_number("quantity");
                (quantity > 0).then_some(OrderKind::Consumable { consumable_type, quantity })?
            }
            Some("cart") => OrderKind::Cart { cart_id: session.meta("cartId")?.to_string() },
            _ => {
                let months = u32::try_from(session.meta_number("months")).ok().filter(|m| *m > 0)?;
                OrderKind::Pro { months }
            }
        };

        Some(Self {
            session_id: session.id.clone(),
            steam_id,
            kind,
            amount_minor: session.amount_total.unwrap_or(0),
            currency: session.currency.clone().unwrap_or_else(|| CURRENCY.to_string()),
            payment_intent_id: session.payment_intent_id(),
            customer_id: session.customer_id(),
            promo_code: session.meta("promoCode").map(str::to_string),
            promo_code_id: session.meta("promoCodeId").map(str::to_string),
        })
    }

    pub fn purchase_type(&self) -> PurchaseType {
        self.kind.purchase_type()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedPurchase {
    pub session_id: String,
    pub steam_id: String,
    #[serde(rename = "type")]
    pub purchase_type: PurchaseType,
    pub grants: Vec<Grant>,
    pub pro_until: Option<DateTime<Utc>>,
}

impl GrantedPurchase {
    fn credits_total(&self) -> i64 {
        self.grants
            .iter()
            .map(|g| match g {
                Grant::Credits { amount } => *amount,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FulfillmentOutcome {
    Fulfilled(GrantedPurchase),
    /// The session was already fully processed.
    AlreadyFulfilled,
    /// Another delivery holds the claim and has not finished.
    InProgress,
    /// The grant failed and was written to the failed purchase log.
    Failed { error: String },
    Ignored { reason: String },
}

/// Answer to a manual verification request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPurchaseResponse {
    pub fulfilled: bool,
    pub session_id: String,
    pub message: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub purchase_type: Option<PurchaseType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pro_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseStatus {
    pub fulfilled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase: Option<PurchaseRecord>,
}

/// Mode a session belongs to, read from its id prefix.
pub fn mode_for_session_id(session_id: &str) -> GatewayMode {
    GatewayMode::from_test_flag(session_id.starts_with("cs_test_"))
}

fn payment_settled(session: &CheckoutSession) -> bool {
    match session.payment_status.as_deref() {
        None => true,
        Some(status) => status == PAYMENT_STATUS_PAID || status == PAYMENT_STATUS_NO_PAYMENT_REQUIRED,
    }
}

#[derive(Clone)]
pub struct FulfillmentService {
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
    events: PaymentEventSender,
    failed_purchases_keep: i64,
}

impl FulfillmentService {
    pub fn new(
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        events: PaymentEventSender,
        failed_purchases_keep: i64,
    ) -> Self {
        Self { stores, gateway, events, failed_purchases_keep }
    }

    /// Dispatch a verified webhook event. `mode` is the mode of the secret that verified it.
    pub async fn handle_event(&self, event: &Event, mode: GatewayMode) -> AppResult<FulfillmentOutcome> {
        let event_type = event.event_type();
        match &event_type {
            EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded => {
                let session = match event.checkout_session() {
                    Ok(session) => session,
                    Err(e) => {
                        warn!("Event {} carries an unreadable checkout session: {}", event.id, e);
                        return Ok(FulfillmentOutcome::Ignored { reason: "malformed checkout session".to_string() });
                    }
                };

                if event_type == EventType::CheckoutSessionCompleted && !payment_settled(&session) {
                    info!(
                        "Checkout session {} completed with payment status {:?}, waiting for async payment",
                        session.id, session.payment_status
                    );
                    return Ok(FulfillmentOutcome::Ignored { reason: "payment not settled".to_string() });
                }

                self.fulfill_session(&session, mode, PurchaseSource::Webhook).await
            }
            EventType::Other(name) => {
                debug!("Ignoring {} event {}", name, event.id);
                Ok(FulfillmentOutcome::Ignored { reason: format!("unhandled event type {}", name) })
            }
        }
    }

    /// Claim, grant and record one session. Only a failed claim is an error.
    pub async fn fulfill_session(
        &self,
        session: &CheckoutSession,
        mode: GatewayMode,
        source: PurchaseSource,
    ) -> AppResult<FulfillmentOutcome> {
        let Some(order) = PurchaseOrder::from_session(session) else {
            warn!("Checkout session {} has no usable purchase metadata", session.id);
            return Ok(FulfillmentOutcome::Ignored { reason: "missing purchase metadata".to_string() });
        };

        let mut claim = PurchaseRecord::claim(
            &order.session_id,
            &order.steam_id,
            order.purchase_type(),
            order.amount_minor,
            &order.currency,
            mode.is_test(),
            source,
        );
        claim.payment_intent_id = order.payment_intent_id.clone();
        claim.customer_id = order.customer_id.clone();

        let applied = match self.stores.purchases.claim(&claim).await? {
            ClaimOutcome::Claimed => 0,
            ClaimOutcome::Exists(existing) if existing.fulfilled => {
                info!("Checkout session {} already fulfilled, skipping", order.session_id);
                return Ok(FulfillmentOutcome::AlreadyFulfilled);
            }
            ClaimOutcome::Exists(existing) if source == PurchaseSource::ManualVerification => {
                info!(
                    "Resuming fulfillment for unfinished session {} after {} applied grants",
                    order.session_id, existing.grants_applied
                );
                existing.grants_applied
            }
            ClaimOutcome::Exists(_) => {
                info!("Checkout session {} is already claimed, skipping duplicate delivery", order.session_id);
                return Ok(FulfillmentOutcome::InProgress);
            }
        };

        let now = Utc::now();
        let granted = match self.grant(&order, applied, now).await {
            Ok(Some(granted)) => granted,
            Ok(None) => {
                info!("Another attempt is granting session {}, backing off", order.session_id);
                return Ok(FulfillmentOutcome::InProgress);
            }
            Err(e) => {
                let message = e.to_string();
                self.record_failure(&order, mode, &message).await;
                return Ok(FulfillmentOutcome::Failed { error: message });
            }
        };

        info!(
            "Fulfilled {} purchase {} for {} ({} grants)",
            order.purchase_type(),
            order.session_id,
            order.steam_id,
            granted.grants.len()
        );

        self.record_success(&order, mode, source, &granted, now).await;
        Ok(FulfillmentOutcome::Fulfilled(granted))
    }

    async fn grants_for(&self, order: &PurchaseOrder) -> AppResult<Vec<Grant>> {
        let grant = match &order.kind {
            OrderKind::Pro { months } => Grant::Pro { months: *months },
            OrderKind::Credits { amount } => Grant::Credits { amount: *amount },
            OrderKind::Spins { amount } => Grant::Spins { amount: *amount },
            OrderKind::Consumable { consumable_type, quantity } => {
                Grant::Consumable { consumable_type: consumable_type.clone(), quantity: *quantity }
            }
            OrderKind::Cart { cart_id } => {
                let cart = self
                    .stores
                    .carts
                    .get(cart_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Pending cart {} not found", cart_id)))?;
                if cart.steam_id != order.steam_id {
                    return Err(AppError::Internal(format!("Pending cart {} belongs to another user", cart_id)));
                }
                let grants: Vec<Grant> = resolve_cart(&cart.items, GatewayMode::from_test_flag(cart.test_mode))
                    .into_iter()
                    .map(|item| item.grant)
                    .collect();
                if grants.is_empty() {
                    return Err(AppError::Internal(format!("Pending cart {} has no valid items", cart_id)));
                }
                return Ok(grants);
            }
        };
        Ok(vec![grant])
    }

    /// Apply the order's grants in order, starting after the first `applied`.
    ///
    /// Each step is reserved on the purchase row before it runs and released
    /// again if it fails, so no step is applied twice across reruns. `None`
    /// when a concurrent attempt moved the progress first.
    async fn grant(
        &self,
        order: &PurchaseOrder,
        applied: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<GrantedPurchase>> {
        let grants = self.grants_for(order).await?;
        let steam_id = order.steam_id.as_str();

        let mut pro_until = None;
        for (step, grant) in (0i32..).zip(grants.iter()) {
            if step < applied {
                debug!("Grant {} of session {} already applied", step + 1, order.session_id);
                if matches!(grant, Grant::Pro { .. }) {
                    pro_until = self.stores.pro.get_pro_until(steam_id).await?;
                }
                continue;
            }

            if !self.stores.purchases.advance_grant_progress(&order.session_id, step, step + 1).await? {
                return Ok(None);
            }
            match self.apply_grant(order, grant, now).await {
                Ok(Some(until)) => pro_until = Some(until),
                Ok(None) => {}
                Err(e) => {
                    if let Err(release) =
                        self.stores.purchases.advance_grant_progress(&order.session_id, step + 1, step).await
                    {
                        error!(
                            "Could not release grant {} of session {} after failure: {}",
                            step + 1,
                            order.session_id,
                            release
                        );
                    }
                    return Err(e);
                }
            }
        }

        Ok(Some(GrantedPurchase {
            session_id: order.session_id.clone(),
            steam_id: order.steam_id.clone(),
            purchase_type: order.purchase_type(),
            grants,
            pro_until,
        }))
    }

    /// One entitlement mutation. Returns the new Pro expiry for Pro grants.
    async fn apply_grant(
        &self,
        order: &PurchaseOrder,
        grant: &Grant,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let steam_id = order.steam_id.as_str();
        match grant {
            Grant::Credits { amount } => {
                self.stores.credits.increment_credits(steam_id, *amount).await?;
            }
            Grant::Spins { amount } => {
                self.stores.credits.increment_spins(steam_id, *amount).await?;
            }
            Grant::Pro { months } => {
                return Ok(Some(self.stores.pro.extend_pro(steam_id, *months, now).await?));
            }
            Grant::Consumable { consumable_type, quantity } => {
                let rewards: Vec<ConsumableReward> = (0..*quantity)
                    .map(|_| ConsumableReward::purchased(steam_id, consumable_type, &order.session_id, now))
                    .collect();
                self.stores.rewards.grant(&rewards).await?;
            }
        }
        Ok(None)
    }

    async fn record_failure(&self, order: &PurchaseOrder, mode: GatewayMode, message: &str) {
        error!(
            "Failed to grant {} purchase {} for {}: {}",
            order.purchase_type(),
            order.session_id,
            order.steam_id,
            message
        );

        match self.stores.failed_purchases.exists_for_session(&order.session_id).await {
            Ok(true) => {
                debug!("Failed purchase {} is already logged", order.session_id);
                return;
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check failed purchase log for {}: {}", order.session_id, e),
        }

        let failure = FailedPurchase {
            id: Uuid::new_v4(),
            session_id: order.session_id.clone(),
            steam_id: order.steam_id.clone(),
            purchase_type: order.purchase_type(),
            error: message.to_string(),
            amount_minor: order.amount_minor,
            currency: order.currency.clone(),
            test_mode: mode.is_test(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.stores.failed_purchases.record(&failure).await {
            error!("Could not record failed purchase {}: {}", order.session_id, e);
            return;
        }
        match self.stores.failed_purchases.retain_latest(self.failed_purchases_keep).await {
            Ok(0) => {}
            Ok(pruned) => debug!("Pruned {} old failed purchase entries", pruned),
            Err(e) => warn!("Failed purchase retention did not run: {}", e),
        }
    }

    /// Bookkeeping after a successful grant. Nothing here can undo or fail the grant.
    /// Only the attempt that flips the row to fulfilled writes the rest.
    async fn record_success(
        &self,
        order: &PurchaseOrder,
        mode: GatewayMode,
        source: PurchaseSource,
        granted: &GrantedPurchase,
        now: DateTime<Utc>,
    ) {
        let cart_id = match &order.kind {
            OrderKind::Cart { cart_id } => Some(cart_id.as_str()),
            _ => None,
        };
        let update = FulfillmentUpdate {
            fulfilled_at: now,
            details: json!({
                "grants": granted.grants,
                "proUntil": granted.pro_until,
                "cartId": cart_id,
                "promoCode": order.promo_code,
                "promoCodeId": order.promo_code_id,
                "source": source.as_str(),
            }),
            payment_intent_id: order.payment_intent_id.clone(),
            customer_id: order.customer_id.clone(),
        };
        match self.stores.purchases.mark_fulfilled(&order.session_id, &update).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Purchase {} was completed by another attempt", order.session_id);
                return;
            }
            Err(e) => warn!("Failed to mark purchase {} fulfilled: {}", order.session_id, e),
        }

        let credits = granted.credits_total();
        if credits > 0 {
            let entry = CreditLedgerEntry::purchase(&order.steam_id, credits, &order.session_id);
            if let Err(e) = self.stores.credits.append_ledger(&entry).await {
                warn!("Failed to write credits ledger entry for {}: {}", order.session_id, e);
            }
        }

        if let Some(promo_code_id) = order.promo_code_id.as_deref() {
            self.mark_single_use(order, promo_code_id, now).await;
        }

        self.events.publish(PaymentEvent::PurchaseFulfilled(PurchaseFulfilled {
            session_id: order.session_id.clone(),
            steam_id: order.steam_id.clone(),
            purchase_type: order.purchase_type(),
            mode,
            source,
            amount_minor: order.amount_minor,
            currency: order.currency.clone(),
            grants: granted.grants.clone(),
            pro_until: granted.pro_until,
            promo_code: order.promo_code.clone(),
            promo_code_id: order.promo_code_id.clone(),
        }));
    }

    async fn mark_single_use(&self, order: &PurchaseOrder, promo_code_id: &str, now: DateTime<Utc>) {
        let promo = match self.stores.promos.get(promo_code_id).await {
            Ok(Some(promo)) if promo.single_use_per_user => promo,
            Ok(_) => return,
            Err(e) => {
                warn!("Could not load promo {} for single-use marker: {}", promo_code_id, e);
                return;
            }
        };
        let redemption = PromoRedemption {
            steam_id: order.steam_id.clone(),
            promo_code_id: promo.promo_code_id,
            session_id: order.session_id.clone(),
            used_at: now,
        };
        if let Err(e) = self.stores.promos.record_redemption(&redemption).await {
            warn!("Failed to write single-use marker for promo {}: {}", promo_code_id, e);
        }
    }

    /// Manual re-fulfillment of a paid session, for buyers whose webhook never landed.
    pub async fn verify_purchase(&self, session_id: &str, steam_id: &str) -> AppResult<VerifyPurchaseResponse> {
        let session_id = session_id.trim();
        let steam_id = steam_id.trim();
        if session_id.is_empty() || steam_id.is_empty() {
            return Err(AppError::BadRequest("Missing sessionId or steamId".to_string()));
        }

        let mode = mode_for_session_id(session_id);
        let session = self
            .gateway
            .retrieve_checkout_session(mode, session_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    AppError::NotFound("Checkout session not found".to_string())
                } else {
                    AppError::from(e)
                }
            })?;

        if session.payment_status.as_deref() != Some(PAYMENT_STATUS_PAID) {
            return Err(AppError::BadRequest("Payment not completed".to_string()));
        }
        if session.meta("steamId") != Some(steam_id) {
            return Err(AppError::Forbidden("Steam ID mismatch".to_string()));
        }

        match self.fulfill_session(&session, mode, PurchaseSource::ManualVerification).await? {
            FulfillmentOutcome::Fulfilled(granted) => Ok(VerifyPurchaseResponse {
                fulfilled: true,
                session_id: session_id.to_string(),
                message: "Purchase fulfilled".to_string(),
                purchase_type: Some(granted.purchase_type),
                grants: granted.grants,
                pro_until: granted.pro_until,
            }),
            FulfillmentOutcome::AlreadyFulfilled | FulfillmentOutcome::InProgress => Ok(VerifyPurchaseResponse {
                fulfilled: true,
                session_id: session_id.to_string(),
                message: "Purchase already fulfilled".to_string(),
                purchase_type: None,
                grants: Vec::new(),
                pro_until: None,
            }),
            FulfillmentOutcome::Failed { error } => {
                Err(AppError::Internal(format!("Failed to fulfill purchase: {}", error)))
            }
            FulfillmentOutcome::Ignored { reason } => {
                Err(AppError::BadRequest(format!("Unsupported purchase: {}", reason)))
            }
        }
    }

    /// Fulfillment status from purchase history.
    pub async fn purchase_status(&self, session_id: &str, steam_id: Option<&str>) -> AppResult<PurchaseStatus> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(AppError::BadRequest("Missing session_id".to_string()));
        }

        let Some(record) = self.stores.purchases.find(session_id).await? else {
            return Ok(PurchaseStatus {
                fulfilled: false,
                message: Some("Purchase not found in history".to_string()),
                purchase: None,
            });
        };

        if let Some(steam_id) = steam_id.map(str::trim).filter(|s| !s.is_empty()) {
            if record.steam_id != steam_id {
                return Err(AppError::Forbidden("Steam ID mismatch".to_string()));
            }
        }

        Ok(PurchaseStatus { fulfilled: record.fulfilled, message: None, purchase: Some(record) })
    }
}
