use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppSettings;
use crate::db::Stores;
use crate::error::{AppError, AppResult};
use crate::models::cart::{
    CONSUMABLE_QTY_MAX, CURRENCY, find_consumable, normalize_cart_id, resolve_cart, total_minor,
};
use crate::models::{CartItem, GatewayMode, Grant, LineItem, PendingCart, PromoCode};
use crate::services::credits_restrictions::credits_restriction;
use crate::services::purchase_events::{CheckoutStarted, PaymentEvent, PaymentEventSender};
use crate::services::stripe_service::{PaymentGateway, StripeServiceError, invalid_payment_method_type};
use crate::stripe_types::{
    COUPON_DURATION_FOREVER, CheckoutSession, CouponValue, CreateCheckoutSession, CreateCoupon, Discount,
    PAYMENT_METHOD_TYPES,
};
use crate::utils::sanitize::{is_valid_steam_id, sanitize_email};

const SESSION_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub steam_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub cart_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
    pub cart_id: String,
}

/// Product behind one of the storefront's single-item checkout routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemCheckoutKind {
    Pro,
    Credits,
    Spins,
    Consumable,
}

impl ItemCheckoutKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemCheckoutKind::Pro => "pro",
            ItemCheckoutKind::Credits => "credits",
            ItemCheckoutKind::Spins => "spins",
            ItemCheckoutKind::Consumable => "consumable",
        }
    }

    fn invalid_item_message(self) -> &'static str {
        match self {
            ItemCheckoutKind::Pro => "Invalid plan",
            ItemCheckoutKind::Credits => "Invalid credit pack",
            ItemCheckoutKind::Spins => "Invalid spins pack",
            ItemCheckoutKind::Consumable => "Invalid consumable type",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCheckoutRequest {
    #[serde(default)]
    pub steam_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub pack: Option<String>,
    /// Consumable product id, posted as `type`.
    #[serde(default, rename = "type")]
    pub consumable_type: Option<String>,
    #[serde(default)]
    pub quantity: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

/// Consumable quantity for single-item checkout: a whole number in `1..=CONSUMABLE_QTY_MAX`.
fn strict_quantity(raw: Option<&serde_json::Value>) -> Option<i64> {
    let n = match raw? {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (1..=CONSUMABLE_QTY_MAX).contains(&n).then_some(n)
}

/// Order-specific parts of a hosted session. `metadata` holds the order keys;
/// `success_query` is appended to the success URL.
struct SessionDraft<'a> {
    steam_id: &'a str,
    email: String,
    line_items: Vec<LineItem>,
    promo: Option<&'a PromoCode>,
    owner_coupon: Option<String>,
    metadata: BTreeMap<String, String>,
    success_query: String,
}

/// Sanitized email and trimmed SteamID64 of the buyer.
fn validate_buyer(raw_email: &str, raw_steam_id: &str) -> AppResult<(String, String)> {
    let email =
        sanitize_email(raw_email).ok_or_else(|| AppError::BadRequest("Valid email is required".to_string()))?;

    let steam_id = raw_steam_id.trim();
    if !is_valid_steam_id(steam_id) {
        return Err(AppError::Unauthorized(
            "You must be signed in with Steam to purchase. Please sign in and try again.".to_string(),
        ));
    }
    Ok((email, steam_id.to_string()))
}

/// Per-request inputs resolved at the HTTP edge.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub mode: GatewayMode,
    /// Scheme and host the redirect URLs point back to.
    pub origin: String,
    /// Steam id of the signed-in caller, if any.
    pub session_steam_id: Option<String>,
    pub now: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckoutService {
    settings: Arc<AppSettings>,
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
    events: PaymentEventSender,
}

impl CheckoutService {
    pub fn new(
        settings: Arc<AppSettings>,
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        events: PaymentEventSender,
    ) -> Self {
        Self { settings, stores, gateway, events }
    }

    /// Validate the cart and open a hosted checkout session for it.
    ///
    /// Every validation runs before anything is written or any gateway
    /// resource is created.
    pub async fn create_cart_checkout(
        &self,
        request: &CheckoutRequest,
        ctx: &CheckoutContext,
    ) -> AppResult<CheckoutResponse> {
        let (email, steam_id) = validate_buyer(&request.email, &request.steam_id)?;
        let steam_id = steam_id.as_str();

        if request.items.is_empty() {
            return Err(AppError::BadRequest("Cart is empty".to_string()));
        }

        if request.items.iter().any(|item| item.kind() == "credits") {
            credits_restriction(self.stores.kv.as_ref(), steam_id)
                .await?
                .ensure_allowed(ctx.now)?;
        }

        let promo = self.resolve_promo(request.promo_code.as_deref(), steam_id, ctx.mode).await?;

        let resolved = resolve_cart(&request.items, ctx.mode);
        if resolved.is_empty() {
            return Err(AppError::BadRequest("No valid items in cart".to_string()));
        }
        let total = total_minor(&resolved);
        let line_items: Vec<_> = resolved.into_iter().map(|r| r.line_item).collect();

        let owner_coupon = if self.is_owner_checkout(steam_id, ctx) {
            self.ensure_owner_coupon(ctx.mode).await
        } else {
            None
        };

        let cart_id = normalize_cart_id(request.cart_id.as_deref(), ctx.now);
        let pending = PendingCart {
            cart_id: cart_id.clone(),
            steam_id: steam_id.to_string(),
            items: request.items.clone(),
            promo_code: promo.as_ref().map(|p| p.code.clone()).unwrap_or_default(),
            promo_code_id: promo.as_ref().map(|p| p.promo_code_id.clone()).unwrap_or_default(),
            coupon_id: promo.as_ref().map(|p| p.coupon_id.clone()).unwrap_or_default(),
            test_mode: ctx.mode.is_test(),
            created_at: ctx.now,
        };
        if let Err(e) = self.stores.carts.save(&pending).await {
            warn!("Failed to persist pending cart {}: {}", cart_id, e);
        }

        self.events.publish(PaymentEvent::CheckoutStarted(CheckoutStarted {
            cart_id: cart_id.clone(),
            steam_id: steam_id.to_string(),
            mode: ctx.mode,
            total_minor: total,
            currency: CURRENCY.to_string(),
            line_items: line_items.clone(),
            promo_code: promo.as_ref().map(|p| p.code.clone()),
            owner_discount: owner_coupon.is_some(),
        }));

        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), "cart".to_string());
        metadata.insert("cartId".to_string(), cart_id.clone());
        let success_query = format!("type=cart&cartId={}", urlencoding::encode(&cart_id));

        let draft = SessionDraft {
            steam_id,
            email,
            line_items,
            promo: promo.as_ref(),
            owner_coupon,
            metadata,
            success_query,
        };
        let session = self.open_session(ctx, draft).await?;
        info!(
            "Created {} checkout session {} for {} (cart {}, {} minor units)",
            ctx.mode, session.id, steam_id, cart_id, total
        );

        Ok(CheckoutResponse { session_id: session.id, url: session.url, cart_id })
    }

    /// Open a hosted checkout session for a single product.
    ///
    /// Sessions carry `type=pro|credits|spins|consumable` with the grant in
    /// their metadata, so fulfillment needs no pending cart.
    pub async fn create_item_checkout(
        &self,
        kind: ItemCheckoutKind,
        request: &ItemCheckoutRequest,
        ctx: &CheckoutContext,
    ) -> AppResult<ItemCheckoutResponse> {
        let (email, steam_id) = validate_buyer(&request.email, &request.steam_id)?;
        let steam_id = steam_id.as_str();

        let quantity = match kind {
            ItemCheckoutKind::Consumable => {
                let consumable_type = request.consumable_type.as_deref().unwrap_or("").trim();
                if find_consumable(consumable_type).is_none() {
                    return Err(AppError::BadRequest(kind.invalid_item_message().to_string()));
                }
                let quantity = strict_quantity(request.quantity.as_ref()).ok_or_else(|| {
                    AppError::BadRequest(format!("Invalid quantity. Must be between 1 and {}", CONSUMABLE_QTY_MAX))
                })?;
                Some(serde_json::Value::from(quantity))
            }
            ItemCheckoutKind::Credits | ItemCheckoutKind::Spins => request.quantity.clone(),
            ItemCheckoutKind::Pro => None,
        };
        let item = CartItem {
            kind: kind.as_str().to_string(),
            plan: request.plan.clone(),
            pack: request.pack.clone(),
            consumable_type: request.consumable_type.clone(),
            quantity,
        };
        let resolved = item
            .resolve(ctx.mode)
            .ok_or_else(|| AppError::BadRequest(kind.invalid_item_message().to_string()))?;

        if kind == ItemCheckoutKind::Credits {
            credits_restriction(self.stores.kv.as_ref(), steam_id)
                .await?
                .ensure_allowed(ctx.now)?;
        }

        let promo = self.resolve_promo(request.promo_code.as_deref(), steam_id, ctx.mode).await?;
        let owner_coupon = if self.is_owner_checkout(steam_id, ctx) {
            self.ensure_owner_coupon(ctx.mode).await
        } else {
            None
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), kind.as_str().to_string());
        match &resolved.grant {
            Grant::Pro { months } => {
                metadata.insert("months".to_string(), months.to_string());
                metadata.insert("plan".to_string(), item.plan.as_deref().unwrap_or("").trim().to_string());
            }
            Grant::Credits { amount } => {
                metadata.insert("credits".to_string(), amount.to_string());
                metadata.insert("pack".to_string(), item.pack.as_deref().unwrap_or("").trim().to_string());
            }
            Grant::Spins { amount } => {
                metadata.insert("spins".to_string(), amount.to_string());
                metadata.insert("pack".to_string(), item.pack.as_deref().unwrap_or("").trim().to_string());
            }
            Grant::Consumable { consumable_type, quantity } => {
                metadata.insert("consumableType".to_string(), consumable_type.clone());
                metadata.insert("quantity".to_string(), quantity.to_string());
            }
        }
        let success_query = metadata
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let total = total_minor(std::slice::from_ref(&resolved));
        let draft = SessionDraft {
            steam_id,
            email,
            line_items: vec![resolved.line_item],
            promo: promo.as_ref(),
            owner_coupon,
            metadata,
            success_query,
        };
        let session = self.open_session(ctx, draft).await?;
        info!(
            "Created {} {} checkout session {} for {} ({} minor units)",
            ctx.mode,
            kind.as_str(),
            session.id,
            steam_id,
            total
        );

        Ok(ItemCheckoutResponse { session_id: session.id, url: session.url })
    }

    /// Discounts, shared metadata and redirect URLs around `create_session_with_fallback`.
    async fn open_session(&self, ctx: &CheckoutContext, draft: SessionDraft<'_>) -> AppResult<CheckoutSession> {
        let SessionDraft { steam_id, email, line_items, promo, owner_coupon, mut metadata, success_query } = draft;
        let discounts = match (&owner_coupon, promo) {
            (Some(coupon), _) => vec![Discount::Coupon(coupon.clone())],
            (None, Some(p)) => vec![Discount::PromotionCode(p.promo_code_id.clone())],
            (None, None) => Vec::new(),
        };

        metadata.insert("steamId".to_string(), steam_id.to_string());
        metadata.insert("promoCode".to_string(), promo.map(|p| p.code.clone()).unwrap_or_default());
        metadata.insert("promoCodeId".to_string(), promo.map(|p| p.promo_code_id.clone()).unwrap_or_default());
        metadata.insert("couponId".to_string(), promo.map(|p| p.coupon_id.clone()).unwrap_or_default());
        metadata.insert("ownerDiscount".to_string(), owner_coupon.is_some().to_string());
        metadata.insert("testMode".to_string(), ctx.mode.metadata_flag().to_string());

        let origin = ctx.origin.trim_end_matches('/');
        let params = CreateCheckoutSession {
            line_items,
            currency: CURRENCY.to_string(),
            customer_email: email,
            discounts,
            payment_intent_metadata: metadata.clone(),
            metadata,
            success_url: format!(
                "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&steamId={}&{}",
                origin, steam_id, success_query
            ),
            cancel_url: format!("{}/payment/cancel?session_id={{CHECKOUT_SESSION_ID}}", origin),
            expires_at: (ctx.now + Duration::minutes(SESSION_TTL_MINUTES)).timestamp(),
            payment_method_types: Vec::new(),
        };

        Ok(self.create_session_with_fallback(ctx.mode, params).await?)
    }

    async fn resolve_promo(
        &self,
        raw_code: Option<&str>,
        steam_id: &str,
        mode: GatewayMode,
    ) -> AppResult<Option<PromoCode>> {
        let code = raw_code.map(str::trim).unwrap_or("");
        if code.is_empty() {
            return Ok(None);
        }

        let promo = self
            .stores
            .promos
            .find_by_code(code, mode)
            .await?
            .ok_or_else(|| AppError::BadRequest("Invalid promo code".to_string()))?;

        if promo.single_use_per_user && self.stores.promos.has_redeemed(steam_id, &promo.promo_code_id).await? {
            return Err(AppError::BadRequest("Promo code already used".to_string()));
        }

        Ok(Some(promo))
    }

    fn is_owner_checkout(&self, steam_id: &str, ctx: &CheckoutContext) -> bool {
        self.settings.is_owner(steam_id) && ctx.session_steam_id.as_deref() == Some(steam_id)
    }

    /// Fixed-id 100% coupon for owner test purchases. `None` when it cannot be
    /// found or created, in which case the owner pays like everyone else.
    async fn ensure_owner_coupon(&self, mode: GatewayMode) -> Option<String> {
        let coupon_id = self.settings.stripe.owner_free_coupon_id.clone();
        match self.gateway.retrieve_coupon(mode, &coupon_id).await {
            Ok(Some(_)) => return Some(coupon_id),
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to look up owner coupon {}: {}", coupon_id, e);
                return None;
            }
        }

        let params = CreateCoupon {
            id: Some(coupon_id.clone()),
            name: Some("Owner (free)".to_string()),
            value: CouponValue::PercentOff(100.0),
            duration: COUPON_DURATION_FOREVER.to_string(),
            redeem_by: None,
        };
        match self.gateway.create_coupon(mode, &params).await {
            Ok(coupon) => Some(coupon.id),
            Err(e) => {
                warn!("Failed to create owner coupon {}: {}", coupon_id, e);
                None
            }
        }
    }

    /// Drops payment method types the account rejects, one per attempt, and
    /// ends with a card-only attempt once the list runs out.
    async fn create_session_with_fallback(
        &self,
        mode: GatewayMode,
        mut params: CreateCheckoutSession,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let mut remaining: Vec<String> = Vec::new();
        for method in PAYMENT_METHOD_TYPES.iter().copied() {
            if !remaining.iter().any(|m| m == method) {
                remaining.push(method.to_string());
            }
        }

        for _ in 0..=PAYMENT_METHOD_TYPES.len() {
            params.payment_method_types = remaining.clone();
            let error = match self.gateway.create_checkout_session(mode, &params).await {
                Ok(session) => return Ok(session),
                Err(e) => e,
            };

            let Some(rejected) = invalid_payment_method_type(&error) else {
                return Err(error);
            };
            let before = remaining.len();
            remaining.retain(|m| *m != rejected);
            if remaining.len() == before {
                return Err(error);
            }
            warn!("Payment method type {} rejected in {} mode, retrying without it", rejected, mode);
            if remaining.is_empty() {
                break;
            }
        }

        params.payment_method_types = vec!["card".to_string()];
        self.gateway.create_checkout_session(mode, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::kv_repository::CREDITS_BANNED_KEY;
    use crate::db::{KeyValueStore, MemoryStore, PendingCartStore, PromoStore};
    use crate::models::{PromoKind, PromoRedemption};
    use crate::services::purchase_events::PaymentEventReceiver;
    use crate::test_support::{BUYER, FakeGateway, OWNER, api_error, test_settings};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: FakeGateway,
        service: CheckoutService,
        events: PaymentEventReceiver,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = FakeGateway::new();
        let (sender, events) = PaymentEventSender::channel();
        let service = CheckoutService::new(
            Arc::new(test_settings()),
            Stores::in_memory(store.clone()),
            Arc::new(gateway.clone()),
            sender,
        );
        Harness { store, gateway, service, events }
    }

    fn ctx(mode: GatewayMode) -> CheckoutContext {
        CheckoutContext {
            mode,
            origin: "https://skinvaults.online".into(),
            session_steam_id: None,
            now: Utc::now(),
        }
    }

    fn request(items: serde_json::Value) -> CheckoutRequest {
        serde_json::from_value(json!({
            "steamId": BUYER,
            "email": "Buyer@Example.com",
            "items": items,
        }))
        .unwrap()
    }

    fn promo(code: &str, single_use: bool, test_mode: bool) -> PromoCode {
        let now = Utc::now();
        PromoCode {
            promo_code_id: format!("promo_{}", code.to_lowercase()),
            coupon_id: format!("coupon_{}", code.to_lowercase()),
            code: code.into(),
            name: None,
            kind: PromoKind::Percent,
            percent_off: Some(20.0),
            amount_off: None,
            currency: None,
            max_redemptions: None,
            starts_at: None,
            auto_enable_at_start: false,
            expires_at: None,
            active: true,
            single_use_per_user: single_use,
            creator_slug: None,
            test_mode,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn bad_request(err: AppError) -> String {
        match err {
            AppError::BadRequest(m) => m,
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn validation_failures_have_no_side_effects() {
        let h = harness();

        let mut no_email = request(json!([{"kind": "credits", "pack": "starter"}]));
        no_email.email = "nope".into();
        assert_eq!(
            bad_request(h.service.create_cart_checkout(&no_email, &ctx(GatewayMode::Live)).await.unwrap_err()),
            "Valid email is required"
        );

        let mut bad_steam = request(json!([{"kind": "credits", "pack": "starter"}]));
        bad_steam.steam_id = "123".into();
        assert!(matches!(
            h.service.create_cart_checkout(&bad_steam, &ctx(GatewayMode::Live)).await,
            Err(AppError::Unauthorized(_))
        ));

        let empty = request(json!([]));
        assert_eq!(
            bad_request(h.service.create_cart_checkout(&empty, &ctx(GatewayMode::Live)).await.unwrap_err()),
            "Cart is empty"
        );

        let unknown = request(json!([{"kind": "skins"}, {"kind": "pro", "plan": "forever"}]));
        assert_eq!(
            bad_request(h.service.create_cart_checkout(&unknown, &ctx(GatewayMode::Live)).await.unwrap_err()),
            "No valid items in cart"
        );

        assert!(h.gateway.session_calls().is_empty());
        assert!(PendingCartStore::get(h.store.as_ref(), "anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_items_are_dropped_from_the_session() {
        let mut h = harness();
        let req = request(json!([
            {"kind": "credits", "pack": "starter"},
            {"kind": "mystery", "pack": "starter"}
        ]));
        let response = h.service.create_cart_checkout(&req, &ctx(GatewayMode::Live)).await.unwrap();

        let calls = h.gateway.session_calls();
        assert_eq!(calls.len(), 1);
        let (mode, params) = &calls[0];
        assert_eq!(*mode, GatewayMode::Live);
        assert_eq!(params.line_items.len(), 1);
        assert_eq!(params.line_items[0].name, "Credits - Starter Pack");
        assert_eq!(params.customer_email, "buyer@example.com");
        assert_eq!(params.metadata.get("type").map(String::as_str), Some("cart"));
        assert_eq!(params.metadata.get("cartId"), Some(&response.cart_id));
        assert!(params.success_url.contains("session_id={CHECKOUT_SESSION_ID}"));
        assert!(params.discounts.is_empty());

        let pending = PendingCartStore::get(h.store.as_ref(), &response.cart_id).await.unwrap().unwrap();
        assert_eq!(pending.steam_id, BUYER);
        assert_eq!(pending.items.len(), 2);

        match h.events.try_recv().unwrap().as_ref() {
            PaymentEvent::CheckoutStarted(started) => assert_eq!(started.total_minor, 199),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn banned_users_cannot_buy_credits() {
        let h = harness();
        KeyValueStore::set(h.store.as_ref(), CREDITS_BANNED_KEY, json!([BUYER])).await.unwrap();

        let credits = request(json!([{"kind": "credits", "pack": "value"}]));
        assert!(matches!(
            h.service.create_cart_checkout(&credits, &ctx(GatewayMode::Live)).await,
            Err(AppError::Forbidden(_))
        ));

        let pro = request(json!([{"kind": "pro", "plan": "1month"}]));
        assert!(h.service.create_cart_checkout(&pro, &ctx(GatewayMode::Live)).await.is_ok());
        assert_eq!(h.gateway.session_calls().len(), 1);
    }

    #[tokio::test]
    async fn promo_codes_resolve_per_mode_and_respect_single_use() {
        let h = harness();
        PromoStore::insert(h.store.as_ref(), &promo("LAUNCH20", true, true)).await.unwrap();

        let mut req = request(json!([{"kind": "credits", "pack": "starter"}]));
        req.promo_code = Some(" launch20 ".into());

        let err = h.service.create_cart_checkout(&req, &ctx(GatewayMode::Live)).await.unwrap_err();
        assert_eq!(bad_request(err), "Invalid promo code");

        h.service.create_cart_checkout(&req, &ctx(GatewayMode::Test)).await.unwrap();
        let (_, params) = h.gateway.session_calls().pop().unwrap();
        assert_eq!(params.discounts, vec![Discount::PromotionCode("promo_launch20".into())]);
        assert_eq!(params.metadata.get("promoCodeId").map(String::as_str), Some("promo_launch20"));
        assert!(params.line_items[0].name.starts_with("[TEST] "));

        PromoStore::record_redemption(
            h.store.as_ref(),
            &PromoRedemption {
                steam_id: BUYER.into(),
                promo_code_id: "promo_launch20".into(),
                session_id: "cs_test_1".into(),
                used_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        let err = h.service.create_cart_checkout(&req, &ctx(GatewayMode::Test)).await.unwrap_err();
        assert_eq!(bad_request(err), "Promo code already used");
    }

    #[tokio::test]
    async fn owner_discount_requires_a_matching_session() {
        let h = harness();
        PromoStore::insert(h.store.as_ref(), &promo("LAUNCH20", false, false)).await.unwrap();
        let mut req = request(json!([{"kind": "pro", "plan": "3months"}]));
        req.steam_id = OWNER.into();
        req.promo_code = Some("LAUNCH20".into());

        h.service.create_cart_checkout(&req, &ctx(GatewayMode::Live)).await.unwrap();
        let (_, params) = h.gateway.session_calls().pop().unwrap();
        assert_eq!(params.discounts, vec![Discount::PromotionCode("promo_launch20".into())]);

        let mut owner_ctx = ctx(GatewayMode::Live);
        owner_ctx.session_steam_id = Some(OWNER.into());
        h.service.create_cart_checkout(&req, &owner_ctx).await.unwrap();
        let (_, params) = h.gateway.session_calls().pop().unwrap();
        assert_eq!(params.discounts, vec![Discount::Coupon("skinvaults_owner_free".into())]);
        assert_eq!(params.metadata.get("ownerDiscount").map(String::as_str), Some("true"));

        // Coupon is created once and reused afterwards.
        h.service.create_cart_checkout(&req, &owner_ctx).await.unwrap();
        assert_eq!(h.gateway.created_coupons().len(), 1);
    }

    #[tokio::test]
    async fn rejected_payment_methods_are_dropped_one_at_a_time() {
        let h = harness();
        h.gateway.fail_sessions_with(vec![
            api_error(400, "The payment method type provided: klarna is invalid."),
            api_error(400, "The payment method type provided: p24 is invalid."),
        ]);

        let req = request(json!([{"kind": "consumable", "consumableType": "wishlist_slot", "quantity": 2}]));
        let response = h.service.create_cart_checkout(&req, &ctx(GatewayMode::Live)).await.unwrap();
        assert!(response.url.is_some());

        let calls = h.gateway.session_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1.payment_method_types.len(), 10);
        assert!(!calls[1].1.payment_method_types.contains(&"klarna".to_string()));
        let last = &calls[2].1.payment_method_types;
        assert_eq!(last.len(), 8);
        assert!(!last.contains(&"p24".to_string()));
    }

    #[tokio::test]
    async fn other_gateway_errors_propagate() {
        let h = harness();
        h.gateway.fail_sessions_with(vec![api_error(400, "Amount must be at least 0.50 eur")]);

        let req = request(json!([{"kind": "credits", "pack": "starter"}]));
        let err = h.service.create_cart_checkout(&req, &ctx(GatewayMode::Live)).await.unwrap_err();
        assert!(matches!(err, AppError::Payment(_)));
        assert_eq!(h.gateway.session_calls().len(), 1);
    }

    fn item_request(body: serde_json::Value) -> ItemCheckoutRequest {
        let mut body = body;
        body["steamId"] = json!(BUYER);
        body["email"] = json!("buyer@example.com");
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn single_items_carry_their_grant_in_metadata() {
        let h = harness();
        let cases = [
            (ItemCheckoutKind::Pro, json!({ "plan": "3months" }), vec![("type", "pro"), ("months", "3"), ("plan", "3months")]),
            (ItemCheckoutKind::Credits, json!({ "pack": "value" }), vec![("type", "credits"), ("credits", "1500"), ("pack", "value")]),
            (ItemCheckoutKind::Spins, json!({ "pack": "mega" }), vec![("type", "spins"), ("spins", "40"), ("pack", "mega")]),
            (
                ItemCheckoutKind::Consumable,
                json!({ "type": "wishlist_slot", "quantity": 3 }),
                vec![("type", "consumable"), ("consumableType", "wishlist_slot"), ("quantity", "3")],
            ),
        ];

        for (kind, body, expected) in cases {
            let response = h.service.create_item_checkout(kind, &item_request(body), &ctx(GatewayMode::Live)).await.unwrap();
            let (_, params) = h.gateway.session_calls().pop().unwrap();
            assert_eq!(params.metadata.get("steamId").map(String::as_str), Some(BUYER));
            for (key, value) in expected {
                assert_eq!(params.metadata.get(key).map(String::as_str), Some(value), "{:?} {}", kind, key);
            }
            assert!(!params.metadata.contains_key("cartId"));
            assert_eq!(params.line_items.len(), 1);
            assert!(params.success_url.contains(&format!("type={}", kind.as_str())));
            assert!(response.url.is_some());
        }

        assert!(PendingCartStore::get(h.store.as_ref(), "anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn single_item_validation() {
        let h = harness();
        let live = ctx(GatewayMode::Live);

        let cases = [
            (ItemCheckoutKind::Pro, json!({ "plan": "12months" }), "Invalid plan"),
            (ItemCheckoutKind::Credits, json!({ "pack": "huge" }), "Invalid credit pack"),
            (ItemCheckoutKind::Spins, json!({}), "Invalid spins pack"),
            (ItemCheckoutKind::Consumable, json!({ "type": "gold", "quantity": 1 }), "Invalid consumable type"),
            (ItemCheckoutKind::Consumable, json!({ "type": "wishlist_slot", "quantity": 0 }), "Invalid quantity. Must be between 1 and 100"),
            (ItemCheckoutKind::Consumable, json!({ "type": "wishlist_slot", "quantity": 101 }), "Invalid quantity. Must be between 1 and 100"),
            (ItemCheckoutKind::Consumable, json!({ "type": "wishlist_slot" }), "Invalid quantity. Must be between 1 and 100"),
        ];
        for (kind, body, message) in cases {
            let err = h.service.create_item_checkout(kind, &item_request(body), &live).await.unwrap_err();
            assert_eq!(bad_request(err), message);
        }

        let mut anonymous = item_request(json!({ "pack": "starter" }));
        anonymous.steam_id = String::new();
        assert!(matches!(
            h.service.create_item_checkout(ItemCheckoutKind::Credits, &anonymous, &live).await,
            Err(AppError::Unauthorized(_))
        ));

        KeyValueStore::set(h.store.as_ref(), CREDITS_BANNED_KEY, json!([BUYER])).await.unwrap();
        let credits = item_request(json!({ "pack": "starter" }));
        assert!(matches!(
            h.service.create_item_checkout(ItemCheckoutKind::Credits, &credits, &live).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(h.service.create_item_checkout(ItemCheckoutKind::Spins, &credits, &live).await.is_ok());
        assert_eq!(h.gateway.session_calls().len(), 1);
    }

    #[tokio::test]
    async fn single_items_share_promo_and_owner_rules() {
        let h = harness();
        PromoStore::insert(h.store.as_ref(), &promo("LAUNCH20", false, false)).await.unwrap();

        let mut req = item_request(json!({ "plan": "1month", "promoCode": "launch20" }));
        h.service.create_item_checkout(ItemCheckoutKind::Pro, &req, &ctx(GatewayMode::Live)).await.unwrap();
        let (_, params) = h.gateway.session_calls().pop().unwrap();
        assert_eq!(params.discounts, vec![Discount::PromotionCode("promo_launch20".into())]);
        assert_eq!(params.metadata.get("promoCode").map(String::as_str), Some("LAUNCH20"));

        req.steam_id = OWNER.into();
        let mut owner_ctx = ctx(GatewayMode::Live);
        owner_ctx.session_steam_id = Some(OWNER.into());
        h.service.create_item_checkout(ItemCheckoutKind::Pro, &req, &owner_ctx).await.unwrap();
        let (_, params) = h.gateway.session_calls().pop().unwrap();
        assert_eq!(params.discounts, vec![Discount::Coupon("skinvaults_owner_free".into())]);
    }
}
