//! Shared fixtures for service and handler tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::config::AppSettings;
use crate::config::settings::{
    AppConfig, AuthConfig, DatabaseConfig, NotificationConfig, RetentionConfig, ServerConfig, StripeConfig,
};
use crate::db::{MemoryStore, Stores};
use crate::middleware::steam_session::{SESSION_COOKIE, issue_session_token};
use crate::models::{AppState, GatewayMode};
use crate::services::purchase_events::{PaymentEventReceiver, PaymentEventSender};
use crate::services::stripe_service::{PaymentGateway, StripeServiceError};
use crate::stripe_types::{
    CheckoutSession, Coupon, CouponValue, CreateCheckoutSession, CreateCoupon, CreatePromotionCode, PromotionCode,
};

pub const BUYER: &str = "76561198000000001";
pub const OWNER: &str = "76561198000000099";
pub const ADMIN: &str = "76561198000000077";
pub const LIVE_WEBHOOK_SECRET: &str = "whsec_live_secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const SESSION_SECRET: &str = "session-secret-for-tests";

pub fn test_settings() -> AppSettings {
    AppSettings {
        app: AppConfig { name: "skinvaults-payments".into(), environment: "test".into() },
        database: DatabaseConfig { url: None, run_migrations: false },
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: vec!["*".into()],
            public_base_url: "https://skinvaults.online".into(),
        },
        auth: AuthConfig {
            session_secret: SESSION_SECRET.into(),
            owner_steam_ids: vec![OWNER.into()],
            admin_steam_ids: vec![ADMIN.into()],
        },
        stripe: StripeConfig {
            secret_key: "sk_live_test".into(),
            test_secret_key: "sk_test_test".into(),
            webhook_secret: Some(LIVE_WEBHOOK_SECRET.into()),
            test_webhook_secret: Some(TEST_WEBHOOK_SECRET.into()),
            api_base: "http://127.0.0.1:9".into(),
            webhook_tolerance_secs: 300,
            request_timeout_secs: 5,
            owner_free_coupon_id: "skinvaults_owner_free".into(),
        },
        notifications: NotificationConfig::default(),
        retention: RetentionConfig { failed_purchases_keep: 100 },
    }
}

/// Application state over the in-memory store and a fake gateway.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub gateway: FakeGateway,
    pub state: AppState,
    pub events: PaymentEventReceiver,
}

pub fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let gateway = FakeGateway::new();
    let (sender, events) = PaymentEventSender::channel();
    let state = AppState::new(
        Arc::new(test_settings()),
        Stores::in_memory(store.clone()),
        Arc::new(gateway.clone()),
        sender,
    )
    .unwrap();
    TestApp { store, gateway, state, events }
}

pub fn session_cookie(steam_id: &str) -> actix_web::cookie::Cookie<'static> {
    let token = issue_session_token(SESSION_SECRET, steam_id, chrono::Duration::hours(1)).unwrap();
    actix_web::cookie::Cookie::new(SESSION_COOKIE, token)
}

pub fn api_error(status: u16, message: &str) -> StripeServiceError {
    StripeServiceError::Api { status, code: None, param: None, message: message.to_string() }
}

#[derive(Default)]
struct FakeState {
    session_calls: Vec<(GatewayMode, CreateCheckoutSession)>,
    session_errors: VecDeque<StripeServiceError>,
    sessions: HashMap<String, CheckoutSession>,
    coupons: HashMap<String, Coupon>,
    created_coupons: Vec<(GatewayMode, CreateCoupon)>,
    deleted_coupons: Vec<String>,
    promotion_codes: HashMap<String, PromotionCode>,
    promotion_code_errors: VecDeque<StripeServiceError>,
    activations: Vec<(String, bool)>,
    fail_activation: bool,
}

/// In-process gateway with scripted failures and recorded calls.
#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next checkout session creations fail with these errors, in order.
    pub fn fail_sessions_with(&self, errors: Vec<StripeServiceError>) {
        self.state.lock().unwrap().session_errors.extend(errors);
    }

    pub fn fail_promotion_codes_with(&self, errors: Vec<StripeServiceError>) {
        self.state.lock().unwrap().promotion_code_errors.extend(errors);
    }

    pub fn fail_activations(&self) {
        self.state.lock().unwrap().fail_activation = true;
    }

    pub fn insert_session(&self, session: CheckoutSession) {
        self.state.lock().unwrap().sessions.insert(session.id.clone(), session);
    }

    pub fn session_calls(&self) -> Vec<(GatewayMode, CreateCheckoutSession)> {
        self.state.lock().unwrap().session_calls.clone()
    }

    pub fn created_coupons(&self) -> Vec<(GatewayMode, CreateCoupon)> {
        self.state.lock().unwrap().created_coupons.clone()
    }

    pub fn deleted_coupons(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_coupons.clone()
    }

    pub fn activations(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().activations.clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        mode: GatewayMode,
        params: &CreateCheckoutSession,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let mut state = self.state.lock().unwrap();
        state.session_calls.push((mode, params.clone()));
        if let Some(err) = state.session_errors.pop_front() {
            return Err(err);
        }
        let prefix = if mode.is_test() { "cs_test" } else { "cs_live" };
        let id = format!("{}_{}", prefix, state.session_calls.len());
        Ok(CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.stripe.test/{}", id)),
            status: Some("open".into()),
            payment_status: Some("unpaid".into()),
            payment_intent: None,
            customer: None,
            customer_email: Some(params.customer_email.clone()),
            customer_details: None,
            amount_total: None,
            currency: Some(params.currency.clone()),
            metadata: Some(params.metadata.clone().into_iter().collect()),
            created: None,
            expires_at: Some(params.expires_at),
        })
    }

    async fn retrieve_checkout_session(
        &self,
        _mode: GatewayMode,
        session_id: &str,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| api_error(404, "No such checkout.session"))
    }

    async fn retrieve_coupon(
        &self,
        _mode: GatewayMode,
        coupon_id: &str,
    ) -> Result<Option<Coupon>, StripeServiceError> {
        Ok(self.state.lock().unwrap().coupons.get(coupon_id).cloned())
    }

    async fn create_coupon(&self, mode: GatewayMode, params: &CreateCoupon) -> Result<Coupon, StripeServiceError> {
        let mut state = self.state.lock().unwrap();
        state.created_coupons.push((mode, params.clone()));
        let id = params.id.clone().unwrap_or_else(|| format!("coupon_{}", state.created_coupons.len()));
        let (percent_off, amount_off, currency) = match &params.value {
            CouponValue::PercentOff(p) => (Some(*p), None, None),
            CouponValue::AmountOff { amount, currency } => (None, Some(*amount), Some(currency.clone())),
        };
        let coupon = Coupon {
            id: id.clone(),
            name: params.name.clone(),
            percent_off,
            amount_off,
            currency,
            duration: Some(params.duration.clone()),
            redeem_by: params.redeem_by,
            valid: true,
            times_redeemed: 0,
        };
        state.coupons.insert(id, coupon.clone());
        Ok(coupon)
    }

    async fn delete_coupon(&self, _mode: GatewayMode, coupon_id: &str) -> Result<(), StripeServiceError> {
        let mut state = self.state.lock().unwrap();
        state.coupons.remove(coupon_id);
        state.deleted_coupons.push(coupon_id.to_string());
        Ok(())
    }

    async fn create_promotion_code(
        &self,
        _mode: GatewayMode,
        params: &CreatePromotionCode,
    ) -> Result<PromotionCode, StripeServiceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.promotion_code_errors.pop_front() {
            return Err(err);
        }
        let id = format!("promo_{}", state.promotion_codes.len() + 1);
        let promo = PromotionCode {
            id: id.clone(),
            code: params.code.clone(),
            active: params.active,
            coupon: Some(crate::stripe_types::Expandable::Id(params.coupon.clone())),
            expires_at: params.expires_at,
            max_redemptions: params.max_redemptions,
            times_redeemed: 0,
        };
        state.promotion_codes.insert(id, promo.clone());
        Ok(promo)
    }

    async fn set_promotion_code_active(
        &self,
        _mode: GatewayMode,
        promotion_code_id: &str,
        active: bool,
    ) -> Result<PromotionCode, StripeServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_activation {
            return Err(api_error(500, "gateway unavailable"));
        }
        state.activations.push((promotion_code_id.to_string(), active));
        let promo = state
            .promotion_codes
            .entry(promotion_code_id.to_string())
            .or_insert_with(|| PromotionCode {
                id: promotion_code_id.to_string(),
                code: String::new(),
                active,
                coupon: None,
                expires_at: None,
                max_redemptions: None,
                times_redeemed: 0,
            });
        promo.active = active;
        Ok(promo.clone())
    }

    async fn retrieve_promotion_code(
        &self,
        _mode: GatewayMode,
        promotion_code_id: &str,
    ) -> Result<Option<PromotionCode>, StripeServiceError> {
        Ok(self.state.lock().unwrap().promotion_codes.get(promotion_code_id).cloned())
    }
}
