//! Promo codes mirrored between the local store and the gateway's coupon +
//! promotion code pair.
//!
//! Redemption limits and expiry are fixed once the gateway objects exist;
//! everything else is local metadata or the promotion code's active flag.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::sync::Arc;

use crate::db::Stores;
use crate::error::{AppError, AppResult};
use crate::models::cart::CURRENCY;
use crate::models::{GatewayMode, PromoCode, PromoKind};
use crate::services::stripe_service::PaymentGateway;
use crate::stripe_types::{COUPON_DURATION_ONCE, Coupon, CouponValue, CreateCoupon, CreatePromotionCode, PromotionCode};

pub const IMMUTABLE_LIMITS_MESSAGE: &str = "Stripe does not allow updating max redemptions or expiry for existing promo codes. Create a new promo code instead.";

/// Truthy query flag: `1`, `true`, `yes` or `on`.
pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn parse_max_redemptions(value: Option<&Value>) -> AppResult<Option<i64>> {
    match value {
        None => Ok(None),
        Some(v) if is_blank(v) => Ok(None),
        Some(v) => number(v)
            .map(|n| Some((n.floor() as i64).max(1)))
            .ok_or_else(|| AppError::BadRequest("maxRedemptions must be a number".to_string())),
    }
}

fn parse_instant(field: &str, value: Option<&Value>) -> AppResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(v) if is_blank(v) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| AppError::BadRequest(format!("{} must be an ISO-8601 timestamp", field))),
        Some(_) => Err(AppError::BadRequest(format!("{} must be an ISO-8601 timestamp", field))),
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn clean_slug(value: Option<&str>) -> Option<String> {
    clean(value).map(|s| s.to_lowercase())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub include_deleted: bool,
    pub include_all_modes: bool,
    pub include_live: bool,
}

/// Gateway-side state of a promo, attached on request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveState {
    pub promo: Option<PromotionCode>,
    pub coupon: Option<Coupon>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromoView {
    #[serde(flatten)]
    pub promo: PromoCode,
    pub live: Option<LiveState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoListing {
    pub test_mode: bool,
    pub promos: Vec<PromoView>,
}

/// What the storefront may show without authentication.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPromo {
    pub code: String,
    pub name: Option<String>,
    pub kind: PromoKind,
    pub percent_off: Option<f64>,
    pub amount_off: Option<i64>,
    pub currency: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePromoRequest {
    #[serde(default)]
    pub code: String,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub percent_off: Option<Value>,
    pub amount_off: Option<Value>,
    pub currency: Option<String>,
    pub max_redemptions: Option<Value>,
    pub starts_at: Option<Value>,
    pub expires_at: Option<Value>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub single_use_per_user: bool,
    pub creator_slug: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    #[serde(default)]
    pub promo_code_id: String,
    #[serde(default)]
    pub active: bool,
}

/// Absent fields keep their stored value. `null` clears the optional ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromoRequest {
    #[serde(default)]
    pub promo_code_id: String,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub name: Option<Option<String>>,
    pub active: Option<bool>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub starts_at: Option<Option<Value>>,
    pub auto_enable_at_start: Option<bool>,
    pub single_use_per_user: Option<bool>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub creator_slug: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub max_redemptions: Option<Option<Value>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub expires_at: Option<Option<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePromoRequest {
    #[serde(default)]
    pub promo_code_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PromoAction {
    Create(CreatePromoRequest),
    SetActive(SetActiveRequest),
    Update(UpdatePromoRequest),
    Delete(DeletePromoRequest),
}

/// Whether a promo should be live now, and whether it waits for its start instead.
fn activation(requested: bool, starts_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> (bool, bool) {
    let started = starts_at.is_none_or(|starts| now >= starts);
    (requested && started, requested && !started)
}

#[derive(Clone)]
pub struct PromoService {
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
}

impl PromoService {
    pub fn new(stores: Stores, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { stores, gateway }
    }

    /// Auto-enable due promos, then list. Gateway failures leave a promo for the next sweep.
    pub async fn list(&self, mode: GatewayMode, options: ListOptions, now: DateTime<Utc>) -> AppResult<PromoListing> {
        let mut all = self.stores.promos.list().await?;

        for promo in all.iter_mut() {
            if !options.include_all_modes && promo.mode() != mode {
                continue;
            }
            if !promo.due_for_auto_enable(now) {
                continue;
            }
            if !promo.active {
                if let Err(e) = self.gateway.set_promotion_code_active(promo.mode(), &promo.promo_code_id, true).await {
                    warn!("Auto-enable of promo {} failed: {}", promo.code, e);
                    continue;
                }
                info!("Auto-enabled promo {} at its start time", promo.code);
            }
            promo.active = true;
            promo.auto_enable_at_start = false;
            promo.updated_at = now;
            self.stores.promos.update(promo).await?;
        }

        let mut promos = Vec::new();
        for promo in all {
            if !options.include_all_modes && promo.mode() != mode {
                continue;
            }
            if !options.include_deleted && promo.is_deleted() {
                continue;
            }
            let live = if options.include_live { Some(self.live_state(&promo).await) } else { None };
            promos.push(PromoView { promo, live });
        }

        Ok(PromoListing { test_mode: mode.is_test(), promos })
    }

    async fn live_state(&self, promo: &PromoCode) -> LiveState {
        let mode = promo.mode();
        let live_promo = self
            .gateway
            .retrieve_promotion_code(mode, &promo.promo_code_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Could not load gateway promotion code {}: {}", promo.promo_code_id, e);
                None
            });
        let coupon = self.gateway.retrieve_coupon(mode, &promo.coupon_id).await.unwrap_or_else(|e| {
            warn!("Could not load gateway coupon {}: {}", promo.coupon_id, e);
            None
        });
        LiveState { promo: live_promo, coupon }
    }

    pub async fn apply(&self, mode: GatewayMode, action: PromoAction, now: DateTime<Utc>) -> AppResult<Option<PromoCode>> {
        match action {
            PromoAction::Create(req) => self.create(mode, &req, now).await.map(Some),
            PromoAction::SetActive(req) => self.set_active(&req.promo_code_id, req.active, now).await.map(Some),
            PromoAction::Update(req) => self.update(&req, now).await.map(Some),
            PromoAction::Delete(req) => self.delete(&req.promo_code_id, now).await.map(|_| None),
        }
    }

    pub async fn create(&self, mode: GatewayMode, req: &CreatePromoRequest, now: DateTime<Utc>) -> AppResult<PromoCode> {
        let code = req.code.trim().to_string();
        if code.is_empty() {
            return Err(AppError::BadRequest("Code is required".to_string()));
        }
        let name = clean(req.name.as_deref());
        let currency = clean(req.currency.as_deref()).map(|c| c.to_lowercase()).unwrap_or_else(|| CURRENCY.to_string());

        let kind = if req.kind.as_deref().map(str::trim) == Some("amount") { PromoKind::Amount } else { PromoKind::Percent };
        let value = match kind {
            PromoKind::Percent => {
                let percent = req
                    .percent_off
                    .as_ref()
                    .and_then(number)
                    .filter(|p| *p > 0.0 && *p <= 100.0)
                    .ok_or_else(|| AppError::BadRequest("Percent off must be between 1 and 100".to_string()))?;
                CouponValue::PercentOff((percent * 100.0).round() / 100.0)
            }
            PromoKind::Amount => {
                let amount = req
                    .amount_off
                    .as_ref()
                    .and_then(number)
                    .map(f64::floor)
                    .filter(|a| *a >= 1.0)
                    .ok_or_else(|| {
                        AppError::BadRequest("Amount off must be a positive number (in cents)".to_string())
                    })?;
                CouponValue::AmountOff { amount: amount as i64, currency: currency.clone() }
            }
        };

        let max_redemptions = parse_max_redemptions(req.max_redemptions.as_ref())?;
        let starts_at = parse_instant("startsAt", req.starts_at.as_ref())?;
        let expires_at = parse_instant("expiresAt", req.expires_at.as_ref())?;

        if self.stores.promos.find_by_code(&code, mode).await?.is_some() {
            return Err(AppError::Conflict(format!("Promo code {} already exists", code)));
        }

        let coupon = self
            .gateway
            .create_coupon(
                mode,
                &CreateCoupon {
                    id: None,
                    name: name.clone(),
                    value: value.clone(),
                    duration: COUPON_DURATION_ONCE.to_string(),
                    redeem_by: expires_at.map(|dt| dt.timestamp()),
                },
            )
            .await?;

        let (active, auto_enable_at_start) = activation(req.active, starts_at, now);
        let promotion = self
            .gateway
            .create_promotion_code(
                mode,
                &CreatePromotionCode {
                    coupon: coupon.id.clone(),
                    code: code.clone(),
                    active,
                    expires_at: expires_at.map(|dt| dt.timestamp()),
                    max_redemptions,
                },
            )
            .await;
        let promotion = match promotion {
            Ok(promotion) => promotion,
            Err(e) => {
                if let Err(cleanup) = self.gateway.delete_coupon(mode, &coupon.id).await {
                    warn!("Orphaned coupon {} after promotion code failure: {}", coupon.id, cleanup);
                }
                return Err(e.into());
            }
        };

        let (percent_off, amount_off, currency) = match value {
            CouponValue::PercentOff(p) => (Some(p), None, None),
            CouponValue::AmountOff { amount, currency } => (None, Some(amount), Some(currency)),
        };
        let promo = PromoCode {
            promo_code_id: promotion.id,
            coupon_id: coupon.id,
            code,
            name,
            kind,
            percent_off,
            amount_off,
            currency,
            max_redemptions,
            starts_at,
            auto_enable_at_start,
            expires_at,
            active,
            single_use_per_user: req.single_use_per_user,
            creator_slug: clean_slug(req.creator_slug.as_deref()),
            test_mode: mode.is_test(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.stores.promos.insert(&promo).await?;

        info!("Created {} promo {} ({})", mode, promo.code, promo.promo_code_id);
        Ok(promo)
    }

    async fn existing(&self, promo_code_id: &str) -> AppResult<PromoCode> {
        let promo_code_id = promo_code_id.trim();
        if promo_code_id.is_empty() {
            return Err(AppError::BadRequest("promoCodeId is required".to_string()));
        }
        self.stores
            .promos
            .get(promo_code_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Promo code {} not found", promo_code_id)))
    }

    pub async fn set_active(&self, promo_code_id: &str, active: bool, now: DateTime<Utc>) -> AppResult<PromoCode> {
        let mut promo = self.existing(promo_code_id).await?;
        if promo.is_deleted() {
            return Err(AppError::BadRequest("Promo code is deleted".to_string()));
        }
        self.gateway.set_promotion_code_active(promo.mode(), &promo.promo_code_id, active).await?;

        promo.active = active;
        if active {
            promo.auto_enable_at_start = false;
        }
        promo.updated_at = now;
        self.stores.promos.update(&promo).await?;

        info!("Promo {} set {}", promo.code, if active { "active" } else { "inactive" });
        Ok(promo)
    }

    pub async fn update(&self, req: &UpdatePromoRequest, now: DateTime<Utc>) -> AppResult<PromoCode> {
        let existing = self.existing(&req.promo_code_id).await?;
        if existing.is_deleted() {
            return Err(AppError::BadRequest("Promo code is deleted".to_string()));
        }

        if let Some(raw) = &req.max_redemptions {
            if parse_max_redemptions(raw.as_ref())? != existing.max_redemptions {
                return Err(AppError::BadRequest(IMMUTABLE_LIMITS_MESSAGE.to_string()));
            }
        }
        if let Some(raw) = &req.expires_at {
            if parse_instant("expiresAt", raw.as_ref())? != existing.expires_at {
                return Err(AppError::BadRequest(IMMUTABLE_LIMITS_MESSAGE.to_string()));
            }
        }

        let starts_at = match &req.starts_at {
            Some(raw) => parse_instant("startsAt", raw.as_ref())?,
            None => existing.starts_at,
        };
        let requested = req.active.unwrap_or(existing.active || existing.auto_enable_at_start);
        let (active, waiting) = activation(requested, starts_at, now);
        let auto_enable_at_start = waiting && req.auto_enable_at_start.unwrap_or(existing.auto_enable_at_start || requested);

        if active != existing.active {
            self.gateway.set_promotion_code_active(existing.mode(), &existing.promo_code_id, active).await?;
        }

        let updated = PromoCode {
            name: match &req.name {
                Some(name) => clean(name.as_deref()),
                None => existing.name.clone(),
            },
            starts_at,
            active,
            auto_enable_at_start,
            single_use_per_user: req.single_use_per_user.unwrap_or(existing.single_use_per_user),
            creator_slug: match &req.creator_slug {
                Some(slug) => clean_slug(slug.as_deref()),
                None => existing.creator_slug.clone(),
            },
            updated_at: now,
            ..existing
        };
        self.stores.promos.update(&updated).await?;

        info!("Updated promo {}", updated.code);
        Ok(updated)
    }

    /// Soft delete. Gateway cleanup is best-effort; the local row always ends up deleted.
    pub async fn delete(&self, promo_code_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        let mut promo = self.existing(promo_code_id).await?;
        if promo.is_deleted() {
            return Ok(());
        }

        let mode = promo.mode();
        if let Err(e) = self.gateway.set_promotion_code_active(mode, &promo.promo_code_id, false).await {
            warn!("Could not deactivate promotion code {}: {}", promo.promo_code_id, e);
        }
        if let Err(e) = self.gateway.delete_coupon(mode, &promo.coupon_id).await {
            warn!("Could not delete coupon {}: {}", promo.coupon_id, e);
        }

        promo.active = false;
        promo.auto_enable_at_start = false;
        promo.deleted_at = Some(now);
        promo.updated_at = now;
        self.stores.promos.update(&promo).await?;

        info!("Deleted promo {}", promo.code);
        Ok(())
    }

    /// Active, general-audience promos of the mode whose window contains `now`.
    pub async fn public_promos(&self, mode: GatewayMode, now: DateTime<Utc>) -> AppResult<Vec<PublicPromo>> {
        let promos = self.stores.promos.list().await?;
        Ok(promos
            .into_iter()
            .filter(|p| p.mode() == mode && !p.is_deleted() && p.active)
            .filter(|p| p.creator_slug.is_none() && !p.single_use_per_user)
            .filter(|p| p.starts_at.is_none_or(|s| now >= s) && p.expires_at.is_none_or(|e| now < e))
            .filter(|p| !p.code.trim().is_empty())
            .map(|p| PublicPromo {
                code: p.code.trim().to_string(),
                name: p.name,
                kind: p.kind,
                percent_off: p.percent_off,
                amount_off: p.amount_off,
                currency: p.currency,
                starts_at: p.starts_at,
                expires_at: p.expires_at,
            })
            .collect())
    }
}
