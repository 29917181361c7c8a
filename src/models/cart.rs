//! Storefront price table and cart resolution.
//!
//! Cart items arrive loosely typed from the storefront. Anything that does not
//! resolve against the price table is dropped rather than rejected.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::gateway_mode::GatewayMode;

pub const CURRENCY: &str = "eur";

#[derive(Debug, Clone, Copy)]
pub struct ProPlan {
    pub id: &'static str,
    pub amount: i64,
    pub months: u32,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct BalancePack {
    pub id: &'static str,
    pub units: i64,
    pub amount: i64,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumableProduct {
    pub id: &'static str,
    pub amount: i64,
    pub label: &'static str,
}

pub const PRO_PLANS: &[ProPlan] = &[
    ProPlan { id: "1month", amount: 999, months: 1, label: "1 Month" },
    ProPlan { id: "3months", amount: 2499, months: 3, label: "3 Months" },
    ProPlan { id: "6months", amount: 4499, months: 6, label: "6 Months" },
];

pub const CREDIT_PACKS: &[BalancePack] = &[
    BalancePack { id: "starter", units: 500, amount: 199, label: "Starter Pack" },
    BalancePack { id: "value", units: 1500, amount: 499, label: "Value Pack" },
    BalancePack { id: "mega", units: 4000, amount: 999, label: "Mega Pack" },
    BalancePack { id: "giant", units: 10000, amount: 1999, label: "Giant Pack" },
    BalancePack { id: "whale", units: 30000, amount: 4999, label: "Whale Pack" },
    BalancePack { id: "titan", units: 50000, amount: 7499, label: "Titan Pack" },
    BalancePack { id: "legend", units: 75000, amount: 9999, label: "Legend Pack" },
];

pub const SPIN_PACKS: &[BalancePack] = &[
    BalancePack { id: "starter", units: 5, amount: 199, label: "Starter Pack" },
    BalancePack { id: "value", units: 15, amount: 499, label: "Value Pack" },
    BalancePack { id: "mega", units: 40, amount: 999, label: "Mega Pack" },
    BalancePack { id: "giant", units: 100, amount: 1999, label: "Giant Pack" },
    BalancePack { id: "whale", units: 300, amount: 4999, label: "Whale Pack" },
    BalancePack { id: "titan", units: 500, amount: 7499, label: "Titan Pack" },
    BalancePack { id: "legend", units: 750, amount: 9999, label: "Legend Pack" },
];

pub const CONSUMABLES: &[ConsumableProduct] = &[
    ConsumableProduct { id: "price_tracker_slot", amount: 299, label: "Price Tracker Slot" },
    ConsumableProduct { id: "wishlist_slot", amount: 199, label: "Wishlist Slot" },
    ConsumableProduct { id: "discord_access", amount: 499, label: "Discord Access" },
    ConsumableProduct { id: "price_scan_boost", amount: 249, label: "Price Scan Boost" },
    ConsumableProduct { id: "cache_boost", amount: 199, label: "Price Cache Boost" },
];

pub fn find_pro_plan(id: &str) -> Option<&'static ProPlan> {
    PRO_PLANS.iter().find(|p| p.id == id)
}

pub fn find_credit_pack(id: &str) -> Option<&'static BalancePack> {
    CREDIT_PACKS.iter().find(|p| p.id == id)
}

pub fn find_spin_pack(id: &str) -> Option<&'static BalancePack> {
    SPIN_PACKS.iter().find(|p| p.id == id)
}

pub fn find_consumable(id: &str) -> Option<&'static ConsumableProduct> {
    CONSUMABLES.iter().find(|c| c.id == id)
}

pub const CREDITS_QTY_MAX: i64 = 99;
pub const SPINS_QTY_MAX: i64 = 99;
pub const CONSUMABLE_QTY_MAX: i64 = 100;

/// Clamp a loosely typed quantity into `min..=max`.
///
/// Numbers are floored, numeric strings are parsed, anything else falls back to `min`.
pub fn safe_qty(raw: Option<&serde_json::Value>, min: i64, max: i64) -> i64 {
    let parsed = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() { Some(0.0) } else { s.parse::<f64>().ok() }
        }
        Some(serde_json::Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(serde_json::Value::Null) => Some(0.0),
        _ => None,
    };

    match parsed {
        Some(n) if n.is_finite() => (n.floor() as i64).clamp(min, max),
        _ => min,
    }
}

/// One storefront cart entry as submitted by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumable_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<serde_json::Value>,
}

/// Entitlement a resolved item grants once paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    Pro { months: u32 },
    Credits { amount: i64 },
    Spins { amount: i64 },
    Consumable { consumable_type: String, quantity: i64 },
}

/// Gateway line item built from the price table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub name: String,
    pub description: String,
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedItem {
    pub line_item: LineItem,
    pub grant: Grant,
}

fn trimmed(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

fn labelled(mode: GatewayMode, name: String, description: String) -> (String, String) {
    if mode.is_test() {
        (format!("[TEST] {}", name), format!("[TEST MODE] {}", description))
    } else {
        (name, description)
    }
}

impl CartItem {
    pub fn kind(&self) -> &str {
        self.kind.trim()
    }

    /// Resolve against the price table. `None` for unknown kinds, plans, packs or types.
    pub fn resolve(&self, mode: GatewayMode) -> Option<ResolvedItem> {
        match self.kind() {
            "pro" => {
                let plan = find_pro_plan(trimmed(&self.plan))?;
                let plural = if plan.months == 1 { "" } else { "s" };
                let (name, description) = labelled(
                    mode,
                    format!("SkinVaults Pro - {}", plan.label),
                    format!("Premium access to SkinVaults for {} month{}", plan.months, plural),
                );
                Some(ResolvedItem {
                    line_item: LineItem { name, description, unit_amount: plan.amount, quantity: 1 },
                    grant: Grant::Pro { months: plan.months },
                })
            }
            "credits" => {
                let pack = find_credit_pack(trimmed(&self.pack))?;
                let qty = safe_qty(self.quantity.as_ref(), 1, CREDITS_QTY_MAX);
                let (name, description) = labelled(
                    mode,
                    format!("Credits - {}", pack.label),
                    format!("Add {} credits to your SkinVaults account.", pack.units),
                );
                Some(ResolvedItem {
                    line_item: LineItem { name, description, unit_amount: pack.amount, quantity: qty },
                    grant: Grant::Credits { amount: pack.units * qty },
                })
            }
            "spins" => {
                let pack = find_spin_pack(trimmed(&self.pack))?;
                let qty = safe_qty(self.quantity.as_ref(), 1, SPINS_QTY_MAX);
                let (name, description) = labelled(
                    mode,
                    format!("Spins - {}", pack.label),
                    format!("Add {} bonus spins to your SkinVaults account.", pack.units),
                );
                Some(ResolvedItem {
                    line_item: LineItem { name, description, unit_amount: pack.amount, quantity: qty },
                    grant: Grant::Spins { amount: pack.units * qty },
                })
            }
            "consumable" => {
                let product = find_consumable(trimmed(&self.consumable_type))?;
                let qty = safe_qty(self.quantity.as_ref(), 1, CONSUMABLE_QTY_MAX);
                let (name, description) = labelled(
                    mode,
                    product.label.to_string(),
                    format!("{}. Permanent and never expires.", product.label),
                );
                Some(ResolvedItem {
                    line_item: LineItem { name, description, unit_amount: product.amount, quantity: qty },
                    grant: Grant::Consumable { consumable_type: product.id.to_string(), quantity: qty },
                })
            }
            _ => None,
        }
    }
}

pub fn resolve_cart(items: &[CartItem], mode: GatewayMode) -> Vec<ResolvedItem> {
    items.iter().filter_map(|item| item.resolve(mode)).collect()
}

pub fn total_minor(items: &[ResolvedItem]) -> i64 {
    items
        .iter()
        .map(|i| i.line_item.unit_amount * i.line_item.quantity)
        .sum()
}

static CART_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{6,80}$").unwrap());

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// `<unix millis in base36>_<8 random base36 chars>`.
pub fn generate_cart_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("{}_{}", to_base36(now.timestamp_millis().max(0) as u64), suffix)
}

/// Keep a client supplied cart id when it is well formed, otherwise mint one.
pub fn normalize_cart_id(raw: Option<&str>, now: DateTime<Utc>) -> String {
    let raw = raw.map(str::trim).unwrap_or("");
    if CART_ID_RE.is_match(raw) {
        raw.to_string()
    } else {
        generate_cart_id(now)
    }
}

/// Snapshot of a checkout attempt, keyed by `cart_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCart {
    pub cart_id: String,
    pub steam_id: String,
    pub items: Vec<CartItem>,
    pub promo_code: String,
    pub promo_code_id: String,
    pub coupon_id: String,
    pub test_mode: bool,
    pub created_at: DateTime<Utc>,
}
