use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::enums::CHECKOUT_SESSION_MODE_PAYMENT;
use super::expandable::{Expandable, ObjectRef};
use crate::models::LineItem;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_intent: Option<Expandable<ObjectRef>>,
    pub customer: Option<Expandable<ObjectRef>>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    pub created: Option<i64>,
    pub expires_at: Option<i64>,
}

impl CheckoutSession {
    /// Trimmed metadata value, `None` when absent or blank.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Non-negative numeric metadata value, 0 when absent or unparsable.
    pub fn meta_number(&self, key: &str) -> i64 {
        self.meta(key)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|n| n.is_finite() && *n > 0.0)
            .map(|n| n.floor() as i64)
            .unwrap_or(0)
    }

    pub fn payment_intent_id(&self) -> Option<String> {
        self.payment_intent.as_ref().map(|p| p.id().to_string())
    }

    pub fn customer_id(&self) -> Option<String> {
        self.customer.as_ref().map(|c| c.id().to_string())
    }

    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discount {
    Coupon(String),
    PromotionCode(String),
}

/// Parameters for `POST /v1/checkout/sessions` in `mode=payment`.
#[derive(Debug, Clone, Default)]
pub struct CreateCheckoutSession {
    pub line_items: Vec<LineItem>,
    pub currency: String,
    pub customer_email: String,
    pub discounts: Vec<Discount>,
    pub metadata: BTreeMap<String, String>,
    pub payment_intent_metadata: BTreeMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: i64,
    pub payment_method_types: Vec<String>,
}

impl CreateCheckoutSession {
    /// Stripe's bracketed form encoding.
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), CHECKOUT_SESSION_MODE_PAYMENT.into()),
            ("customer_creation".into(), "always".into()),
            ("customer_email".into(), self.customer_email.clone()),
            ("invoice_creation[enabled]".into(), "true".into()),
            ("payment_intent_data[receipt_email]".into(), self.customer_email.clone()),
            ("success_url".into(), self.success_url.clone()),
            ("cancel_url".into(), self.cancel_url.clone()),
            ("expires_at".into(), self.expires_at.to_string()),
        ];

        for (i, item) in self.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((format!("{}[price_data][currency]", prefix), self.currency.clone()));
            form.push((format!("{}[price_data][unit_amount]", prefix), item.unit_amount.to_string()));
            form.push((format!("{}[price_data][product_data][name]", prefix), item.name.clone()));
            form.push((
                format!("{}[price_data][product_data][description]", prefix),
                item.description.clone(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        for (i, discount) in self.discounts.iter().enumerate() {
            match discount {
                Discount::Coupon(id) => form.push((format!("discounts[{}][coupon]", i), id.clone())),
                Discount::PromotionCode(id) => {
                    form.push((format!("discounts[{}][promotion_code]", i), id.clone()))
                }
            }
        }

        for (key, value) in &self.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }
        for (key, value) in &self.payment_intent_metadata {
            form.push((format!("payment_intent_data[metadata][{}]", key), value.clone()));
        }
        for (i, method) in self.payment_method_types.iter().enumerate() {
            form.push((format!("payment_method_types[{}]", i), method.clone()));
        }

        form
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session(metadata: serde_json::Value) -> CheckoutSession {
        serde_json::from_value(serde_json::json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "amount_total": 199,
            "currency": "eur",
            "payment_intent": "pi_1",
            "customer": {"id": "cus_1", "object": "customer"},
            "metadata": metadata,
        }))
        .unwrap()
    }

    #[test]
    fn metadata_helpers() {
        let s = session(serde_json::json!({"steamId": " 76561198000000001 ", "months": "3", "credits": "abc", "promoCode": ""}));
        assert_eq!(s.meta("steamId"), Some("76561198000000001"));
        assert_eq!(s.meta("promoCode"), None);
        assert_eq!(s.meta_number("months"), 3);
        assert_eq!(s.meta_number("credits"), 0);
        assert_eq!(s.payment_intent_id().as_deref(), Some("pi_1"));
        assert_eq!(s.customer_id().as_deref(), Some("cus_1"));
    }

    #[test]
    fn null_metadata_is_tolerated() {
        let s = session(serde_json::Value::Null);
        assert_eq!(s.meta("steamId"), None);
    }

    #[test]
    fn form_encodes_line_items_and_discounts() {
        let params = CreateCheckoutSession {
            line_items: vec![LineItem {
                name: "Credits - Starter Pack".into(),
                description: "Add 500 credits to your SkinVaults account.".into(),
                unit_amount: 199,
                quantity: 2,
            }],
            currency: "eur".into(),
            customer_email: "a@b.co".into(),
            discounts: vec![Discount::PromotionCode("promo_1".into())],
            payment_method_types: vec!["card".into(), "link".into()],
            ..Default::default()
        };
        let form = params.to_form();
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("199"));
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(get("discounts[0][promotion_code]"), Some("promo_1"));
        assert_eq!(get("payment_method_types[1]"), Some("link"));
        assert_eq!(get("mode"), Some("payment"));
    }
}
