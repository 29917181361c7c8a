use serde::{Deserialize, Serialize};

use super::expandable::{Expandable, ObjectRef};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Coupon {
    pub id: String,
    pub name: Option<String>,
    pub percent_off: Option<f64>,
    pub amount_off: Option<i64>,
    pub currency: Option<String>,
    pub duration: Option<String>,
    pub redeem_by: Option<i64>,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub times_redeemed: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PromotionCode {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub active: bool,
    pub coupon: Option<Expandable<ObjectRef>>,
    pub expires_at: Option<i64>,
    pub max_redemptions: Option<i64>,
    #[serde(default)]
    pub times_redeemed: i64,
}

/// Discount amount of a new coupon.
#[derive(Debug, Clone, PartialEq)]
pub enum CouponValue {
    PercentOff(f64),
    AmountOff { amount: i64, currency: String },
}

#[derive(Debug, Clone)]
pub struct CreateCoupon {
    /// Fixed id, used for the owner coupon so it can be looked up again.
    pub id: Option<String>,
    pub name: Option<String>,
    pub value: CouponValue,
    pub duration: String,
    pub redeem_by: Option<i64>,
}

impl CreateCoupon {
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![("duration".into(), self.duration.clone())];
        if let Some(id) = &self.id {
            form.push(("id".into(), id.clone()));
        }
        if let Some(name) = &self.name {
            form.push(("name".into(), name.clone()));
        }
        match &self.value {
            CouponValue::PercentOff(p) => form.push(("percent_off".into(), p.to_string())),
            CouponValue::AmountOff { amount, currency } => {
                form.push(("amount_off".into(), amount.to_string()));
                form.push(("currency".into(), currency.clone()));
            }
        }
        if let Some(redeem_by) = self.redeem_by {
            form.push(("redeem_by".into(), redeem_by.to_string()));
        }
        form
    }
}

#[derive(Debug, Clone)]
pub struct CreatePromotionCode {
    pub coupon: String,
    pub code: String,
    pub active: bool,
    pub expires_at: Option<i64>,
    pub max_redemptions: Option<i64>,
}

impl CreatePromotionCode {
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("coupon".into(), self.coupon.clone()),
            ("code".into(), self.code.clone()),
            ("active".into(), self.active.to_string()),
        ];
        if let Some(expires_at) = self.expires_at {
            form.push(("expires_at".into(), expires_at.to_string()));
        }
        if let Some(max) = self.max_redemptions {
            form.push(("max_redemptions".into(), max.to_string()));
        }
        form
    }
}
