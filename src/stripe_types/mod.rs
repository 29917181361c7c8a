//! Hand-written Stripe wire types covering checkout sessions, coupons and webhooks.

pub mod checkout_session;
pub mod coupon;
pub mod enums;
pub mod event;
pub mod expandable;

use serde::Deserialize;

pub use checkout_session::{CheckoutSession, CreateCheckoutSession, CustomerDetails, Discount};
pub use coupon::{Coupon, CouponValue, CreateCoupon, CreatePromotionCode, PromotionCode};
pub use enums::*;
pub use event::{Event, EventData, EventType};
pub use expandable::{Expandable, ObjectRef};

/// Body of a non-2xx Stripe response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub code: Option<String>,
    pub param: Option<String>,
    #[serde(default)]
    pub message: String,
}
