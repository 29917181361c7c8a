pub mod app_state;
pub mod cart;
pub mod entitlement;
pub mod gateway_mode;
pub mod notification;
pub mod promo;
pub mod purchase;

pub use app_state::{AppState, payment_subscribers};
pub use cart::{CartItem, Grant, LineItem, PendingCart, ResolvedItem};
pub use entitlement::{ConsumableReward, CreditLedgerEntry, EntitlementSummary};
pub use gateway_mode::GatewayMode;
pub use notification::{AnalyticsEvent, UserNotification};
pub use promo::{PromoCode, PromoKind, PromoRedemption};
pub use purchase::{
    DiscordDelivery, DiscordFilter, FailedPurchase, PurchaseFilter, PurchaseRecord, PurchaseSource,
    PurchaseType,
};

/// Text column that did not match any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

impl ParseEnumError {
    pub fn new(what: &'static str, value: &str) -> Self {
        Self { what, value: value.to_string() }
    }
}
