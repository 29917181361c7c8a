pub mod checkout_service;
pub mod credits_restrictions;
pub mod discord_service;
pub mod entitlement_service;
pub mod fulfillment_service;
pub mod gateway_mode_service;
pub mod promo_service;
pub mod purchase_events;
pub mod reconciliation_service;
pub mod stripe_service;
