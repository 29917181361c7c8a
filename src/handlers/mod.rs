pub mod admin;
pub mod coupon_handlers;
pub mod health;
pub mod payment;
