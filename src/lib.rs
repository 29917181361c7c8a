//! SkinVaults payment service library
//!
//! Stripe checkout, webhook fulfillment, promo administration and purchase
//! reconciliation. The server binary wires these modules into actix-web.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod stripe_types;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use config::AppSettings;
pub use error::{AppError, AppResult};
pub use models::AppState;
