// Storefront payment handlers

pub mod checkout_handlers;
pub mod purchase_handlers;
pub mod webhook_handlers;

pub use checkout_handlers::*;
pub use purchase_handlers::*;
pub use webhook_handlers::*;
