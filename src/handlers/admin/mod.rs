// Owner and admin dashboards

pub mod coupon_handlers;
pub mod mode_handlers;
pub mod purchase_handlers;

pub use coupon_handlers::*;
pub use mode_handlers::*;
pub use purchase_handlers::*;
