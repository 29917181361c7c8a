// Stripe string constants used by the payment core

// Checkout Session payment statuses
pub const PAYMENT_STATUS_PAID: &str = "paid";
pub const PAYMENT_STATUS_UNPAID: &str = "unpaid";
pub const PAYMENT_STATUS_NO_PAYMENT_REQUIRED: &str = "no_payment_required";

// Checkout Session Modes
pub const CHECKOUT_SESSION_MODE_PAYMENT: &str = "payment";

// Webhook Event Types
pub const EVENT_CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

// Coupon durations
pub const COUPON_DURATION_ONCE: &str = "once";
pub const COUPON_DURATION_FOREVER: &str = "forever";

/// Ordered list offered on every checkout. Unsupported entries are pruned on the fly.
pub const PAYMENT_METHOD_TYPES: &[&str] = &[
    "card",
    "link",
    "paypal",
    "klarna",
    "ideal",
    "bancontact",
    "sofort",
    "giropay",
    "eps",
    "p24",
];
