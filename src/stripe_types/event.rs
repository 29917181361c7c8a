use serde::{Deserialize, Serialize};

use super::checkout_session::CheckoutSession;
use super::enums::{EVENT_CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED, EVENT_CHECKOUT_SESSION_COMPLETED};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
    #[serde(default)]
    pub livemode: bool,
    pub api_version: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Event types the payment core reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    CheckoutSessionCompleted,
    CheckoutSessionAsyncPaymentSucceeded,
    Other(String),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self.type_.as_str() {
            EVENT_CHECKOUT_SESSION_COMPLETED => EventType::CheckoutSessionCompleted,
            EVENT_CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED => EventType::CheckoutSessionAsyncPaymentSucceeded,
            other => EventType::Other(other.to_string()),
        }
    }

    pub fn checkout_session(&self) -> Result<CheckoutSession, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}
