use serde::{Deserialize, Serialize};

/// Expandable field in Stripe API objects: either an ID or the expanded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

/// Minimal view of any expanded Stripe object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: String,
}

impl Expandable<ObjectRef> {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(obj) => &obj.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_from_either_shape() {
        let plain: Expandable<ObjectRef> = serde_json::from_str(r#""pi_123""#).unwrap();
        let expanded: Expandable<ObjectRef> =
            serde_json::from_str(r#"{"id": "pi_456", "object": "payment_intent"}"#).unwrap();
        assert_eq!(plain.id(), "pi_123");
        assert_eq!(expanded.id(), "pi_456");
    }
}
