use serde::{Deserialize, Serialize};
use std::fmt;

/// Which Stripe account a request talks to.
///
/// Resolved once at the edge of a request (stored flag for checkout and admin
/// calls, verifying secret for webhooks) and passed down explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Live,
    Test,
}

impl GatewayMode {
    pub fn from_test_flag(test_mode: bool) -> Self {
        if test_mode { GatewayMode::Test } else { GatewayMode::Live }
    }

    pub fn is_test(self) -> bool {
        matches!(self, GatewayMode::Test)
    }

    pub fn is_live(self) -> bool {
        matches!(self, GatewayMode::Live)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GatewayMode::Live => "live",
            GatewayMode::Test => "test",
        }
    }

    /// Value written into checkout metadata (`"true"` / `"false"`).
    pub fn metadata_flag(self) -> &'static str {
        if self.is_test() { "true" } else { "false" }
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
