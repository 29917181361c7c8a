use log::info;
use serde_json::Value;

use crate::db::KeyValueStore;
use crate::db::repositories::kv_repository::STRIPE_TEST_MODE_KEY;
use crate::error::AppResult;
use crate::models::GatewayMode;

/// The stored live/test switch. Anything but an explicit `true` is live.
pub async fn current_mode(kv: &dyn KeyValueStore) -> AppResult<GatewayMode> {
    let test_mode = matches!(kv.get(STRIPE_TEST_MODE_KEY).await?, Some(Value::Bool(true)));
    Ok(GatewayMode::from_test_flag(test_mode))
}

pub async fn set_mode(kv: &dyn KeyValueStore, mode: GatewayMode) -> AppResult<()> {
    kv.set(STRIPE_TEST_MODE_KEY, Value::Bool(mode.is_test())).await?;
    info!("Stripe gateway mode switched to {}", mode);
    Ok(())
}
