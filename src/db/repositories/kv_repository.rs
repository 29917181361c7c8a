use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;

pub const STRIPE_TEST_MODE_KEY: &str = "stripe_test_mode";
pub const CREDITS_BANNED_KEY: &str = "credits_banned_steam_ids";
pub const CREDITS_TIMEOUTS_KEY: &str = "credits_timeout_users";

/// Small JSON flag documents (gateway mode, credits restrictions).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct KvRepository {
    pool: PgPool,
}

impl KvRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for KvRepository {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to read key {}: {}", key, e)))?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to write key {}: {}", key, e)))?;

        Ok(())
    }
}
