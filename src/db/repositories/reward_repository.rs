use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::error::AppError;
use crate::models::ConsumableReward;

#[async_trait]
pub trait RewardStore: Send + Sync {
    /// All-or-nothing insert of the given units.
    async fn grant(&self, rewards: &[ConsumableReward]) -> Result<(), AppError>;
    /// Units held per reward type.
    async fn counts(&self, steam_id: &str) -> Result<BTreeMap<String, i64>, AppError>;
}

#[derive(Debug, Clone)]
pub struct RewardRepository {
    pool: PgPool,
}

impl RewardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RewardStore for RewardRepository {
    async fn grant(&self, rewards: &[ConsumableReward]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for reward in rewards {
            sqlx::query(
                r#"
                INSERT INTO user_rewards (id, steam_id, reward_type, granted_at, source, session_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(reward.id)
            .bind(&reward.steam_id)
            .bind(&reward.reward_type)
            .bind(reward.granted_at)
            .bind(&reward.source)
            .bind(&reward.session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to grant reward: {}", e)))?;
        }

        tx.commit().await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    async fn counts(&self, steam_id: &str) -> Result<BTreeMap<String, i64>, AppError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT reward_type, COUNT(*)::BIGINT
            FROM user_rewards
            WHERE steam_id = $1
            GROUP BY reward_type
            "#,
        )
        .bind(steam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to count rewards for {}: {}", steam_id, e)))?;

        Ok(rows.into_iter().collect())
    }
}
