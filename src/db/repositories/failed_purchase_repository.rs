use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::FailedPurchase;

#[async_trait]
pub trait FailedPurchaseStore: Send + Sync {
    async fn record(&self, failure: &FailedPurchase) -> Result<(), AppError>;
    async fn exists_for_session(&self, session_id: &str) -> Result<bool, AppError>;
    /// Newest first, optionally for one steam id.
    async fn list(&self, steam_id: Option<&str>, limit: i64) -> Result<Vec<FailedPurchase>, AppError>;
    /// Delete everything but the newest `keep` rows. Returns the number removed.
    async fn retain_latest(&self, keep: i64) -> Result<u64, AppError>;
}

#[derive(Debug, Clone)]
pub struct FailedPurchaseRepository {
    pool: PgPool,
}

impl FailedPurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailedPurchaseStore for FailedPurchaseRepository {
    async fn record(&self, failure: &FailedPurchase) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO failed_purchases
                (id, session_id, steam_id, purchase_type, error, amount_minor, currency, test_mode, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(failure.id)
        .bind(&failure.session_id)
        .bind(&failure.steam_id)
        .bind(failure.purchase_type.as_str())
        .bind(&failure.error)
        .bind(failure.amount_minor)
        .bind(&failure.currency)
        .bind(failure.test_mode)
        .bind(failure.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record failed purchase {}: {}", failure.session_id, e)))?;

        Ok(())
    }

    async fn exists_for_session(&self, session_id: &str) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM failed_purchases WHERE session_id = $1)")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to look up failed purchase {}: {}", session_id, e)))
    }

    async fn list(&self, steam_id: Option<&str>, limit: i64) -> Result<Vec<FailedPurchase>, AppError> {
        sqlx::query_as::<_, FailedPurchase>(
            r#"
            SELECT id, session_id, steam_id, purchase_type, error, amount_minor, currency, test_mode, created_at
            FROM failed_purchases
            WHERE ($1::TEXT IS NULL OR steam_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(steam_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list failed purchases: {}", e)))
    }

    async fn retain_latest(&self, keep: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM failed_purchases
            WHERE id IN (
                SELECT id FROM failed_purchases
                ORDER BY created_at DESC
                OFFSET $1
            )
            "#,
        )
        .bind(keep.max(0))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to apply failed purchase retention: {}", e)))?;

        Ok(result.rows_affected())
    }
}
