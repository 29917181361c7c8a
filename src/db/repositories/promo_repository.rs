use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::{GatewayMode, PromoCode, PromoRedemption};

#[async_trait]
pub trait PromoStore: Send + Sync {
    /// Every promo of every mode, deleted ones included, newest first.
    async fn list(&self) -> Result<Vec<PromoCode>, AppError>;
    async fn get(&self, promo_code_id: &str) -> Result<Option<PromoCode>, AppError>;
    /// Case-insensitive lookup among non-deleted promos of one mode.
    async fn find_by_code(&self, code: &str, mode: GatewayMode) -> Result<Option<PromoCode>, AppError>;
    async fn insert(&self, promo: &PromoCode) -> Result<(), AppError>;
    async fn update(&self, promo: &PromoCode) -> Result<(), AppError>;
    async fn has_redeemed(&self, steam_id: &str, promo_code_id: &str) -> Result<bool, AppError>;
    /// Returns false when a marker already existed.
    async fn record_redemption(&self, redemption: &PromoRedemption) -> Result<bool, AppError>;
}

const PROMO_COLUMNS: &str = r#"
    promo_code_id, coupon_id, code, name, kind, percent_off, amount_off, currency,
    max_redemptions, starts_at, auto_enable_at_start, expires_at, active, single_use_per_user,
    creator_slug, test_mode, deleted_at, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: PgPool,
}

impl PromoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromoStore for PromoRepository {
    async fn list(&self) -> Result<Vec<PromoCode>, AppError> {
        let query = format!("SELECT {} FROM promo_codes ORDER BY created_at DESC", PROMO_COLUMNS);
        sqlx::query_as::<_, PromoCode>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list promo codes: {}", e)))
    }

    async fn get(&self, promo_code_id: &str) -> Result<Option<PromoCode>, AppError> {
        let query = format!("SELECT {} FROM promo_codes WHERE promo_code_id = $1", PROMO_COLUMNS);
        sqlx::query_as::<_, PromoCode>(&query)
            .bind(promo_code_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to load promo {}: {}", promo_code_id, e)))
    }

    async fn find_by_code(&self, code: &str, mode: GatewayMode) -> Result<Option<PromoCode>, AppError> {
        let query = format!(
            r#"
            SELECT {}
            FROM promo_codes
            WHERE LOWER(TRIM(code)) = LOWER(TRIM($1))
              AND test_mode = $2
              AND deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            PROMO_COLUMNS
        );
        sqlx::query_as::<_, PromoCode>(&query)
            .bind(code)
            .bind(mode.is_test())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to resolve promo code: {}", e)))
    }

    async fn insert(&self, promo: &PromoCode) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO promo_codes (
                promo_code_id, coupon_id, code, name, kind, percent_off, amount_off, currency,
                max_redemptions, starts_at, auto_enable_at_start, expires_at, active,
                single_use_per_user, creator_slug, test_mode, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(&promo.promo_code_id)
        .bind(&promo.coupon_id)
        .bind(&promo.code)
        .bind(&promo.name)
        .bind(promo.kind.as_str())
        .bind(promo.percent_off)
        .bind(promo.amount_off)
        .bind(&promo.currency)
        .bind(promo.max_redemptions)
        .bind(promo.starts_at)
        .bind(promo.auto_enable_at_start)
        .bind(promo.expires_at)
        .bind(promo.active)
        .bind(promo.single_use_per_user)
        .bind(&promo.creator_slug)
        .bind(promo.test_mode)
        .bind(promo.deleted_at)
        .bind(promo.created_at)
        .bind(promo.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert promo {}: {}", promo.code, e)))?;

        Ok(())
    }

    async fn update(&self, promo: &PromoCode) -> Result<(), AppError> {
        // Redemption limits and expiry are deliberately absent: they never change after creation.
        sqlx::query(
            r#"
            UPDATE promo_codes
            SET name = $2,
                starts_at = $3,
                auto_enable_at_start = $4,
                active = $5,
                single_use_per_user = $6,
                creator_slug = $7,
                deleted_at = $8,
                updated_at = $9
            WHERE promo_code_id = $1
            "#,
        )
        .bind(&promo.promo_code_id)
        .bind(&promo.name)
        .bind(promo.starts_at)
        .bind(promo.auto_enable_at_start)
        .bind(promo.active)
        .bind(promo.single_use_per_user)
        .bind(&promo.creator_slug)
        .bind(promo.deleted_at)
        .bind(promo.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to update promo {}: {}", promo.promo_code_id, e)))?;

        Ok(())
    }

    async fn has_redeemed(&self, steam_id: &str, promo_code_id: &str) -> Result<bool, AppError> {
        let row = sqlx::query_as::<_, (i32,)>(
            "SELECT 1 FROM promo_single_use WHERE steam_id = $1 AND promo_code_id = $2",
        )
        .bind(steam_id)
        .bind(promo_code_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to check promo redemption: {}", e)))?;

        Ok(row.is_some())
    }

    async fn record_redemption(&self, redemption: &PromoRedemption) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO promo_single_use (steam_id, promo_code_id, session_id, used_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (steam_id, promo_code_id) DO NOTHING
            "#,
        )
        .bind(&redemption.steam_id)
        .bind(&redemption.promo_code_id)
        .bind(&redemption.session_id)
        .bind(redemption.used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record promo redemption: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }
}
