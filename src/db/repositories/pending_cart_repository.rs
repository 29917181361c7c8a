use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::{CartItem, PendingCart};

#[async_trait]
pub trait PendingCartStore: Send + Sync {
    /// Upsert by `cart_id`.
    async fn save(&self, cart: &PendingCart) -> Result<(), AppError>;
    async fn get(&self, cart_id: &str) -> Result<Option<PendingCart>, AppError>;
}

#[derive(Debug, Clone)]
pub struct PendingCartRepository {
    pool: PgPool,
}

impl PendingCartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PendingCartRow {
    cart_id: String,
    steam_id: String,
    items: serde_json::Value,
    promo_code: String,
    promo_code_id: String,
    coupon_id: String,
    test_mode: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<PendingCartRow> for PendingCart {
    type Error = AppError;

    fn try_from(row: PendingCartRow) -> Result<Self, Self::Error> {
        let items: Vec<CartItem> = serde_json::from_value(row.items)?;
        Ok(PendingCart {
            cart_id: row.cart_id,
            steam_id: row.steam_id,
            items,
            promo_code: row.promo_code,
            promo_code_id: row.promo_code_id,
            coupon_id: row.coupon_id,
            test_mode: row.test_mode,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl PendingCartStore for PendingCartRepository {
    async fn save(&self, cart: &PendingCart) -> Result<(), AppError> {
        let items = serde_json::to_value(&cart.items)?;
        sqlx::query(
            r#"
            INSERT INTO pending_carts
                (cart_id, steam_id, items, promo_code, promo_code_id, coupon_id, test_mode, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (cart_id) DO UPDATE SET
                steam_id = EXCLUDED.steam_id,
                items = EXCLUDED.items,
                promo_code = EXCLUDED.promo_code,
                promo_code_id = EXCLUDED.promo_code_id,
                coupon_id = EXCLUDED.coupon_id,
                test_mode = EXCLUDED.test_mode,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&cart.cart_id)
        .bind(&cart.steam_id)
        .bind(items)
        .bind(&cart.promo_code)
        .bind(&cart.promo_code_id)
        .bind(&cart.coupon_id)
        .bind(cart.test_mode)
        .bind(cart.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to save pending cart {}: {}", cart.cart_id, e)))?;

        Ok(())
    }

    async fn get(&self, cart_id: &str) -> Result<Option<PendingCart>, AppError> {
        let row = sqlx::query_as::<_, PendingCartRow>(
            r#"
            SELECT cart_id, steam_id, items, promo_code, promo_code_id, coupon_id, test_mode, created_at
            FROM pending_carts
            WHERE cart_id = $1
            "#,
        )
        .bind(cart_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to load pending cart {}: {}", cart_id, e)))?;

        row.map(PendingCart::try_from).transpose()
    }
}
