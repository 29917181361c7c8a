use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use sqlx::PgPool;

use crate::error::AppError;

/// Pro expiry per steam id.
#[async_trait]
pub trait ProStore: Send + Sync {
    /// Extend from `max(pro_until, now)` by `months` calendar months. Returns the new expiry.
    async fn extend_pro(&self, steam_id: &str, months: u32, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError>;
    async fn get_pro_until(&self, steam_id: &str) -> Result<Option<DateTime<Utc>>, AppError>;
}

/// Expiry arithmetic shared by every `ProStore`.
pub fn extended_pro_until(
    current: Option<DateTime<Utc>>,
    months: u32,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, AppError> {
    let base = current.filter(|until| *until > now).unwrap_or(now);
    base.checked_add_months(Months::new(months))
        .ok_or_else(|| AppError::Internal(format!("Pro expiry overflow adding {} months", months)))
}

#[derive(Debug, Clone)]
pub struct ProRepository {
    pool: PgPool,
}

impl ProRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProStore for ProRepository {
    async fn extend_pro(&self, steam_id: &str, months: u32, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
        let months = i32::try_from(months)
            .map_err(|_| AppError::Validation(format!("Invalid Pro duration: {} months", months)))?;

        let (pro_until,) = sqlx::query_as::<_, (DateTime<Utc>,)>(
            r#"
            INSERT INTO pro_users (steam_id, pro_until, updated_at)
            VALUES ($1, $3 + make_interval(months => $2), NOW())
            ON CONFLICT (steam_id) DO UPDATE
            SET pro_until = GREATEST(pro_users.pro_until, $3) + make_interval(months => $2),
                updated_at = NOW()
            RETURNING pro_until
            "#,
        )
        .bind(steam_id)
        .bind(months)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to extend Pro for {}: {}", steam_id, e)))?;

        Ok(pro_until)
    }

    async fn get_pro_until(&self, steam_id: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let row = sqlx::query_as::<_, (DateTime<Utc>,)>("SELECT pro_until FROM pro_users WHERE steam_id = $1")
            .bind(steam_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to read Pro status for {}: {}", steam_id, e)))?;

        Ok(row.map(|(until,)| until))
    }
}
