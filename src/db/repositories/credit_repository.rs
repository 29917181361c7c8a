use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::CreditLedgerEntry;

/// Credits and bonus spin balances.
///
/// Increments are single-statement upserts so concurrent grants never lose updates.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Returns the new balance.
    async fn increment_credits(&self, steam_id: &str, delta: i64) -> Result<i64, AppError>;
    async fn append_ledger(&self, entry: &CreditLedgerEntry) -> Result<(), AppError>;
    async fn credits_balance(&self, steam_id: &str) -> Result<i64, AppError>;
    async fn ledger_for(&self, steam_id: &str) -> Result<Vec<CreditLedgerEntry>, AppError>;
    /// Returns the new balance.
    async fn increment_spins(&self, steam_id: &str, delta: i64) -> Result<i64, AppError>;
    async fn spins_balance(&self, steam_id: &str) -> Result<i64, AppError>;
}

#[derive(Debug, Clone)]
pub struct CreditRepository {
    pool: PgPool,
}

impl CreditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditStore for CreditRepository {
    async fn increment_credits(&self, steam_id: &str, delta: i64) -> Result<i64, AppError> {
        let (balance,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO user_credits (steam_id, balance, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (steam_id) DO UPDATE
            SET balance = user_credits.balance + EXCLUDED.balance, updated_at = NOW()
            RETURNING balance
            "#,
        )
        .bind(steam_id)
        .bind(delta)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to increment credits for {}: {}", steam_id, e)))?;

        Ok(balance)
    }

    async fn append_ledger(&self, entry: &CreditLedgerEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO credits_ledger (id, steam_id, delta, entry_type, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.steam_id)
        .bind(entry.delta)
        .bind(&entry.entry_type)
        .bind(&entry.meta)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to append credits ledger entry: {}", e)))?;

        Ok(())
    }

    async fn credits_balance(&self, steam_id: &str) -> Result<i64, AppError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT balance FROM user_credits WHERE steam_id = $1")
            .bind(steam_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to read credits for {}: {}", steam_id, e)))?;

        Ok(row.map(|(b,)| b).unwrap_or(0))
    }

    async fn ledger_for(&self, steam_id: &str) -> Result<Vec<CreditLedgerEntry>, AppError> {
        sqlx::query_as::<_, CreditLedgerEntry>(
            r#"
            SELECT id, steam_id, delta, entry_type, meta, created_at
            FROM credits_ledger
            WHERE steam_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(steam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to read credits ledger for {}: {}", steam_id, e)))
    }

    async fn increment_spins(&self, steam_id: &str, delta: i64) -> Result<i64, AppError> {
        let (balance,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO user_spins (steam_id, balance, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (steam_id) DO UPDATE
            SET balance = user_spins.balance + EXCLUDED.balance, updated_at = NOW()
            RETURNING balance
            "#,
        )
        .bind(steam_id)
        .bind(delta)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to increment spins for {}: {}", steam_id, e)))?;

        Ok(balance)
    }

    async fn spins_balance(&self, steam_id: &str) -> Result<i64, AppError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT balance FROM user_spins WHERE steam_id = $1")
            .bind(steam_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to read spins for {}: {}", steam_id, e)))?;

        Ok(row.map(|(b,)| b).unwrap_or(0))
    }
}
