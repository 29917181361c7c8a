use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::{DiscordDelivery, DiscordFilter, PurchaseFilter, PurchaseRecord};

/// Result of an insert-if-absent claim on a checkout session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// First delivery for this session. The caller owns the grant.
    Claimed,
    /// A row for this session already exists.
    Exists(PurchaseRecord),
}

/// Fields written when a claimed purchase has been granted.
#[derive(Debug, Clone)]
pub struct FulfillmentUpdate {
    pub fulfilled_at: DateTime<Utc>,
    pub details: serde_json::Value,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
}

/// Purchase history keyed by checkout session id.
///
/// `claim` must be atomic: two concurrent claims for one session yield exactly
/// one `Claimed`.
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn claim(&self, record: &PurchaseRecord) -> Result<ClaimOutcome, AppError>;
    async fn find(&self, session_id: &str) -> Result<Option<PurchaseRecord>, AppError>;
    /// Returns false when the row was already fulfilled.
    async fn mark_fulfilled(&self, session_id: &str, update: &FulfillmentUpdate) -> Result<bool, AppError>;
    /// Compare-and-set of `grants_applied` on an unfulfilled row. Returns false
    /// when the row is fulfilled or its progress is no longer `from`.
    async fn advance_grant_progress(&self, session_id: &str, from: i32, to: i32) -> Result<bool, AppError>;
    /// Newest first.
    async fn list(&self, filter: &PurchaseFilter) -> Result<Vec<PurchaseRecord>, AppError>;
    /// Returns false when no row matched.
    async fn set_hidden(&self, session_id: &str, hidden: bool, at: DateTime<Utc>) -> Result<bool, AppError>;
    async fn record_discord_delivery(&self, session_id: &str, delivery: &DiscordDelivery) -> Result<(), AppError>;
}

const PURCHASE_COLUMNS: &str = r#"
    session_id, steam_id, purchase_type, amount_minor, currency, payment_intent_id, customer_id,
    test_mode, source, fulfilled, fulfilled_at, details, grants_applied, hidden, hidden_at, discord_notified,
    discord_notified_at, discord_notify_error, discord_notify_attempts,
    discord_notify_last_attempt_at, created_at
"#;

#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: PgPool,
}

impl PurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PurchaseStore for PurchaseRepository {
    async fn claim(&self, record: &PurchaseRecord) -> Result<ClaimOutcome, AppError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO purchases (
                session_id, steam_id, purchase_type, amount_minor, currency,
                payment_intent_id, customer_id, test_mode, source, fulfilled, details, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10, $11)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.steam_id)
        .bind(record.purchase_type.as_str())
        .bind(record.amount_minor)
        .bind(&record.currency)
        .bind(&record.payment_intent_id)
        .bind(&record.customer_id)
        .bind(record.test_mode)
        .bind(record.source.as_str())
        .bind(&record.details)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to claim purchase {}: {}", record.session_id, e)))?;

        if inserted.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let existing = self.find(&record.session_id).await?.ok_or_else(|| {
            AppError::Database(format!(
                "Purchase {} conflicted on insert but could not be read back",
                record.session_id
            ))
        })?;
        Ok(ClaimOutcome::Exists(existing))
    }

    async fn find(&self, session_id: &str) -> Result<Option<PurchaseRecord>, AppError> {
        let query = format!("SELECT {} FROM purchases WHERE session_id = $1", PURCHASE_COLUMNS);
        sqlx::query_as::<_, PurchaseRecord>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to load purchase {}: {}", session_id, e)))
    }

    async fn mark_fulfilled(&self, session_id: &str, update: &FulfillmentUpdate) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET fulfilled = TRUE,
                fulfilled_at = $2,
                details = $3,
                payment_intent_id = COALESCE($4, payment_intent_id),
                customer_id = COALESCE($5, customer_id)
            WHERE session_id = $1 AND fulfilled = FALSE
            "#,
        )
        .bind(session_id)
        .bind(update.fulfilled_at)
        .bind(&update.details)
        .bind(&update.payment_intent_id)
        .bind(&update.customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark purchase {} fulfilled: {}", session_id, e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn advance_grant_progress(&self, session_id: &str, from: i32, to: i32) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET grants_applied = $3
            WHERE session_id = $1 AND grants_applied = $2 AND fulfilled = FALSE
            "#,
        )
        .bind(session_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record grant progress for {}: {}", session_id, e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, filter: &PurchaseFilter) -> Result<Vec<PurchaseRecord>, AppError> {
        let discord_clause = match filter.discord {
            None => "",
            Some(DiscordFilter::Sent) => "AND discord_notified = TRUE",
            Some(DiscordFilter::Unsent) => "AND discord_notified = FALSE",
            Some(DiscordFilter::Errored) => {
                "AND discord_notified = FALSE AND discord_notify_error IS NOT NULL"
            }
        };
        let query = format!(
            r#"
            SELECT {}
            FROM purchases
            WHERE ($1::TEXT IS NULL OR steam_id = $1)
              AND ($2 OR hidden = FALSE)
              {}
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            PURCHASE_COLUMNS, discord_clause
        );

        let limit = if filter.limit > 0 { filter.limit } else { PurchaseFilter::DEFAULT_LIMIT };
        sqlx::query_as::<_, PurchaseRecord>(&query)
            .bind(&filter.steam_id)
            .bind(filter.include_hidden)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list purchases: {}", e)))
    }

    async fn set_hidden(&self, session_id: &str, hidden: bool, at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET hidden = $2, hidden_at = CASE WHEN $2 THEN $3 ELSE NULL END
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(hidden)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to hide purchase {}: {}", session_id, e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_discord_delivery(&self, session_id: &str, delivery: &DiscordDelivery) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE purchases
            SET discord_notify_attempts = discord_notify_attempts + 1,
                discord_notify_last_attempt_at = $2,
                discord_notified = CASE WHEN $3::TEXT IS NULL THEN TRUE ELSE discord_notified END,
                discord_notified_at = CASE WHEN $3::TEXT IS NULL THEN $2 ELSE discord_notified_at END,
                discord_notify_error = $3
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(delivery.attempted_at)
        .bind(&delivery.error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record Discord delivery for {}: {}", session_id, e)))?;

        Ok(())
    }
}
