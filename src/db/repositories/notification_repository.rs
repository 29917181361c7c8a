use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::{AnalyticsEvent, UserNotification};

/// Sinks for best-effort purchase side effects, plus the Discord link lookup.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_user_notification(&self, notification: &UserNotification) -> Result<(), AppError>;
    async fn record_analytics_event(&self, event: &AnalyticsEvent) -> Result<(), AppError>;
    async fn discord_id_for(&self, steam_id: &str) -> Result<Option<String>, AppError>;
}

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for NotificationRepository {
    async fn create_user_notification(&self, notification: &UserNotification) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_notifications (id, steam_id, kind, title, message, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.steam_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.meta)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create user notification: {}", e)))?;

        Ok(())
    }

    async fn record_analytics_event(&self, event: &AnalyticsEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO analytics_events
                (id, steam_id, event, session_id, amount_minor, currency, creator_slug, promo_code, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(&event.steam_id)
        .bind(&event.event)
        .bind(&event.session_id)
        .bind(event.amount_minor)
        .bind(&event.currency)
        .bind(&event.creator_slug)
        .bind(&event.promo_code)
        .bind(&event.meta)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record analytics event: {}", e)))?;

        Ok(())
    }

    async fn discord_id_for(&self, steam_id: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT discord_id FROM discord_links WHERE steam_id = $1")
            .bind(steam_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to look up Discord link for {}: {}", steam_id, e)))?;

        Ok(row.map(|(id,)| id))
    }
}
