use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use crate::error::AppError;
use crate::utils::error_handling::{RetryConfig, retry_with_backoff};

/// Creates a PostgreSQL connection pool, retrying while the database comes up.
/// Authentication failures are not retried.
pub async fn create_pool(database_url: &str) -> Result<PgPool, AppError> {
    log::info!("Creating database connection pool");

    let pool = retry_with_backoff(
        || {
            PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(60))
                .connect(database_url)
        },
        |e: &sqlx::Error| !e.to_string().contains("authentication failed"),
        RetryConfig::for_database_connect(),
        "database_connect",
    )
    .await
    .map_err(|e| {
        if e.to_string().contains("authentication failed") {
            log::error!("Database authentication failed. Please check your DATABASE_URL credentials.");
        } else if e.to_string().contains("Connection refused") {
            log::error!("Database connection refused. Please check if the database server is running and accessible.");
        }
        AppError::Database(e.to_string())
    })?;

    log::info!("Successfully connected to database");
    Ok(pool)
}

/// Verifies the database connection by executing a simple query.
pub async fn verify_connection(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query_as::<_, (i32,)>("SELECT 1 as result")
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            log::error!("Database connection verification failed: {}", e);
            AppError::Database(e.to_string())
        })?;

    log::info!("Database connection verified successfully");
    Ok(())
}

/// Applies the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to run migrations: {}", e)))?;

    log::info!("Database migrations applied");
    Ok(())
}
