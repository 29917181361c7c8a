use std::env;
use crate::error::AppError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub notifications: NotificationConfig,
    pub retention: RetentionConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `None` runs the service on the in-memory store.
    pub url: Option<String>,
    pub run_migrations: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Fallback origin for checkout redirect URLs when the request has no Origin header.
    pub public_base_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub session_secret: String,
    pub owner_steam_ids: Vec<String>,
    pub admin_steam_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub test_secret_key: String,
    pub webhook_secret: Option<String>,
    pub test_webhook_secret: Option<String>,
    pub api_base: String,
    pub webhook_tolerance_secs: i64,
    pub request_timeout_secs: u64,
    pub owner_free_coupon_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub discord_purchase_webhook_url: Option<String>,
    pub discord_cart_webhook_url: Option<String>,
    pub discord_role_sync_url: Option<String>,
    pub discord_role_sync_token: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub failed_purchases_keep: i64,
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, AppError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::Configuration(format!("{} must be a valid number", name)))
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        // App config
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "skinvaults-payments".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Database config
        let database_url = optional_var("DATABASE_URL");
        let run_migrations = env::var("RUN_MIGRATIONS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        // Server config
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| AppError::Configuration("SERVER_PORT must be a valid port number".to_string()))?;

        let cors_origins = split_list(&env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()));

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "https://skinvaults.online".to_string())
            .trim_end_matches('/')
            .to_string();

        // Auth config
        let session_secret = env::var("SESSION_SECRET")
            .map_err(|_| AppError::Configuration("SESSION_SECRET must be set".to_string()))?;
        let owner_steam_ids = split_list(&env::var("OWNER_STEAM_IDS").unwrap_or_default());
        let admin_steam_ids = split_list(&env::var("ADMIN_STEAM_IDS").unwrap_or_default());

        // Stripe configuration
        let stripe_secret_key = env::var("STRIPE_SECRET_KEY")
            .map_err(|_| AppError::Configuration("STRIPE_SECRET_KEY must be set".to_string()))?;
        let stripe_test_secret_key =
            optional_var("STRIPE_TEST_SECRET_KEY").unwrap_or_else(|| stripe_secret_key.clone());
        let webhook_secret = optional_var("STRIPE_WEBHOOK_SECRET");
        let test_webhook_secret = optional_var("STRIPE_TEST_WEBHOOK_SECRET");
        if webhook_secret.is_none() && test_webhook_secret.is_none() {
            return Err(AppError::Configuration(
                "STRIPE_WEBHOOK_SECRET or STRIPE_TEST_WEBHOOK_SECRET must be set".to_string(),
            ));
        }
        let api_base = env::var("STRIPE_API_BASE")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let webhook_tolerance_secs = parse_var::<i64>("STRIPE_WEBHOOK_TOLERANCE_SECS", "300")?;
        let request_timeout_secs = parse_var::<u64>("OUTBOUND_TIMEOUT_SECS", "15")?;
        let owner_free_coupon_id =
            env::var("OWNER_FREE_COUPON_ID").unwrap_or_else(|_| "skinvaults_owner_free".to_string());

        // Outbound notifications
        let notifications = NotificationConfig {
            discord_purchase_webhook_url: optional_var("DISCORD_PURCHASE_WEBHOOK_URL"),
            discord_cart_webhook_url: optional_var("DISCORD_CART_WEBHOOK_URL"),
            discord_role_sync_url: optional_var("DISCORD_ROLE_SYNC_URL"),
            discord_role_sync_token: optional_var("DISCORD_ROLE_SYNC_TOKEN"),
        };

        let failed_purchases_keep = parse_var::<i64>("FAILED_PURCHASES_RETENTION", "100")?;

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            database: DatabaseConfig {
                url: database_url,
                run_migrations,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
                public_base_url,
            },
            auth: AuthConfig {
                session_secret,
                owner_steam_ids,
                admin_steam_ids,
            },
            stripe: StripeConfig {
                secret_key: stripe_secret_key,
                test_secret_key: stripe_test_secret_key,
                webhook_secret,
                test_webhook_secret,
                api_base,
                webhook_tolerance_secs,
                request_timeout_secs,
                owner_free_coupon_id,
            },
            notifications,
            retention: RetentionConfig {
                failed_purchases_keep,
            },
        })
    }

    pub fn is_owner(&self, steam_id: &str) -> bool {
        self.auth.owner_steam_ids.iter().any(|id| id == steam_id)
    }

    pub fn is_admin(&self, steam_id: &str) -> bool {
        self.is_owner(steam_id) || self.auth.admin_steam_ids.iter().any(|id| id == steam_id)
    }
}
