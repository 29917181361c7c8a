use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;

use skinvaults_payments::config::AppSettings;
use skinvaults_payments::db::{MemoryStore, Stores, create_pool, run_migrations, verify_connection};
use skinvaults_payments::models::{AppState, payment_subscribers};
use skinvaults_payments::routes::configure_app;
use skinvaults_payments::services::purchase_events::{PaymentEventSender, spawn_dispatcher};
use skinvaults_payments::services::stripe_service::{PaymentGateway, StripeClient};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match AppSettings::from_env() {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    // Storage: PostgreSQL when configured, in-memory otherwise
    let stores = match app_settings.database.url.as_deref() {
        Some(url) => {
            let pool = match create_pool(url).await {
                Ok(pool) => pool,
                Err(e) => {
                    log::error!("Failed to create database connection pool: {}", e);
                    log::error!("Cannot start server without a working database connection");
                    std::process::exit(1);
                }
            };
            if let Err(e) = verify_connection(&pool).await {
                log::error!("Database connection verification failed: {}", e);
                std::process::exit(1);
            }
            if app_settings.database.run_migrations {
                if let Err(e) = run_migrations(&pool).await {
                    log::error!("{}", e);
                    std::process::exit(1);
                }
            }
            log::info!("Database connection established successfully");
            Stores::postgres(pool)
        }
        None => {
            log::warn!("DATABASE_URL is not set; using the in-memory store. Purchases are lost on restart.");
            Stores::in_memory(Arc::new(MemoryStore::new()))
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match StripeClient::new(&app_settings.stripe) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("Failed to initialize Stripe client: {}", e);
            std::process::exit(1);
        }
    };

    // Side effects of payments run off the request path
    let (events, receiver) = PaymentEventSender::channel();
    let subscribers = match payment_subscribers(&app_settings, &stores) {
        Ok(subscribers) => subscribers,
        Err(e) => {
            log::error!("Failed to initialize payment event subscribers: {}", e);
            std::process::exit(1);
        }
    };
    let _dispatcher = spawn_dispatcher(receiver, subscribers);

    let state = match AppState::new(app_settings.clone(), stores, gateway, events) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    let server_addr = format!("{}:{}", app_settings.server.host, app_settings.server.port);
    log::info!("Starting {} at http://{}", app_settings.app.name, server_addr);
    let listener = TcpListener::bind(server_addr)?;

    HttpServer::new(move || {
        // Configure CORS using actix-cors
        let mut cors = Cors::default().supports_credentials();
        if app_settings.server.cors_origins.iter().any(|o| o == "*") {
            cors = cors.allow_any_origin();
        } else {
            for origin in &app_settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure_app)
    })
    .listen(listener)?
    .run()
    .await
}
