use actix_web::{HttpRequest, HttpResponse, http::header, post, web};
use chrono::Utc;
use log::info;

use crate::config::AppSettings;
use crate::error::AppError;
use crate::middleware::steam_session::SteamSession;
use crate::models::AppState;
use crate::services::checkout_service::{CheckoutContext, CheckoutRequest, ItemCheckoutKind, ItemCheckoutRequest};

/// Scheme and host the checkout redirects return to.
///
/// The request `Origin` is used when CORS would accept it, otherwise the
/// configured public base URL.
fn redirect_origin(req: &HttpRequest, settings: &AppSettings) -> String {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| o.starts_with("https://") || o.starts_with("http://"));

    match origin {
        Some(o) if settings.server.cors_origins.iter().any(|allowed| allowed == "*" || allowed == o) => {
            o.to_string()
        }
        _ => settings.server.public_base_url.clone(),
    }
}

async fn checkout_context(req: &HttpRequest, state: &AppState, session: SteamSession) -> Result<CheckoutContext, AppError> {
    Ok(CheckoutContext {
        mode: state.gateway_mode().await?,
        origin: redirect_origin(req, &state.settings),
        session_steam_id: session.0,
        now: Utc::now(),
    })
}

/// Create a hosted checkout session for a storefront cart
#[post("/checkout-cart")]
pub async fn create_cart_checkout_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
    session: SteamSession,
    request: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, AppError> {
    let ctx = checkout_context(&req, &state, session).await?;

    info!(
        "Cart checkout requested by {} with {} items ({})",
        request.steam_id,
        request.items.len(),
        ctx.mode
    );
    let response = state.checkout.create_cart_checkout(&request, &ctx).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn item_checkout(
    kind: ItemCheckoutKind,
    req: HttpRequest,
    state: web::Data<AppState>,
    session: SteamSession,
    request: web::Json<ItemCheckoutRequest>,
) -> Result<HttpResponse, AppError> {
    let ctx = checkout_context(&req, &state, session).await?;
    info!("{} checkout requested by {} ({})", kind.as_str(), request.steam_id, ctx.mode);
    let response = state.checkout.create_item_checkout(kind, &request, &ctx).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Pro plan checkout
#[post("/checkout")]
pub async fn create_pro_checkout_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
    session: SteamSession,
    request: web::Json<ItemCheckoutRequest>,
) -> Result<HttpResponse, AppError> {
    item_checkout(ItemCheckoutKind::Pro, req, state, session, request).await
}

#[post("/checkout-credits")]
pub async fn create_credits_checkout_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
    session: SteamSession,
    request: web::Json<ItemCheckoutRequest>,
) -> Result<HttpResponse, AppError> {
    item_checkout(ItemCheckoutKind::Credits, req, state, session, request).await
}

#[post("/checkout-spins")]
pub async fn create_spins_checkout_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
    session: SteamSession,
    request: web::Json<ItemCheckoutRequest>,
) -> Result<HttpResponse, AppError> {
    item_checkout(ItemCheckoutKind::Spins, req, state, session, request).await
}

#[post("/checkout-consumable")]
pub async fn create_consumable_checkout_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
    session: SteamSession,
    request: web::Json<ItemCheckoutRequest>,
) -> Result<HttpResponse, AppError> {
    item_checkout(ItemCheckoutKind::Consumable, req, state, session, request).await
}
