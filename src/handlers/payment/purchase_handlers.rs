use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use log::info;
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::steam_session::SteamSession;
use crate::models::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPurchaseRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub steam_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseStatusQuery {
    #[serde(alias = "session_id")]
    pub session_id: Option<String>,
    pub steam_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementsQuery {
    pub steam_id: Option<String>,
}

/// Re-run fulfillment for a paid session whose webhook never arrived
#[post("/verify-purchase")]
pub async fn verify_purchase_handler(
    state: web::Data<AppState>,
    request: web::Json<VerifyPurchaseRequest>,
) -> Result<HttpResponse, AppError> {
    info!("Manual verification requested for {} by {}", request.session_id, request.steam_id);
    let response = state.fulfillment.verify_purchase(&request.session_id, &request.steam_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[get("/verify-purchase")]
pub async fn purchase_status_handler(
    state: web::Data<AppState>,
    query: web::Query<PurchaseStatusQuery>,
) -> Result<HttpResponse, AppError> {
    let session_id = query.session_id.as_deref().unwrap_or("");
    let status = state.fulfillment.purchase_status(session_id, query.steam_id.as_deref()).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// Balances for `?steamId`, or for the signed-in user when omitted
#[get("/entitlements")]
pub async fn entitlements_handler(
    state: web::Data<AppState>,
    session: SteamSession,
    query: web::Query<EntitlementsQuery>,
) -> Result<HttpResponse, AppError> {
    let steam_id = query
        .steam_id
        .as_deref()
        .or(session.steam_id())
        .ok_or_else(|| AppError::BadRequest("Missing steamId".to_string()))?;
    let summary = state.entitlements.summary(steam_id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(summary))
}
