use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::middleware::steam_session::OwnerSession;
use crate::models::AppState;
use crate::services::promo_service::{ListOptions, PromoAction, parse_flag};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponListQuery {
    pub include_deleted: Option<String>,
    pub include_all_modes: Option<String>,
    pub include_live: Option<String>,
}

impl CouponListQuery {
    fn options(&self) -> ListOptions {
        ListOptions {
            include_deleted: parse_flag(self.include_deleted.as_deref()),
            include_all_modes: parse_flag(self.include_all_modes.as_deref()),
            include_live: parse_flag(self.include_live.as_deref()),
        }
    }
}

#[get("/coupons")]
pub async fn list_coupons_handler(
    _owner: OwnerSession,
    state: web::Data<AppState>,
    query: web::Query<CouponListQuery>,
) -> Result<HttpResponse, AppError> {
    let mode = state.gateway_mode().await?;
    let listing = state.promos.list(mode, query.options(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(listing))
}

/// Create, toggle, edit or soft-delete a promo code
#[post("/coupons")]
pub async fn manage_coupons_handler(
    owner: OwnerSession,
    state: web::Data<AppState>,
    action: web::Json<PromoAction>,
) -> Result<HttpResponse, AppError> {
    let mode = state.gateway_mode().await?;
    info!("Promo admin action by {}: {:?}", owner.steam_id, action);
    let promo = state.promos.apply(mode, action.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "promo": promo })))
}
