use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::middleware::steam_session::AdminSession;
use crate::models::{AppState, DiscordFilter, PurchaseFilter};
use crate::services::promo_service::parse_flag;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseListQuery {
    pub steam_id: Option<String>,
    pub include_hidden: Option<String>,
    pub discord: Option<String>,
}

impl PurchaseListQuery {
    fn filter(&self) -> Result<PurchaseFilter, AppError> {
        let discord = match self.discord.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            None => None,
            Some("unsent") => Some(DiscordFilter::Unsent),
            Some("sent") => Some(DiscordFilter::Sent),
            Some("errored") => Some(DiscordFilter::Errored),
            Some(other) => return Err(AppError::BadRequest(format!("Unknown discord filter: {}", other))),
        };
        Ok(PurchaseFilter {
            steam_id: self.steam_id.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            include_hidden: parse_flag(self.include_hidden.as_deref()),
            discord,
            limit: PurchaseFilter::DEFAULT_LIMIT,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PurchaseAction {
    #[serde(rename_all = "camelCase")]
    Hide { session_id: String },
    #[serde(rename_all = "camelCase")]
    RetryDiscord { session_id: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPurchaseQuery {
    pub steam_id: Option<String>,
}

/// Purchase history, newest first
#[get("/purchases")]
pub async fn list_purchases_handler(
    _admin: AdminSession,
    state: web::Data<AppState>,
    query: web::Query<PurchaseListQuery>,
) -> Result<HttpResponse, AppError> {
    let purchases = state.reconciliation.purchases(&query.filter()?).await?;
    Ok(HttpResponse::Ok().json(json!({ "purchases": purchases })))
}

#[post("/purchases")]
pub async fn purchase_action_handler(
    admin: AdminSession,
    state: web::Data<AppState>,
    action: web::Json<PurchaseAction>,
) -> Result<HttpResponse, AppError> {
    let now = Utc::now();
    match action.into_inner() {
        PurchaseAction::Hide { session_id } => {
            info!("{} hid purchase {}", admin.steam_id, session_id);
            state.reconciliation.hide(&session_id, now).await?;
        }
        PurchaseAction::RetryDiscord { session_id } => {
            info!("{} retried Discord notice for {}", admin.steam_id, session_id);
            state.reconciliation.retry_discord(&session_id, now).await?;
        }
    }
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[get("/failed-purchases")]
pub async fn failed_purchases_handler(
    _admin: AdminSession,
    state: web::Data<AppState>,
    query: web::Query<FailedPurchaseQuery>,
) -> Result<HttpResponse, AppError> {
    let failed = state.reconciliation.failed_purchases(query.steam_id.as_deref()).await?;
    Ok(HttpResponse::Ok().json(json!({ "failedPurchases": failed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FailedPurchaseStore, PurchaseStore};
    use crate::models::{FailedPurchase, PurchaseRecord, PurchaseSource, PurchaseType};
    use crate::test_support::{ADMIN, BUYER, OWNER, session_cookie, test_app};
    use actix_web::{App, http::StatusCode, test as actix_test};
    use serde_json::Value;
    use uuid::Uuid;

    macro_rules! app {
        ($state:expr) => {
            actix_test::init_service(
                App::new().app_data(web::Data::new($state)).service(
                    web::scope("/api/admin")
                        .service(list_purchases_handler)
                        .service(purchase_action_handler)
                        .service(failed_purchases_handler),
                ),
            )
            .await
        };
    }

    #[test]
    fn discord_filter_must_be_known() {
        let query = PurchaseListQuery { steam_id: None, include_hidden: Some("1".into()), discord: Some("errored".into()) };
        let filter = query.filter().unwrap();
        assert!(filter.include_hidden);
        assert_eq!(filter.discord, Some(DiscordFilter::Errored));

        let query = PurchaseListQuery { steam_id: None, include_hidden: None, discord: Some("maybe".into()) };
        assert!(matches!(query.filter(), Err(AppError::BadRequest(_))));
    }

    #[actix_web::test]
    async fn admins_list_and_hide_purchases() {
        let t = test_app();
        let record =
            PurchaseRecord::claim("cs_live_1", BUYER, PurchaseType::Credits, 199, "eur", false, PurchaseSource::Webhook);
        t.store.claim(&record).await.unwrap();
        let app = app!(t.state.clone());

        for user in [ADMIN, OWNER] {
            let req = actix_test::TestRequest::get().uri("/api/admin/purchases").cookie(session_cookie(user)).to_request();
            let body: Value = actix_test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["purchases"].as_array().map(Vec::len), Some(1));
        }

        let req = actix_test::TestRequest::get().uri("/api/admin/purchases").cookie(session_cookie(BUYER)).to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = actix_test::TestRequest::post()
            .uri("/api/admin/purchases")
            .cookie(session_cookie(ADMIN))
            .set_json(json!({ "action": "hide", "sessionId": "cs_live_1" }))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "success": true }));

        let req = actix_test::TestRequest::get().uri("/api/admin/purchases").cookie(session_cookie(ADMIN)).to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["purchases"], json!([]));

        let req = actix_test::TestRequest::post()
            .uri("/api/admin/purchases")
            .cookie(session_cookie(ADMIN))
            .set_json(json!({ "action": "retry_discord", "sessionId": "cs_live_1" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_web::test]
    async fn failed_purchases_filter_by_buyer() {
        let t = test_app();
        for (session_id, steam_id) in [("cs_live_1", BUYER), ("cs_live_2", "76561198000000002")] {
            let failure = FailedPurchase {
                id: Uuid::new_v4(),
                session_id: session_id.into(),
                steam_id: steam_id.into(),
                purchase_type: PurchaseType::Pro,
                error: "connection reset".into(),
                amount_minor: 999,
                currency: "eur".into(),
                test_mode: false,
                created_at: Utc::now(),
            };
            t.store.record(&failure).await.unwrap();
        }
        let app = app!(t.state.clone());

        let req = actix_test::TestRequest::get()
            .uri(&format!("/api/admin/failed-purchases?steamId={}", BUYER))
            .cookie(session_cookie(ADMIN))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        let failed = body["failedPurchases"].as_array().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["sessionId"], "cs_live_1");
    }
}
