use actix_web::{HttpResponse, get, web};
use chrono::Utc;
use serde_json::json;

use crate::error::AppError;
use crate::models::AppState;

/// Promos the storefront may advertise in the current gateway mode
#[get("/public")]
pub async fn public_coupons_handler(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let mode = state.gateway_mode().await?;
    let coupons = state.promos.public_promos(mode, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(json!({ "coupons": coupons })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::promo_service::CreatePromoRequest;
    use crate::models::GatewayMode;
    use crate::test_support::test_app;
    use actix_web::{App, test};
    use serde_json::Value;

    #[actix_web::test]
    async fn lists_only_general_active_promos() {
        let t = test_app();
        let now = Utc::now();
        for (code, active, slug) in [("SUMMER10", true, None), ("PAUSED", false, None), ("CREATOR5", true, Some("alice"))] {
            let req = CreatePromoRequest {
                code: code.into(),
                percent_off: Some(json!(10)),
                active,
                creator_slug: slug.map(str::to_string),
                ..Default::default()
            };
            t.state.promos.create(GatewayMode::Live, &req, now).await.unwrap();
        }

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(t.state.clone()))
                .service(web::scope("/api/coupons").service(public_coupons_handler)),
        )
        .await;
        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/coupons/public").to_request()).await;
        let codes: Vec<&str> = body["coupons"].as_array().unwrap().iter().filter_map(|c| c["code"].as_str()).collect();
        assert_eq!(codes, vec!["SUMMER10"]);
    }
}
