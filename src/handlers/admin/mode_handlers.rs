use actix_web::{HttpResponse, get, post, web};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::steam_session::OwnerSession;
use crate::models::{AppState, GatewayMode};
use crate::services::gateway_mode_service::set_mode;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeModeBody {
    pub test_mode: bool,
}

#[get("/stripe-mode")]
pub async fn get_stripe_mode_handler(
    _owner: OwnerSession,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let mode = state.gateway_mode().await?;
    Ok(HttpResponse::Ok().json(StripeModeBody { test_mode: mode.is_test() }))
}

/// Switch checkout and promo admin between the live and test Stripe accounts
#[post("/stripe-mode")]
pub async fn set_stripe_mode_handler(
    owner: OwnerSession,
    state: web::Data<AppState>,
    body: web::Json<StripeModeBody>,
) -> Result<HttpResponse, AppError> {
    let mode = GatewayMode::from_test_flag(body.test_mode);
    warn!("{} switched the Stripe gateway to {} mode", owner.steam_id, mode);
    set_mode(state.stores.kv.as_ref(), mode).await?;
    Ok(HttpResponse::Ok().json(StripeModeBody { test_mode: mode.is_test() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ADMIN, OWNER, session_cookie, test_app};
    use actix_web::{App, http::StatusCode, test};
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn owners_toggle_the_mode() {
        let t = test_app();
        let app = test::init_service(
            App::new().app_data(web::Data::new(t.state.clone())).service(
                web::scope("/api/admin").service(get_stripe_mode_handler).service(set_stripe_mode_handler),
            ),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/admin/stripe-mode")
            .cookie(session_cookie(ADMIN))
            .set_json(json!({ "testMode": true }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/admin/stripe-mode")
            .cookie(session_cookie(OWNER))
            .set_json(json!({ "testMode": true }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "testMode": true }));

        assert_eq!(t.state.gateway_mode().await.unwrap(), GatewayMode::Test);

        let req = test::TestRequest::get().uri("/api/admin/stripe-mode").cookie(session_cookie(OWNER)).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "testMode": true }));
    }
}
