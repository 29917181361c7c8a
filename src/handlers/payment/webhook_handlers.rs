use actix_web::{HttpRequest, HttpResponse, post, web};
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;

use crate::error::AppError;
use crate::models::AppState;
use crate::services::fulfillment_service::FulfillmentOutcome;

/// Stripe webhook endpoint.
///
/// Answers 200 once the signature checks out, including for grant failures,
/// which land in the failed purchase log instead of a gateway retry. Only a
/// failed purchase claim answers 5xx, since nothing was mutated yet.
#[post("/webhook")]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let signature = req
        .headers()
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing stripe-signature header".to_string()))?;

    let payload = std::str::from_utf8(&body)
        .map_err(|_| AppError::BadRequest("Webhook Error: payload is not valid UTF-8".to_string()))?;

    let (event, mode) = state.verifier.verify(payload, signature, Utc::now().timestamp()).map_err(|e| {
        warn!("Rejected webhook delivery: {}", e);
        AppError::from(e)
    })?;
    info!("Received {} webhook {} ({})", mode, event.id, event.type_);

    match state.fulfillment.handle_event(&event, mode).await {
        Ok(FulfillmentOutcome::Fulfilled(granted)) => {
            info!("Webhook {} fulfilled {} for {}", event.id, granted.session_id, granted.steam_id);
        }
        Ok(FulfillmentOutcome::AlreadyFulfilled) | Ok(FulfillmentOutcome::InProgress) => {
            info!("Webhook {} was a redelivery, nothing granted", event.id);
        }
        Ok(FulfillmentOutcome::Failed { error }) => {
            error!("Webhook {} grant failed and was logged for manual recovery: {}", event.id, error);
        }
        Ok(FulfillmentOutcome::Ignored { reason }) => {
            info!("Webhook {} ignored: {}", event.id, reason);
        }
        Err(e) => {
            error!("Webhook {} could not be claimed: {}", event.id, e);
            return Err(e);
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreditStore, FailedPurchaseStore, PurchaseStore};
    use crate::services::stripe_service::signature_header;
    use crate::test_support::{BUYER, LIVE_WEBHOOK_SECRET, TEST_WEBHOOK_SECRET, test_app};
    use actix_web::{App, http::StatusCode, test};
    use serde_json::Value;

    fn completed_event(session_id: &str, metadata: Value) -> String {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "livemode": false,
            "data": { "object": {
                "id": session_id,
                "payment_status": "paid",
                "amount_total": 199,
                "currency": "eur",
                "metadata": metadata,
            }},
        })
        .to_string()
    }

    fn signed(payload: &str, secret: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/payment/webhook")
            .insert_header(("stripe-signature", signature_header(payload, secret, Utc::now().timestamp())))
            .set_payload(payload.to_string())
    }

    #[actix_web::test]
    async fn signed_deliveries_grant_once() {
        let t = test_app();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(t.state.clone()))
                .service(web::scope("/api/payment").service(stripe_webhook)),
        )
        .await;
        let payload =
            completed_event("cs_test_1", json!({ "steamId": BUYER, "type": "credits", "credits": "500" }));

        for _ in 0..3 {
            let body: Value = test::call_and_read_body_json(&app, signed(&payload, TEST_WEBHOOK_SECRET).to_request()).await;
            assert_eq!(body, json!({ "received": true }));
        }

        assert_eq!(t.store.credits_balance(BUYER).await.unwrap(), 500);
        let record = t.store.find("cs_test_1").await.unwrap().unwrap();
        assert!(record.fulfilled);
        assert!(record.test_mode);
    }

    #[actix_web::test]
    async fn bad_signatures_are_rejected_without_side_effects() {
        let t = test_app();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(t.state.clone()))
                .service(web::scope("/api/payment").service(stripe_webhook)),
        )
        .await;
        let payload =
            completed_event("cs_live_1", json!({ "steamId": BUYER, "type": "credits", "credits": "500" }));

        let missing = test::TestRequest::post().uri("/api/payment/webhook").set_payload(payload.clone()).to_request();
        assert_eq!(test::call_service(&app, missing).await.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(&app, signed(&payload, "whsec_unknown").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(t.store.credits_balance(BUYER).await.unwrap(), 0);
        assert!(t.store.find("cs_live_1").await.unwrap().is_none());

        let resp = test::call_service(&app, signed(&payload, LIVE_WEBHOOK_SECRET).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(t.store.credits_balance(BUYER).await.unwrap(), 500);
    }

    #[actix_web::test]
    async fn grant_failures_still_answer_ok() {
        let t = test_app();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(t.state.clone()))
                .service(web::scope("/api/payment").service(stripe_webhook)),
        )
        .await;
        // Cart sessions whose pending cart is gone cannot be granted.
        let payload = completed_event("cs_live_2", json!({ "steamId": BUYER, "type": "cart", "cartId": "gone" }));

        let resp = test::call_service(&app, signed(&payload, LIVE_WEBHOOK_SECRET).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let failures = FailedPurchaseStore::list(t.store.as_ref(), Some(BUYER), 10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].session_id, "cs_live_2");
    }
}
