use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};

use crate::models::AppState;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    // Public endpoint, no store or gateway probing
    let response = HealthResponse {
        status: "ok".to_string(),
        service: state.settings.app.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    HttpResponse::Ok().json(response)
}
