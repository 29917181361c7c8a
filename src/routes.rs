use actix_web::web;
use crate::handlers;

/// Storefront payment routes, mounted under "/api/payment".
/// The webhook authenticates by signature; the rest take an optional Steam session.
pub fn configure_payment_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::payment::create_cart_checkout_handler)
        .service(handlers::payment::create_pro_checkout_handler)
        .service(handlers::payment::create_credits_checkout_handler)
        .service(handlers::payment::create_spins_checkout_handler)
        .service(handlers::payment::create_consumable_checkout_handler)
        .service(handlers::payment::stripe_webhook)
        .service(handlers::payment::verify_purchase_handler)
        .service(handlers::payment::purchase_status_handler)
        .service(handlers::payment::entitlements_handler);
}

/// Public coupon routes, mounted under "/api/coupons".
pub fn configure_coupon_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::coupon_handlers::public_coupons_handler);
}

/// Owner and admin routes, mounted under "/api/admin".
/// Each handler checks its own role through the session extractors.
pub fn configure_admin_routes(cfg: &mut web::ServiceConfig) {
    // Owner only
    cfg.service(handlers::admin::list_coupons_handler)
        .service(handlers::admin::manage_coupons_handler)
        .service(handlers::admin::get_stripe_mode_handler)
        .service(handlers::admin::set_stripe_mode_handler);

    // Owner or admin
    cfg.service(handlers::admin::list_purchases_handler)
        .service(handlers::admin::purchase_action_handler)
        .service(handlers::admin::failed_purchases_handler);
}

/// Every route of the service, as mounted by the server binary.
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health::health_check))
        .service(web::scope("/api/payment").configure(configure_payment_routes))
        .service(web::scope("/api/coupons").configure(configure_coupon_routes))
        .service(web::scope("/api/admin").configure(configure_admin_routes));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{OWNER, session_cookie, test_app};
    use actix_web::{App, http::StatusCode, test};

    #[actix_web::test]
    async fn every_scope_is_mounted() {
        let t = test_app();
        let app = test::init_service(App::new().app_data(web::Data::new(t.state.clone())).configure(configure_app)).await;

        for (uri, expected) in [
            ("/health", StatusCode::OK),
            ("/api/coupons/public", StatusCode::OK),
            ("/api/payment/verify-purchase?session_id=cs_live_1", StatusCode::OK),
            ("/api/admin/failed-purchases", StatusCode::UNAUTHORIZED),
            ("/api/unknown", StatusCode::NOT_FOUND),
        ] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), expected, "{}", uri);
        }

        let req = test::TestRequest::get().uri("/api/admin/stripe-mode").cookie(session_cookie(OWNER)).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
