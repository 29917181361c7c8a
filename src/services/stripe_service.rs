use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::config::settings::StripeConfig;
use crate::models::GatewayMode;
use crate::stripe_types::{
    CheckoutSession, Coupon, CreateCheckoutSession, CreateCoupon, CreatePromotionCode, ErrorEnvelope,
    Event, PromotionCode,
};
use crate::utils::error_handling::{RetryConfig, retry_with_backoff};

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("Stripe API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        param: Option<String>,
        message: String,
    },
    #[error("Stripe request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Unexpected Stripe response: {0}")]
    InvalidResponse(String),
}

impl StripeServiceError {
    /// Transport failures and gateway-side 5xx/429 are worth one more try.
    pub fn is_transient(&self) -> bool {
        match self {
            StripeServiceError::Http(e) => e.is_timeout() || e.is_connect(),
            StripeServiceError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StripeServiceError::Api { status: 404, .. })
    }
}

static INVALID_PAYMENT_METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)payment method type provided:\s*([a-z0-9_]+)").unwrap());

/// Payment method type the gateway rejected for this account, if that is what the error says.
pub fn invalid_payment_method_type(error: &StripeServiceError) -> Option<String> {
    match error {
        StripeServiceError::Api { message, .. } => INVALID_PAYMENT_METHOD_RE
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase()),
        _ => None,
    }
}

/// Outbound operations against the payment gateway. Every call names the
/// mode whose credentials it must use.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        mode: GatewayMode,
        params: &CreateCheckoutSession,
    ) -> Result<CheckoutSession, StripeServiceError>;

    async fn retrieve_checkout_session(
        &self,
        mode: GatewayMode,
        session_id: &str,
    ) -> Result<CheckoutSession, StripeServiceError>;

    /// `Ok(None)` when the coupon does not exist.
    async fn retrieve_coupon(&self, mode: GatewayMode, coupon_id: &str)
    -> Result<Option<Coupon>, StripeServiceError>;

    async fn create_coupon(&self, mode: GatewayMode, params: &CreateCoupon) -> Result<Coupon, StripeServiceError>;

    async fn delete_coupon(&self, mode: GatewayMode, coupon_id: &str) -> Result<(), StripeServiceError>;

    async fn create_promotion_code(
        &self,
        mode: GatewayMode,
        params: &CreatePromotionCode,
    ) -> Result<PromotionCode, StripeServiceError>;

    async fn set_promotion_code_active(
        &self,
        mode: GatewayMode,
        promotion_code_id: &str,
        active: bool,
    ) -> Result<PromotionCode, StripeServiceError>;

    /// `Ok(None)` when the promotion code does not exist.
    async fn retrieve_promotion_code(
        &self,
        mode: GatewayMode,
        promotion_code_id: &str,
    ) -> Result<Option<PromotionCode>, StripeServiceError>;
}

/// Form-encoded REST client for the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    live_key: String,
    test_key: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self, StripeServiceError> {
        if config.secret_key.trim().is_empty() {
            return Err(StripeServiceError::Configuration("Stripe secret key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(5)))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            live_key: config.secret_key.clone(),
            test_key: config.test_secret_key.clone(),
        })
    }

    fn key(&self, mode: GatewayMode) -> &str {
        match mode {
            GatewayMode::Live => &self.live_key,
            GatewayMode::Test => &self.test_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StripeServiceError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let error = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error)
                .unwrap_or_default();
            let message = if error.message.is_empty() { body } else { error.message };
            return Err(StripeServiceError::Api {
                status: status.as_u16(),
                code: error.code,
                param: error.param,
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| StripeServiceError::InvalidResponse(e.to_string()))
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        mode: GatewayMode,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, StripeServiceError> {
        debug!("POST {} ({} mode)", path, mode);
        let response = self
            .http
            .post(self.url(path))
            .basic_auth(self.key(mode), None::<&str>)
            .form(form)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn get_once<T: DeserializeOwned>(&self, mode: GatewayMode, path: &str) -> Result<T, StripeServiceError> {
        let response = self
            .http
            .get(self.url(path))
            .basic_auth(self.key(mode), None::<&str>)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, mode: GatewayMode, path: &str) -> Result<T, StripeServiceError> {
        debug!("GET {} ({} mode)", path, mode);
        retry_with_backoff(
            || self.get_once(mode, path),
            StripeServiceError::is_transient,
            RetryConfig::for_gateway_reads(),
            path,
        )
        .await
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        mode: GatewayMode,
        params: &CreateCheckoutSession,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.post_form(mode, "checkout/sessions", &params.to_form()).await
    }

    async fn retrieve_checkout_session(
        &self,
        mode: GatewayMode,
        session_id: &str,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let path = format!("checkout/sessions/{}", urlencoding::encode(session_id));
        self.get(mode, &path).await
    }

    async fn retrieve_coupon(
        &self,
        mode: GatewayMode,
        coupon_id: &str,
    ) -> Result<Option<Coupon>, StripeServiceError> {
        let path = format!("coupons/{}", urlencoding::encode(coupon_id));
        match self.get::<Coupon>(mode, &path).await {
            Ok(coupon) => Ok(Some(coupon)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_coupon(&self, mode: GatewayMode, params: &CreateCoupon) -> Result<Coupon, StripeServiceError> {
        self.post_form(mode, "coupons", &params.to_form()).await
    }

    async fn delete_coupon(&self, mode: GatewayMode, coupon_id: &str) -> Result<(), StripeServiceError> {
        let response = self
            .http
            .delete(self.url(&format!("coupons/{}", urlencoding::encode(coupon_id))))
            .basic_auth(self.key(mode), None::<&str>)
            .send()
            .await?;
        Self::parse_response::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn create_promotion_code(
        &self,
        mode: GatewayMode,
        params: &CreatePromotionCode,
    ) -> Result<PromotionCode, StripeServiceError> {
        self.post_form(mode, "promotion_codes", &params.to_form()).await
    }

    async fn set_promotion_code_active(
        &self,
        mode: GatewayMode,
        promotion_code_id: &str,
        active: bool,
    ) -> Result<PromotionCode, StripeServiceError> {
        let path = format!("promotion_codes/{}", urlencoding::encode(promotion_code_id));
        self.post_form(mode, &path, &[("active".to_string(), active.to_string())]).await
    }

    async fn retrieve_promotion_code(
        &self,
        mode: GatewayMode,
        promotion_code_id: &str,
    ) -> Result<Option<PromotionCode>, StripeServiceError> {
        let path = format!("promotion_codes/{}", urlencoding::encode(promotion_code_id));
        match self.get::<PromotionCode>(mode, &path).await {
            Ok(promo) => Ok(Some(promo)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

fn compute_signature(secret: &str, timestamp: &str, payload: &str) -> Result<String, StripeServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| StripeServiceError::WebhookVerification(format!("HMAC error: {}", e)))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies `Stripe-Signature` headers against the configured secrets. The
/// secret that matches decides which mode the event belongs to.
#[derive(Clone)]
pub struct WebhookVerifier {
    secrets: Vec<(GatewayMode, String)>,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(live_secret: Option<String>, test_secret: Option<String>, tolerance_secs: i64) -> Self {
        let secrets = [(GatewayMode::Live, live_secret), (GatewayMode::Test, test_secret)]
            .into_iter()
            .filter_map(|(mode, secret)| secret.filter(|s| !s.is_empty()).map(|s| (mode, s)))
            .collect();
        Self { secrets, tolerance_secs }
    }

    pub fn from_config(config: &StripeConfig) -> Self {
        Self::new(
            config.webhook_secret.clone(),
            config.test_webhook_secret.clone(),
            config.webhook_tolerance_secs,
        )
    }

    pub fn verify(
        &self,
        payload: &str,
        signature_header: &str,
        now: i64,
    ) -> Result<(Event, GatewayMode), StripeServiceError> {
        if self.secrets.is_empty() {
            return Err(StripeServiceError::Configuration("No webhook secret configured".to_string()));
        }

        let mut timestamp = "";
        let mut signatures = Vec::new();
        for element in signature_header.split(',') {
            let element = element.trim();
            if let Some(t) = element.strip_prefix("t=") {
                timestamp = t;
            } else if let Some(s) = element.strip_prefix("v1=") {
                signatures.push(s);
            }
        }

        if timestamp.is_empty() || signatures.is_empty() {
            return Err(StripeServiceError::WebhookVerification(
                "Invalid signature format".to_string(),
            ));
        }

        let signed_at: i64 = timestamp
            .parse()
            .map_err(|_| StripeServiceError::WebhookVerification("Invalid signature timestamp".to_string()))?;
        if self.tolerance_secs > 0 && (now - signed_at).abs() > self.tolerance_secs {
            return Err(StripeServiceError::WebhookVerification(
                "Timestamp outside the tolerance zone".to_string(),
            ));
        }

        for (mode, secret) in &self.secrets {
            let expected = compute_signature(secret, timestamp, payload)?;
            let matched = signatures
                .iter()
                .any(|s| bool::from(s.as_bytes().ct_eq(expected.as_bytes())));
            if matched {
                let event: Event = serde_json::from_str(payload).map_err(|e| {
                    StripeServiceError::WebhookVerification(format!("Failed to parse event: {}", e))
                })?;
                if event.livemode != mode.is_live() {
                    warn!(
                        "Webhook event {} livemode={} verified with {} secret",
                        event.id, event.livemode, mode
                    );
                }
                return Ok((event, *mode));
            }
        }

        Err(StripeServiceError::WebhookVerification(
            "No signatures found matching the expected signature for payload".to_string(),
        ))
    }
}

/// Builds a `Stripe-Signature` header value for a payload.
#[cfg(test)]
pub(crate) fn signature_header(payload: &str, secret: &str, timestamp: i64) -> String {
    let signature = compute_signature(secret, &timestamp.to_string(), payload).unwrap();
    format!("t={},v1={}", timestamp, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAYLOAD: &str = r#"{"id":"evt_1","type":"checkout.session.completed","created":1,"livemode":false,"data":{"object":{"id":"cs_1"}}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(Some("whsec_live".into()), Some("whsec_test".into()), 300)
    }

    fn config(api_base: String) -> StripeConfig {
        StripeConfig {
            secret_key: "sk_live_x".into(),
            test_secret_key: "sk_test_x".into(),
            webhook_secret: None,
            test_webhook_secret: Some("whsec_test".into()),
            api_base,
            webhook_tolerance_secs: 300,
            request_timeout_secs: 5,
            owner_free_coupon_id: "skinvaults_owner_free".into(),
        }
    }

    #[test]
    fn mode_comes_from_the_matching_secret() {
        let now = 1_700_000_000;
        let (event, mode) = verifier()
            .verify(PAYLOAD, &signature_header(PAYLOAD, "whsec_test", now), now)
            .unwrap();
        assert_eq!(mode, GatewayMode::Test);
        assert_eq!(event.id, "evt_1");

        let (_, mode) = verifier()
            .verify(PAYLOAD, &signature_header(PAYLOAD, "whsec_live", now), now)
            .unwrap();
        assert_eq!(mode, GatewayMode::Live);
    }

    #[test]
    fn rejects_unknown_secret_and_tampering() {
        let now = 1_700_000_000;
        let header = signature_header(PAYLOAD, "whsec_other", now);
        assert!(matches!(
            verifier().verify(PAYLOAD, &header, now),
            Err(StripeServiceError::WebhookVerification(_))
        ));

        let header = signature_header(PAYLOAD, "whsec_live", now);
        let tampered = PAYLOAD.replace("cs_1", "cs_2");
        assert!(verifier().verify(&tampered, &header, now).is_err());
    }

    #[test]
    fn rejects_malformed_and_stale_headers() {
        let now = 1_700_000_000;
        assert!(verifier().verify(PAYLOAD, "garbage", now).is_err());
        let stale = signature_header(PAYLOAD, "whsec_live", now - 301);
        assert!(verifier().verify(PAYLOAD, &stale, now).is_err());
    }

    #[test]
    fn extracts_rejected_payment_method() {
        let err = StripeServiceError::Api {
            status: 400,
            code: Some("parameter_invalid".into()),
            param: Some("payment_method_types".into()),
            message: "The payment method type provided: klarna is invalid. Please ensure the provided type is activated in your dashboard".into(),
        };
        assert_eq!(invalid_payment_method_type(&err).as_deref(), Some("klarna"));

        let other = StripeServiceError::Api { status: 400, code: None, param: None, message: "Amount too small".into() };
        assert_eq!(invalid_payment_method_type(&other), None);
    }

    #[tokio::test]
    async fn uses_the_key_for_the_requested_mode() {
        let mut server = mockito::Server::new_async().await;
        let test_mock = server
            .mock("GET", "/v1/checkout/sessions/cs_1")
            .match_header("authorization", "Basic c2tfdGVzdF94Og==")
            .with_status(200)
            .with_body(r#"{"id":"cs_1","payment_status":"paid","metadata":{"steamId":"1"}}"#)
            .create_async()
            .await;

        let client = StripeClient::new(&config(server.url())).unwrap();
        let session = client.retrieve_checkout_session(GatewayMode::Test, "cs_1").await.unwrap();

        test_mock.assert_async().await;
        assert_eq!(session.payment_status.as_deref(), Some("paid"));
    }

    #[tokio::test]
    async fn api_errors_carry_the_gateway_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/checkout/sessions")
            .with_status(400)
            .with_body(r#"{"error":{"type":"invalid_request_error","message":"The payment method type provided: eps is invalid."}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = StripeClient::new(&config(server.url())).unwrap();
        let err = client
            .create_checkout_session(GatewayMode::Live, &CreateCheckoutSession::default())
            .await
            .unwrap_err();

        assert_eq!(invalid_payment_method_type(&err).as_deref(), Some("eps"));
    }

    #[tokio::test]
    async fn missing_coupon_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/coupons/skinvaults_owner_free")
            .with_status(404)
            .with_body(r#"{"error":{"type":"invalid_request_error","code":"resource_missing","message":"No such coupon"}}"#)
            .create_async()
            .await;

        let client = StripeClient::new(&config(server.url())).unwrap();
        let coupon = client.retrieve_coupon(GatewayMode::Live, "skinvaults_owner_free").await.unwrap();
        assert!(coupon.is_none());
    }
}
