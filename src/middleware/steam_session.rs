//! Steam sign-in sessions.
//!
//! The storefront signs users in through Steam OpenID and hands out an HS256
//! token whose subject is the SteamID64. It arrives as the `sv_session`
//! cookie or as a bearer token.

use actix_web::{FromRequest, HttpRequest, dev::Payload, http::header, web};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::{Ready, ready};

use crate::error::AppError;
use crate::models::AppState;

pub const SESSION_COOKIE: &str = "sv_session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

pub fn issue_session_token(secret: &str, steam_id: &str, ttl: Duration) -> Result<String, AppError> {
    let iat = Utc::now();
    let exp = iat
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Internal("Failed to calculate session expiration time".to_string()))?;
    let claims = SessionClaims {
        sub: steam_id.to_string(),
        exp: exp.timestamp() as usize,
        iat: iat.timestamp() as usize,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AppError::Internal(format!("Session token generation failed: {}", e)))
}

pub fn verify_session_token(secret: &str, token: &str) -> Result<SessionClaims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::Unauthorized("Session has expired".to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                AppError::Unauthorized("Invalid session signature".to_string())
            }
            _ => AppError::Unauthorized(format!("Invalid session: {:?}", err.kind())),
        })?;
    Ok(data.claims)
}

fn session_token(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        let value = cookie.value().trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn app_state(req: &HttpRequest) -> Result<&web::Data<AppState>, AppError> {
    req.app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::Configuration("Application state is not registered".to_string()))
}

fn signed_in_steam_id(req: &HttpRequest) -> Result<String, AppError> {
    let state = app_state(req)?;
    let token = session_token(req).ok_or_else(|| AppError::Unauthorized("Not signed in".to_string()))?;
    let claims = verify_session_token(&state.settings.auth.session_secret, &token)?;
    Ok(claims.sub)
}

/// The signed-in Steam user, if any. Invalid tokens read as signed out.
#[derive(Debug, Clone, Default)]
pub struct SteamSession(pub Option<String>);

impl SteamSession {
    pub fn steam_id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl FromRequest for SteamSession {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        if session_token(req).is_none() {
            return ready(Ok(SteamSession(None)));
        }
        match signed_in_steam_id(req) {
            Ok(steam_id) => ready(Ok(SteamSession(Some(steam_id)))),
            Err(AppError::Configuration(msg)) => ready(Err(AppError::Configuration(msg))),
            Err(e) => {
                debug!("Ignoring unusable session token: {}", e);
                ready(Ok(SteamSession(None)))
            }
        }
    }
}

/// Owner or admin.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub steam_id: String,
}

impl FromRequest for AdminSession {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(signed_in_steam_id(req).and_then(|steam_id| {
            let state = app_state(req)?;
            if state.settings.is_admin(&steam_id) {
                Ok(AdminSession { steam_id })
            } else {
                warn!("Admin route refused for {}", steam_id);
                Err(AppError::Forbidden("Admin access required".to_string()))
            }
        }))
    }
}

#[derive(Debug, Clone)]
pub struct OwnerSession {
    pub steam_id: String,
}

impl FromRequest for OwnerSession {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(signed_in_steam_id(req).and_then(|steam_id| {
            let state = app_state(req)?;
            if state.settings.is_owner(&steam_id) {
                Ok(OwnerSession { steam_id })
            } else {
                warn!("Owner route refused for {}", steam_id);
                Err(AppError::Forbidden("Owner access required".to_string()))
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ADMIN, BUYER, OWNER, SESSION_SECRET, session_cookie, test_app};
    use actix_web::test::TestRequest;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn tokens_round_trip_and_reject_other_secrets() {
        let token = issue_session_token(SESSION_SECRET, "76561198000000001", Duration::hours(1)).unwrap();
        assert_eq!(verify_session_token(SESSION_SECRET, &token).unwrap().sub, "76561198000000001");
        assert!(matches!(verify_session_token("other", &token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn expired_tokens_are_refused() {
        let token = issue_session_token(SESSION_SECRET, "76561198000000001", Duration::hours(-2)).unwrap();
        assert!(matches!(
            verify_session_token(SESSION_SECRET, &token),
            Err(AppError::Unauthorized(m)) if m == "Session has expired"
        ));
    }

    #[test]
    fn token_comes_from_cookie_or_bearer() {
        let req = actix_web::test::TestRequest::default()
            .cookie(actix_web::cookie::Cookie::new(SESSION_COOKIE, "from-cookie"))
            .insert_header((header::AUTHORIZATION, "Bearer from-header"))
            .to_http_request();
        assert_eq!(session_token(&req).as_deref(), Some("from-cookie"));

        let req = actix_web::test::TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer from-header"))
            .to_http_request();
        assert_eq!(session_token(&req).as_deref(), Some("from-header"));

        assert_eq!(session_token(&actix_web::test::TestRequest::default().to_http_request()), None);
    }

    #[actix_rt::test]
    async fn extractors_enforce_roles() {
        let state = web::Data::new(test_app().state);
        let request = |steam_id: &str| {
            TestRequest::default().app_data(state.clone()).cookie(session_cookie(steam_id)).to_http_request()
        };

        let owner = assert_ok!(OwnerSession::extract(&request(OWNER)).await);
        assert_eq!(owner.steam_id, OWNER);
        assert_ok!(AdminSession::extract(&request(OWNER)).await);
        assert_ok!(AdminSession::extract(&request(ADMIN)).await);
        assert!(matches!(OwnerSession::extract(&request(ADMIN)).await, Err(AppError::Forbidden(_))));
        assert!(matches!(AdminSession::extract(&request(BUYER)).await, Err(AppError::Forbidden(_))));

        let anonymous = TestRequest::default().app_data(state.clone()).to_http_request();
        assert!(matches!(AdminSession::extract(&anonymous).await, Err(AppError::Unauthorized(_))));
        assert_eq!(assert_ok!(SteamSession::extract(&anonymous).await).steam_id(), None);

        let forged = TestRequest::default()
            .app_data(state.clone())
            .cookie(actix_web::cookie::Cookie::new(SESSION_COOKIE, "not-a-token"))
            .to_http_request();
        assert_eq!(assert_ok!(SteamSession::extract(&forged).await).steam_id(), None);

        let buyer = assert_ok!(SteamSession::extract(&request(BUYER)).await);
        assert_eq!(buyer.steam_id(), Some(BUYER));

        let unconfigured = TestRequest::default().cookie(session_cookie(BUYER)).to_http_request();
        assert_err!(SteamSession::extract(&unconfigured).await);
    }
}
