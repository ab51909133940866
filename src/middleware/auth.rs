use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{AppError, ErrorKind};
use crate::logging::{create_logging_context, send_json, ActionLevel, ResponseWriter};
use crate::routes::AppState;

/// Paths reachable without a token: onboarding must work before login.
pub const PUBLIC_PREFIXES: &[&str] = &["/api/health", "/api/login", "/api/plex/pin"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    ExpiredToken,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let (title, help, reason) = match err {
            AuthError::MissingToken => (
                "Unauthenticated",
                "Log in to continue",
                "missing_token",
            ),
            AuthError::InvalidToken => (
                "Invalid token",
                "Log in again to get a new token",
                "invalid_token",
            ),
            AuthError::ExpiredToken => (
                "Invalid token",
                "Your session expired, log in again",
                "expired_token",
            ),
        };
        AppError::new(ErrorKind::Unauthenticated, title, help).with_context("reason", reason)
    }
}

/// JWT issuer/verifier. Built once at startup from configuration and only
/// read afterwards.
#[derive(Clone)]
pub struct TokenAuth {
    secret: Arc<str>,
    ttl: Duration,
}

impl TokenAuth {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: Arc::from(secret),
            ttl,
        }
    }

    pub fn issue(&self, subject: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::internal("Token Generation Failed", e))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        })?;

        Ok(token_data.claims)
    }
}

fn is_public(path: &str) -> bool {
    !path.starts_with("/api/") || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Rejects `/api` requests without a valid bearer token when auth is enabled.
/// Rejections go through the normal envelope so the UI sees the same shape.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(token_auth) = state.token_auth.as_ref() else {
        return next.run(req).await;
    };
    let path = req.uri().path().to_owned();
    if is_public(&path) {
        return next.run(req).await;
    }

    let verdict = match req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        None => Err(AuthError::MissingToken),
        Some(header) => header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidToken)
            .and_then(|token| token_auth.verify(token)),
    };

    let ctx = create_logging_context(req.extensions_mut(), &path, state.config.log_level);
    let action = ctx.log().add_action("Auth Middleware", ActionLevel::Debug);
    match verdict {
        Ok(claims) => {
            action.append_result("subject", &claims.sub);
            action.complete();
            next.run(req).await
        }
        Err(err) => {
            action.fail(&AppError::from(err));
            action.complete();
            let writer = req
                .extensions()
                .get::<ResponseWriter>()
                .cloned()
                .unwrap_or_default();
            send_json::<Value>(&writer, Some(ctx.log()), None);
            writer.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let auth = TokenAuth::new("secret", Duration::hours(1));
        let token = auth.issue("admin").unwrap();
        assert_eq!(auth.verify(&token).unwrap().sub, "admin");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = TokenAuth::new("a", Duration::hours(1)).issue("admin").unwrap();
        let err = TokenAuth::new("b", Duration::hours(1)).verify(&token).unwrap_err();
        assert_eq!(err, AuthError::InvalidToken);
    }

    #[test]
    fn expired_token_is_reported() {
        // past the default 60s leeway
        let token = TokenAuth::new("s", Duration::minutes(-5)).issue("admin").unwrap();
        let err = TokenAuth::new("s", Duration::hours(1)).verify(&token).unwrap_err();
        assert_eq!(err, AuthError::ExpiredToken);
    }

    #[test]
    fn auth_errors_map_to_401_titles() {
        assert_eq!(AppError::from(AuthError::MissingToken).title, "Unauthenticated");
        assert_eq!(AppError::from(AuthError::ExpiredToken).title, "Invalid token");
    }

    #[test]
    fn public_paths() {
        assert!(is_public("/api/plex/pin/check"));
        assert!(is_public("/api/health"));
        assert!(is_public("/"));
        assert!(!is_public("/api/temp-images"));
    }
}
