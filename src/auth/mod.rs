//! Bearer-token authentication. Tokens are minted by the platform's auth
//! service; this crate only validates them and extracts the caller's id.

use crate::{config::AppConfig, errors::ServiceError, AppState};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub jti: Option<String>,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            jwt_secret: cfg.jwt_secret.clone(),
            jwt_issuer: cfg.auth_issuer.clone(),
            jwt_audience: cfg.auth_audience.clone(),
        }
    }
}

impl AuthConfig {
    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.jwt_issuer.as_str()]);
        validation.set_audience(&[self.jwt_audience.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Mints an access token for `user_id`. Used by tooling and tests.
    pub fn issue_token(&self, user_id: Uuid, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.jwt_issuer.clone(),
            aud: self.jwt_audience.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Some(Uuid::new_v4().to_string()),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Resolves the caller from an `Authorization: Bearer ...` header value.
    pub fn authenticate(&self, header: Option<&str>) -> Result<AuthUser, AuthError> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthUser { user_id })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let user = state.auth.authenticate(header).map_err(|e| {
            debug!("rejected bearer token: {}", e);
            e
        })?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "a_long_enough_jwt_secret_for_the_servicebook_tests_9f3k".into(),
            jwt_issuer: "servicebook-auth".into(),
            jwt_audience: "servicebook-api".into(),
        }
    }

    #[test]
    fn round_trips_user_id() {
        let cfg = config();
        let user_id = Uuid::new_v4();
        let token = cfg.issue_token(user_id, Duration::minutes(5)).unwrap();
        let header = format!("Bearer {}", token);

        assert_eq!(cfg.authenticate(Some(&header)).unwrap().user_id, user_id);
    }

    #[test]
    fn rejects_missing_and_foreign_tokens() {
        let cfg = config();
        assert_matches!(cfg.authenticate(None), Err(AuthError::MissingToken));
        assert_matches!(cfg.authenticate(Some("Basic abc")), Err(AuthError::MissingToken));

        let mut other = config();
        other.jwt_audience = "someone-else".into();
        let token = other.issue_token(Uuid::new_v4(), Duration::minutes(5)).unwrap();
        assert_matches!(
            cfg.authenticate(Some(&format!("Bearer {}", token))),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn expired_tokens_are_reported() {
        let cfg = config();
        let token = cfg.issue_token(Uuid::new_v4(), Duration::minutes(-10)).unwrap();
        assert_matches!(
            cfg.authenticate(Some(&format!("Bearer {}", token))),
            Err(AuthError::TokenExpired)
        );
    }
}
