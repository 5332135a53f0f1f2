/*!
 * JWT authentication and caller identity.
 *
 * Every cart and order operation acts on behalf of an [`Identity`]: either a
 * signed-in customer (bearer JWT) or a guest browser session (the
 * `x-session-id` header). The identity is resolved once per request by an
 * axum extractor and passed to the service layer explicitly.
 */

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError};

pub const SESSION_HEADER: &str = "x-session-id";

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Who is performing a storefront operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Signed-in customer, authenticated via bearer JWT.
    Customer(Uuid),
    /// Anonymous browser session, keyed by the `x-session-id` header.
    Guest(String),
}

impl Identity {
    pub fn customer_id(&self) -> Option<Uuid> {
        match self {
            Identity::Customer(id) => Some(*id),
            Identity::Guest(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Identity::Customer(_) => None,
            Identity::Guest(sid) => Some(sid.as_str()),
        }
    }

    /// Require a signed-in customer, rejecting guests.
    pub fn require_customer(&self) -> Result<Uuid, ServiceError> {
        self.customer_id()
            .ok_or_else(|| ServiceError::Unauthorized("Sign-in required".to_string()))
    }
}

/// Authenticated customer with role information, for endpoints that need
/// more than the bare identity (e.g. admin-only status transitions).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub customer_id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

/// Issue an HS256 access token for a customer.
pub fn issue_token(
    config: &AppConfig,
    customer_id: Uuid,
    email: Option<&str>,
    roles: &[&str],
) -> Result<String, ServiceError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(config.jwt_expiration as i64);
    let claims = Claims {
        sub: customer_id.to_string(),
        email: email.map(str::to_string),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("Failed to sign token: {}", e)))
}

fn decode_claims(config: &AppConfig, token: &str) -> Result<Claims, ServiceError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ServiceError::Unauthorized("Invalid or expired token".to_string()))
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn auth_user_from_parts(parts: &Parts, config: &AppConfig) -> Result<AuthUser, ServiceError> {
    let token = bearer_token(parts)
        .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?;
    let claims = decode_claims(config, token)?;
    let customer_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;
    Ok(AuthUser {
        customer_id,
        email: claims.email,
        roles: claims.roles,
    })
}

#[async_trait::async_trait]
impl FromRequestParts<std::sync::Arc<crate::AppState>> for Identity {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &std::sync::Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        // A valid bearer token wins over the session header
        if bearer_token(parts).is_some() {
            let user = auth_user_from_parts(parts, &state.config)?;
            return Ok(Identity::Customer(user.customer_id));
        }
        let session_id = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::Unauthorized(format!(
                    "Provide a bearer token or a {} header",
                    SESSION_HEADER
                ))
            })?;
        Ok(Identity::Guest(session_id.to_string()))
    }
}

#[async_trait::async_trait]
impl FromRequestParts<std::sync::Arc<crate::AppState>> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &std::sync::Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        auth_user_from_parts(parts, &state.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".to_string(),
            "a-test-secret-key-at-least-32-chars!".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        )
    }

    #[test]
    fn issued_token_round_trips() {
        let config = test_config();
        let customer_id = Uuid::new_v4();
        let token =
            issue_token(&config, customer_id, Some("a@b.co"), &["customer"]).unwrap();
        let claims = decode_claims(&config, &token).unwrap();
        assert_eq!(claims.sub, customer_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("a@b.co"));
        assert_eq!(claims.roles, vec!["customer".to_string()]);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let config = test_config();
        let token = issue_token(&config, Uuid::new_v4(), None, &[]).unwrap();
        let mut other = test_config();
        other.jwt_secret = "a-different-secret-key-32-chars-long".to_string();
        assert!(decode_claims(&other, &token).is_err());
    }

    #[test]
    fn guest_identity_has_no_customer_id() {
        let identity = Identity::Guest("sess-1".to_string());
        assert_eq!(identity.customer_id(), None);
        assert_eq!(identity.session_id(), Some("sess-1"));
        assert!(identity.require_customer().is_err());
    }

    #[test]
    fn admin_role_is_detected() {
        let user = AuthUser {
            customer_id: Uuid::new_v4(),
            email: None,
            roles: vec!["customer".to_string(), "admin".to_string()],
        };
        assert!(user.is_admin());
    }
}
