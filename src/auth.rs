use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Courier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// The authenticated caller. Token issuance belongs to the external
/// identity service; this crate only validates.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn require_sender(&self) -> Result<(), AppError> {
        if self.role != Role::Sender {
            return Err(AppError::Forbidden("sender role required".to_string()));
        }
        Ok(())
    }

    pub fn require_courier(&self) -> Result<(), AppError> {
        if self.role != Role::Courier {
            return Err(AppError::Forbidden("courier role required".to_string()));
        }
        Ok(())
    }
}

pub fn verify_token(secret: &str, token: &str) -> Result<Principal, AppError> {
    let mut validation = Validation::default();
    validation.validate_aud = false;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => AppError::Auth("token expired".to_string()),
        ErrorKind::InvalidSignature => AppError::Auth("invalid token signature".to_string()),
        _ => AppError::Auth(format!("invalid token: {err}")),
    })?;

    let user_id = data
        .claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| AppError::Auth("token subject is not a user id".to_string()))?;

    Ok(Principal {
        user_id,
        role: data.claims.role,
    })
}

/// Mints an HS256 token; used by local tooling and the test harness.
pub fn sign_token(secret: &str, user_id: Uuid, role: Role) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: (now + Duration::hours(24)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("HS256 signing cannot fail with a valid secret")
}

pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Auth("missing bearer token".to_string()))?;
        verify_token(&state.jwt_secret, token)
    }
}
