use axum::{
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::post,
    Json, RequestPartsExt, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use skyledger_core::identity::{IdentityResolver, Role};
use skyledger_core::{Address, LedgerError, LedgerResult};
use tracing::warn;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Caller address every operation runs as.
    pub sub: String,
    pub jti: String,
    pub exp: usize,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
    pub issue_tokens: bool,
}

impl AuthConfig {
    pub fn issue_token(&self, subject: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: subject.to_owned(),
            jti: Uuid::new_v4().to_string(),
            exp: (Utc::now() + Duration::seconds(self.expiration as i64)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
    }
}

impl IdentityResolver for AuthConfig {
    fn resolve(&self, credential: &str) -> LedgerResult<Address> {
        let token_data = decode::<Claims>(
            credential,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| LedgerError::Unauthorized(format!("invalid token: {}", e)))?;

        let address = Address::new(token_data.claims.sub);
        if address.is_blank() {
            return Err(LedgerError::Unauthorized("token has an empty subject".to_string()));
        }
        Ok(address)
    }
}

/// The authenticated caller, taken from the bearer token's `sub` claim.
#[derive(Debug, Clone)]
pub struct Caller(pub Address);

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::AuthenticationError("missing bearer token".to_string()))?;

        state
            .auth
            .resolve(bearer.token())
            .map(Caller)
            .map_err(|e| AppError::AuthenticationError(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    subject: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/token", post(issue_token))
}

/// Development helper: mints customer tokens when enabled. Subjects that hold
/// a role anywhere (registry admin, instance admin, airline owner) are refused.
async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    if !state.auth.issue_tokens {
        return Err(AppError::NotFoundError("token issuance is disabled".to_string()));
    }
    if req.subject.trim().is_empty() {
        return Err(AppError::ValidationError("subject must not be empty".to_string()));
    }

    let subject = Address::new(req.subject);
    if is_privileged(&state, &subject).await {
        warn!(subject = %subject, "Refused to mint token for privileged subject");
        return Err(LedgerError::Unauthorized(format!("cannot issue a token for {}", subject)).into());
    }

    let token = state.auth.issue_token(subject.as_str())?;
    Ok(Json(TokenResponse { token }))
}

async fn is_privileged(state: &AppState, subject: &Address) -> bool {
    if state.registry.read().await.admin() == subject {
        return true;
    }
    state
        .instances
        .read()
        .await
        .values()
        .any(|ledger| ledger.role_of(subject) != Role::Customer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> AuthConfig {
        AuthConfig {
            secret: secret.to_string(),
            expiration: 60,
            issue_tokens: true,
        }
    }

    #[test]
    fn test_token_resolves_to_subject() {
        let auth = config("secret");
        let token = auth.issue_token("0xabc").unwrap();

        assert_eq!(auth.resolve(&token).unwrap(), Address::new("0xabc"));
    }

    #[test]
    fn test_foreign_token_is_rejected() {
        let token = config("other").issue_token("0xabc").unwrap();

        assert!(matches!(config("secret").resolve(&token), Err(LedgerError::Unauthorized(_))));
        assert!(config("secret").resolve("garbage").is_err());
    }
}
