//! JWT bearer token creation and verification.

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Authenticator, Principal};
use crate::api::models::response::ResponseCode;
use crate::config::AuthConfig;
use crate::db::Session;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims: the principal travels as `payload`
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub payload: Principal,
    pub typ: TokenType,
    pub exp: i64, // Expiration time
    pub iat: i64, // Issued at
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

pub struct TokenAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    token_expiry: Duration,
    refresh_expiry: Duration,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("algorithm", &self.algorithm)
            .field("token_expiry", &self.token_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish_non_exhaustive()
    }
}

fn authentication_expired() -> Error {
    Error::forbidden().with_code(ResponseCode::AuthenticationExpired)
}

/// Sort decode failures into client errors (bad or expired credentials) and server errors
fn classify(e: jsonwebtoken::errors::Error, client_error: fn() -> Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;
    match e.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => {
            debug!("Rejected token: {e}");
            client_error()
        }
        _ => Error::internal().with_message(format!("JWT verification: {e}")),
    }
}

impl TokenAuthenticator {
    pub fn new(secret: &str, algorithm: Algorithm, token_expiry: Duration, refresh_expiry: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            token_expiry,
            refresh_expiry,
        }
    }

    /// `None` when no signing key is configured
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>> {
        let Some(secret) = config.secret_key.as_deref() else {
            return Ok(None);
        };
        Ok(Some(Self::new(
            secret,
            config.algorithm()?,
            config.token_expiry,
            config.refresh_token_expiry,
        )))
    }

    fn sign(&self, payload: &Principal, typ: TokenType, lifetime: Duration) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            payload: payload.clone(),
            typ,
            exp: now + i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX - now),
            iat: now,
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| Error::internal().with_message(format!("create JWT: {e}")))
    }

    fn verify(&self, token: &str, expected: TokenType, client_error: fn() -> Error) -> Result<TokenClaims> {
        let validation = Validation::new(self.algorithm);
        let data = decode::<TokenClaims>(token, &self.decoding, &validation).map_err(|e| classify(e, client_error))?;
        if data.claims.typ != expected {
            debug!(expected = ?expected, got = ?data.claims.typ, "Rejected token of the wrong type");
            return Err(client_error());
        }
        Ok(data.claims)
    }

    /// Issue an access token and a refresh token carrying `principal`
    pub fn issue(&self, principal: &Principal) -> Result<TokenPair> {
        Ok(TokenPair {
            token: self.sign(principal, TokenType::Access, self.token_expiry)?,
            refresh_token: self.sign(principal, TokenType::Refresh, self.refresh_expiry)?,
        })
    }

    /// Exchange a valid refresh token for a new access token
    pub fn refresh(&self, refresh_token: &str) -> Result<String> {
        let claims = self.verify(refresh_token, TokenType::Refresh, Error::forbidden)?;
        self.sign(&claims.payload, TokenType::Access, self.token_expiry)
    }

    /// Verify an access token and return its principal
    pub fn verify_access(&self, token: &str) -> Result<Principal> {
        Ok(self.verify(token, TokenType::Access, authentication_expired)?.payload)
    }
}

/// The token from an `Authorization: Bearer <token>` header. Anything else is `None`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    let (scheme, token) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn validate(&self, headers: &HeaderMap, _session: &mut Session) -> Result<Principal> {
        let token = bearer_token(headers).ok_or_else(authentication_expired)?;
        self.verify_access(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn authenticator() -> TokenAuthenticator {
        TokenAuthenticator::new(
            "test-secret-key-for-jwt",
            Algorithm::HS256,
            Duration::from_secs(30 * 60),
            Duration::from_secs(24 * 60 * 60),
        )
    }

    fn principal() -> Principal {
        match json!({"id": 1, "name": "merchant", "role": "admin"}) {
            serde_json::Value::Object(claims) => Principal::new(claims),
            _ => unreachable!(),
        }
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn assert_expired_code(err: &Error) {
        assert_eq!(err.kind(), Some(ErrorKind::Forbidden));
        assert_eq!(err.code(), ResponseCode::AuthenticationExpired);
    }

    #[test]
    fn test_issue_and_verify() {
        let auth = authenticator();
        let pair = auth.issue(&principal()).unwrap();
        let verified = auth.verify_access(&pair.token).unwrap();
        assert_eq!(verified, principal());
        assert_eq!(verified.role(), Some("admin"));
    }

    #[test]
    fn test_refresh_issues_new_access_token() {
        let auth = authenticator();
        let pair = auth.issue(&principal()).unwrap();
        let token = auth.refresh(&pair.refresh_token).unwrap();
        assert_eq!(auth.verify_access(&token).unwrap(), principal());
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let auth = authenticator();
        let pair = auth.issue(&principal()).unwrap();

        assert_expired_code(&auth.verify_access(&pair.refresh_token).unwrap_err());

        let err = auth.refresh(&pair.token).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Forbidden));
        assert_eq!(err.code(), ResponseCode::Forbidden);
    }

    #[test]
    fn test_verify_token_wrong_secret() {
        let pair = authenticator().issue(&principal()).unwrap();
        let other = TokenAuthenticator::new("different", Algorithm::HS256, Duration::from_secs(60), Duration::from_secs(60));
        assert_expired_code(&other.verify_access(&pair.token).unwrap_err());
    }

    #[test]
    fn test_verify_expired_token() {
        let auth = authenticator();
        let past = Utc::now().timestamp() - 2 * 3600;
        let claims = TokenClaims {
            payload: principal(),
            typ: TokenType::Access,
            exp: past,
            iat: past - 60,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"test-secret-key-for-jwt")).unwrap();
        assert_expired_code(&auth.verify_access(&token).unwrap_err());
    }

    #[test]
    fn test_verify_malformed_token() {
        assert_expired_code(&authenticator().verify_access("not.a.jwt").unwrap_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer a b")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_validate_reads_authorization_header() {
        let auth = authenticator();
        let pair = auth.issue(&principal()).unwrap();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let mut session = Session::new(pool);

        let principal = auth
            .validate(&headers(&format!("Bearer {}", pair.token)), &mut session)
            .await
            .unwrap();
        assert_eq!(principal.get("name"), Some(&json!("merchant")));

        assert_expired_code(&auth.validate(&HeaderMap::new(), &mut session).await.unwrap_err());
        assert_expired_code(&auth.validate(&headers(&format!("Token {}", pair.token)), &mut session).await.unwrap_err());
        assert!(!session.in_transaction());
    }
}
