//! API key authentication against the credentials table.

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use std::collections::HashSet;
use tracing::{error, instrument, warn};

use super::{Authenticator, Principal};
use crate::db::Session;
use crate::db::handlers::{FindOneOptions, Repository};
use crate::errors::{Error, Result};
use crate::types::Filter;

/// Column holding the key itself. Never part of the returned principal.
const KEY_COLUMN: &str = "api_key";

#[derive(Debug, Clone)]
pub struct KeyLookupAuthenticator {
    credentials: Repository,
    accepted_roles: HashSet<String>,
}

impl KeyLookupAuthenticator {
    pub fn new<I, S>(credentials: Repository, accepted_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            credentials,
            accepted_roles: accepted_roles.into_iter().map(Into::into).collect(),
        }
    }

    /// The key from the `Authorization` header. A `Bearer ` prefix is accepted and stripped.
    fn presented_key(headers: &HeaderMap) -> Option<&str> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim_start();
        // The scheme is matched before trimming the end, so a bare `Bearer ` carries no key
        let key = match value.get(..6) {
            Some(scheme) if scheme.eq_ignore_ascii_case("bearer") && (value.len() == 6 || value[6..].starts_with(char::is_whitespace)) => {
                &value[6..]
            }
            _ => value,
        }
        .trim();
        (!key.is_empty()).then_some(key)
    }
}

#[async_trait]
impl Authenticator for KeyLookupAuthenticator {
    #[instrument(skip_all, err)]
    async fn validate(&self, headers: &HeaderMap, session: &mut Session) -> Result<Principal> {
        let Some(key) = Self::presented_key(headers) else {
            warn!("Request carried no API key");
            return Err(Error::forbidden());
        };

        // Shadow projection: load every column except the key
        let options = FindOneOptions::builder()
            .projection(vec![KEY_COLUMN.to_string()])
            .materialize_projected(false)
            .build();
        let found = self
            .credentials
            .find_one(session, Filter::new().with(KEY_COLUMN, key), &options)
            .await
            .map_err(|e| {
                error!("API key lookup failed: {e}");
                Error::forbidden()
            })?;

        let Some(record) = found else {
            warn!("API key not found");
            return Err(Error::forbidden());
        };

        let principal = Principal::new(record);
        match principal.role() {
            Some(role) if self.accepted_roles.contains(role) => Ok(principal),
            role => {
                warn!(role = ?role, "API key role not accepted");
                Err(Error::forbidden().with_message("Not found role"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::response::ResponseCode;
    use crate::cache::CacheStore;
    use crate::db::models::api_keys;
    use crate::errors::ErrorKind;
    use crate::test_utils::seed_api_key;
    use axum::http::HeaderValue;
    use sqlx::PgPool;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn authenticator() -> KeyLookupAuthenticator {
        KeyLookupAuthenticator::new(
            Repository::new(api_keys::table(), &CacheStore::disconnected()),
            ["admin", "master_merchant"],
        )
    }

    fn assert_forbidden(err: &Error) {
        assert_eq!(err.kind(), Some(ErrorKind::Forbidden));
        assert_eq!(err.code(), ResponseCode::Forbidden);
    }

    #[test]
    fn test_presented_key() {
        assert_eq!(KeyLookupAuthenticator::presented_key(&headers("abc")), Some("abc"));
        assert_eq!(KeyLookupAuthenticator::presented_key(&headers("Bearer abc")), Some("abc"));
        assert_eq!(KeyLookupAuthenticator::presented_key(&headers("Bearer ")), None);
        assert_eq!(KeyLookupAuthenticator::presented_key(&headers("bearer")), None);
        assert_eq!(KeyLookupAuthenticator::presented_key(&headers("BEARER   abc  ")), Some("abc"));
        assert_eq!(KeyLookupAuthenticator::presented_key(&headers("Bearerless")), Some("Bearerless"));
        assert_eq!(KeyLookupAuthenticator::presented_key(&HeaderMap::new()), None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_valid_key_yields_record_without_key(pool: PgPool) {
        seed_api_key(&pool, "key-admin", "admin").await;
        let mut session = Session::new(pool);

        let principal = authenticator().validate(&headers("key-admin"), &mut session).await.unwrap();
        assert_eq!(principal.role(), Some("admin"));
        assert_eq!(principal.get("name").and_then(|v| v.as_str()), Some("admin key"));
        assert!(principal.get("api_key").is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_key_is_forbidden(pool: PgPool) {
        let mut session = Session::new(pool);
        assert_forbidden(&authenticator().validate(&headers("missing"), &mut session).await.unwrap_err());
        assert_forbidden(&authenticator().validate(&HeaderMap::new(), &mut session).await.unwrap_err());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unaccepted_role_is_forbidden(pool: PgPool) {
        seed_api_key(&pool, "key-guest", "guest").await;
        let mut session = Session::new(pool);

        let err = authenticator().validate(&headers("key-guest"), &mut session).await.unwrap_err();
        assert_forbidden(&err);
        assert_eq!(err.user_message(), "Not found role");
    }
}
