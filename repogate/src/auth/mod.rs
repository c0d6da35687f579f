//! Credential validation for the request pipeline.
//!
//! An [`Authenticator`] turns request headers into a [`Principal`] or fails with a `Forbidden`
//! error; it never hands back partial claims. Two implementations exist:
//!
//! ## 1. Bearer tokens ([`token::TokenAuthenticator`])
//!
//! - Signed JWTs passed as `Authorization: Bearer <token>`
//! - Short-lived access tokens plus longer-lived refresh tokens
//! - A failed check reports the "authentication expired" code
//!
//! ## 2. API keys ([`api_key::KeyLookupAuthenticator`])
//!
//! - Opaque keys passed in the `Authorization` header
//! - Looked up in the `api_keys` table through a [`Repository`](crate::db::handlers::Repository)
//! - The stored `role` must be one of the accepted roles
//!
//! Role checks beyond the authenticator's own are the pipeline's job (see
//! [`Endpoint::allow_roles`](crate::api::executor::Endpoint::allow_roles)).

pub mod api_key;
pub mod token;

use crate::db::Session;
use crate::errors::Result;
use crate::types::Record;
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The authenticated identity: an opaque claims object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(Record);

impl Principal {
    pub fn new(claims: Record) -> Self {
        Self(claims)
    }

    pub fn role(&self) -> Option<&str> {
        self.0.get("role").and_then(Value::as_str)
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    pub fn claims(&self) -> &Record {
        &self.0
    }

    pub fn into_claims(self) -> Record {
        self.0
    }
}

impl From<Record> for Principal {
    fn from(claims: Record) -> Self {
        Self(claims)
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate the request's credentials. `session` is the request's own session, for
    /// authenticators that consult the database.
    async fn validate(&self, headers: &HeaderMap, session: &mut Session) -> Result<Principal>;
}
