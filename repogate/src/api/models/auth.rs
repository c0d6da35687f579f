//! API request/response models for token exchange.

use serde::{Deserialize, Serialize};

use crate::api::validation::{FieldErrors, Schema};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

impl Schema for RefreshRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.check(!self.refresh_token.is_empty(), "refresh_token", "must not be empty");
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
}
