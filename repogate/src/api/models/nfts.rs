//! API request models for NFTs.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::validation::{FieldErrors, Schema};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNft {
    pub address: String,
    pub nft_id: String,
    /// Where the token's metadata is served from
    pub base_url: String,
}

impl Schema for AddNft {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors
            .check(!self.address.trim().is_empty(), "address", "must not be empty")
            .check(!self.nft_id.trim().is_empty(), "nft_id", "must not be empty")
            .check(Url::parse(&self.base_url).is_ok(), "base_url", "must be an absolute URL");
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShowNft {
    pub address: String,
}

impl Schema for ShowNft {}
