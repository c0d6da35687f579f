//! API request models for balances.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use crate::api::validation::{FieldErrors, Schema};

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceMethod {
    #[serde(rename = "+")]
    Credit,
    #[serde(rename = "-")]
    Debit,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeBalance {
    pub address: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub amount: i64,
    pub method: BalanceMethod,
}

impl Schema for ChangeBalance {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors
            .check(!self.address.trim().is_empty(), "address", "must not be empty")
            .check(self.amount >= 0, "amount", "must not be negative");
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetBalance {
    pub address: String,
}

impl Schema for GetBalance {}
