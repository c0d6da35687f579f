//! The uniform response envelope and the published response-code enumeration.
//!
//! Every response produced by the request pipeline (apart from pass-through responses) has the
//! shape:
//!
//! ```json
//! { "data": <any>, "msg": "<string>", "code": "<string>", "errors": <any> }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use std::fmt;

/// Machine-readable response codes.
///
/// Serialized as the short code string (e.g. `"30"`), never as the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Success,
    WaitProcessing,
    TransactionUnknownError,
    AuthenticationExpired,
    OtpRequired,
    InvalidAmount,
    InvalidCardNumber,
    OtpFailed,
    ErrorNotIdentified,
    NoOriginalTransaction,
    AccountExists,
    FailFormat,
    Forbidden,
    AccountLocked,
    ServiceNotSubscribed,
    InsufficientAmount,
    TransactionLimitExceeded,
    ProcessTimeout,
    OtpFailedThreeTimes,
    InternalServer,
    TransactionDuplicate,
    NotFound,
}

impl ResponseCode {
    const ALL: [ResponseCode; 22] = [
        ResponseCode::Success,
        ResponseCode::WaitProcessing,
        ResponseCode::TransactionUnknownError,
        ResponseCode::AuthenticationExpired,
        ResponseCode::OtpRequired,
        ResponseCode::InvalidAmount,
        ResponseCode::InvalidCardNumber,
        ResponseCode::OtpFailed,
        ResponseCode::ErrorNotIdentified,
        ResponseCode::NoOriginalTransaction,
        ResponseCode::AccountExists,
        ResponseCode::FailFormat,
        ResponseCode::Forbidden,
        ResponseCode::AccountLocked,
        ResponseCode::ServiceNotSubscribed,
        ResponseCode::InsufficientAmount,
        ResponseCode::TransactionLimitExceeded,
        ResponseCode::ProcessTimeout,
        ResponseCode::OtpFailedThreeTimes,
        ResponseCode::InternalServer,
        ResponseCode::TransactionDuplicate,
        ResponseCode::NotFound,
    ];

    /// The wire code
    pub fn code(self) -> &'static str {
        match self {
            ResponseCode::Success => "00",
            ResponseCode::WaitProcessing => "01",
            ResponseCode::TransactionUnknownError => "05",
            ResponseCode::AuthenticationExpired => "08",
            ResponseCode::OtpRequired => "10",
            ResponseCode::InvalidAmount => "13",
            ResponseCode::InvalidCardNumber => "14",
            ResponseCode::OtpFailed => "20",
            ResponseCode::ErrorNotIdentified => "21",
            ResponseCode::NoOriginalTransaction => "25",
            ResponseCode::AccountExists => "26",
            ResponseCode::FailFormat => "30",
            ResponseCode::Forbidden => "31",
            ResponseCode::AccountLocked => "36",
            ResponseCode::ServiceNotSubscribed => "46",
            ResponseCode::InsufficientAmount => "51",
            ResponseCode::TransactionLimitExceeded => "61",
            ResponseCode::ProcessTimeout => "68",
            ResponseCode::OtpFailedThreeTimes => "75",
            ResponseCode::InternalServer => "91",
            ResponseCode::TransactionDuplicate => "94",
            ResponseCode::NotFound => "100",
        }
    }

    /// Human-readable description, used as the default `msg` for errors carrying this code
    pub fn detail(self) -> &'static str {
        match self {
            ResponseCode::Success => "Success",
            ResponseCode::WaitProcessing => "Waiting for processing",
            ResponseCode::TransactionUnknownError => "Transaction error unknown",
            ResponseCode::AuthenticationExpired => "Authentication failed",
            ResponseCode::OtpRequired => "Required to enter OTP",
            ResponseCode::InvalidAmount => "Invalid amount",
            ResponseCode::InvalidCardNumber => "Card number does not exist",
            ResponseCode::OtpFailed => "OTP failed",
            ResponseCode::ErrorNotIdentified => "Error not identified",
            ResponseCode::NoOriginalTransaction => "No original transaction found to revert",
            ResponseCode::AccountExists => "The linked account already exists",
            ResponseCode::FailFormat => "Fail format",
            ResponseCode::Forbidden => "User account error",
            ResponseCode::AccountLocked => "Account of user is locked",
            ResponseCode::ServiceNotSubscribed => "Account does not subscribe to the service",
            ResponseCode::InsufficientAmount => "Account does not have enough amount",
            ResponseCode::TransactionLimitExceeded => "Transaction exceeding limit",
            ResponseCode::ProcessTimeout => "Process time out",
            ResponseCode::OtpFailedThreeTimes => "OTP failed 3 times",
            ResponseCode::InternalServer => "Internal server error",
            ResponseCode::TransactionDuplicate => "Transaction duplicate",
            ResponseCode::NotFound => "Not found",
        }
    }

    /// Look a code up by its wire representation
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for ResponseCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        ResponseCode::from_code(&code).ok_or_else(|| serde::de::Error::custom(format!("unknown response code '{code}'")))
    }
}

/// The uniform response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    pub msg: String,
    pub code: ResponseCode,
    pub errors: Value,
}

impl Envelope {
    /// Wrap a successful handler result
    pub fn success(data: Value) -> Self {
        Self {
            data,
            msg: String::new(),
            code: ResponseCode::Success,
            errors: json!({}),
        }
    }

    /// Describe a failure; `data` is always the empty string
    pub fn failure(code: ResponseCode, msg: impl Into<String>, errors: Value) -> Self {
        Self {
            data: Value::String(String::new()),
            msg: msg.into(),
            code,
            errors,
        }
    }

    /// Render with an explicit status code
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        self.into_response_with(StatusCode::OK)
    }
}

/// What a pipeline handler hands back
#[derive(Debug)]
pub enum Reply {
    /// Wrapped in the success envelope
    Data(Value),
    /// Sent as-is
    Raw(Response),
}

impl Reply {
    pub fn data<T: Serialize>(data: T) -> crate::errors::Result<Self> {
        let value = serde_json::to_value(data).map_err(|e| anyhow::anyhow!("serialize reply: {e}"))?;
        Ok(Reply::Data(value))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Data(value)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Raw(response)
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Data(data) => Envelope::success(data).into_response(),
            Reply::Raw(response) => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_code_serializes_as_wire_code() {
        assert_eq!(serde_json::to_value(ResponseCode::FailFormat).unwrap(), json!("30"));
        assert_eq!(serde_json::to_value(ResponseCode::NotFound).unwrap(), json!("100"));
        let parsed: ResponseCode = serde_json::from_value(json!("08")).unwrap();
        assert_eq!(parsed, ResponseCode::AuthenticationExpired);
    }

    #[test]
    fn test_unknown_response_code_is_rejected() {
        assert!(serde_json::from_value::<ResponseCode>(json!("999")).is_err());
        assert_eq!(ResponseCode::from_code("31"), Some(ResponseCode::Forbidden));
    }

    #[test]
    fn test_codes_are_unique() {
        let mut codes: Vec<_> = ResponseCode::ALL.iter().map(|c| c.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), ResponseCode::ALL.len());
    }

    #[test]
    fn test_success_envelope_shape() {
        let body = serde_json::to_value(Envelope::success(json!({"amount": 15}))).unwrap();
        assert_eq!(
            body,
            json!({
                "data": {"amount": 15},
                "msg": "",
                "code": "00",
                "errors": {}
            })
        );
    }

    #[test]
    fn test_raw_reply_passes_through() {
        let response = Reply::from((StatusCode::ACCEPTED, "queued").into_response()).into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = Reply::data(vec![1, 2]).unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_failure_envelope_has_empty_data() {
        let envelope = Envelope::failure(ResponseCode::FailFormat, "Fail format", json!({"amount": "required"}));
        assert_eq!(envelope.data, json!(""));
        assert_eq!(envelope.errors["amount"], "required");
    }
}
