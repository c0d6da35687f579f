//! Declared request inputs and how their failures are reported.
//!
//! Query strings, path parameters and bodies are described by types implementing [`Schema`].
//! Decoding errors and [`Schema::validate`] failures both become a 400 "fail format" error whose
//! `errors` member maps each offending field to a message.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::errors::Error;

/// Key used for failures that cannot be tied to a single field
pub const ROOT_FIELD: &str = "__root__";

/// Per-field validation messages
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.0.insert(field.into(), message.into());
        self
    }

    /// Record `message` against `field` unless `ok` holds
    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.add(field, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<FieldErrors> for Value {
    fn from(errors: FieldErrors) -> Self {
        Value::Object(errors.0.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
    }
}

impl From<FieldErrors> for Error {
    fn from(errors: FieldErrors) -> Self {
        Error::fail_format(errors)
    }
}

/// A declared request input.
///
/// Implementors are decoded with serde and may add semantic checks in [`validate`](Self::validate).
pub trait Schema: DeserializeOwned + Send + 'static {
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }

    /// The value used when the input is not declared at all. Only [`NoParams`] provides one.
    fn undeclared() -> Option<Self> {
        None
    }
}

/// Marks an input the endpoint does not declare; nothing is read for it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NoParams;

impl Schema for NoParams {
    fn undeclared() -> Option<Self> {
        Some(NoParams)
    }
}

/// The name inside backticks in serde messages such as ``missing field `amount` ``
fn quoted_field<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = message.strip_prefix(prefix)?.strip_prefix('`')?;
    rest.split_once('`').map(|(field, _)| field)
}

/// serde_json appends the error position; it means nothing to API clients
fn strip_position(message: &str) -> &str {
    message.rsplit_once(" at line ").map_or(message, |(head, _)| head)
}

/// Turn a decoding failure into a fail-format error keyed by the field it happened at
pub fn decode_error<E: Display>(err: serde_path_to_error::Error<E>) -> Error {
    let path = err.path().to_string();
    let message = err.inner().to_string();
    let message = strip_position(&message);

    let named = quoted_field(message, "missing field ")
        .map(|field| (field, "field required".to_string()))
        .or_else(|| quoted_field(message, "unknown field ").map(|field| (field, "extra fields not permitted".to_string())));

    let (field, message) = match (path.as_str(), named) {
        (".", Some((field, msg))) => (field.to_string(), msg),
        (".", None) => (ROOT_FIELD.to_string(), message.to_string()),
        (_, Some((field, msg))) => (format!("{path}.{field}"), msg),
        (_, None) => (path, message.to_string()),
    };

    let mut errors = FieldErrors::new();
    errors.add(field, message);
    Error::fail_format(errors)
}

/// Decode a JSON value into `T` and run its checks
pub fn from_value<T: Schema>(value: Value) -> Result<T, Error> {
    let parsed: T = serde_path_to_error::deserialize(value).map_err(decode_error)?;
    parsed.validate()?;
    Ok(parsed)
}

/// Decode a JSON document into `T` and run its checks
pub fn from_json_slice<T: Schema>(bytes: &[u8]) -> Result<T, Error> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let parsed: T = serde_path_to_error::deserialize(&mut de).map_err(decode_error)?;
    de.end().map_err(|e| {
        let mut errors = FieldErrors::new();
        errors.add(ROOT_FIELD, strip_position(&e.to_string()));
        Error::fail_format(errors)
    })?;
    parsed.validate()?;
    Ok(parsed)
}

/// Decode an `application/x-www-form-urlencoded` string (a query string) into `T` and run its checks
pub fn from_urlencoded<T: Schema>(encoded: &str) -> Result<T, Error> {
    let de = serde_urlencoded::Deserializer::new(form_urlencoded::parse(encoded.as_bytes()));
    let parsed: T = serde_path_to_error::deserialize(de).map_err(decode_error)?;
    parsed.validate()?;
    Ok(parsed)
}

/// Decode already-split key/value pairs (path parameters) into `T` and run its checks
pub fn from_pairs<'a, T, I>(pairs: I) -> Result<T, Error>
where
    T: Schema,
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let encoded = form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();
    from_urlencoded(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::response::ResponseCode;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Transfer {
        address: String,
        amount: i64,
        #[serde(default)]
        note: Option<String>,
    }

    impl Schema for Transfer {
        fn validate(&self) -> Result<(), FieldErrors> {
            let mut errors = FieldErrors::new();
            errors.check(self.amount > 0, "amount", "must be positive");
            errors.check(!self.address.is_empty(), "address", "must not be empty");
            errors.into_result()
        }
    }

    fn errors_of(err: Error) -> Value {
        assert_eq!(err.code(), ResponseCode::FailFormat);
        err.details()
    }

    #[test]
    fn test_json_decodes_and_validates() {
        let parsed: Transfer = from_json_slice(br#"{"address": "abc", "amount": 10}"#).unwrap();
        assert_eq!(parsed.address, "abc");
        assert_eq!(parsed.note, None);
    }

    #[test]
    fn test_type_error_is_keyed_by_field() {
        let err = from_json_slice::<Transfer>(br#"{"address": "abc", "amount": "ten"}"#).unwrap_err();
        let errors = errors_of(err);
        assert!(errors["amount"].as_str().unwrap().starts_with("invalid type"));
        assert!(!errors["amount"].as_str().unwrap().contains("line"));
    }

    #[test]
    fn test_missing_field_is_keyed_by_field() {
        let err = from_json_slice::<Transfer>(br#"{"address": "abc"}"#).unwrap_err();
        assert_eq!(errors_of(err), json!({"amount": "field required"}));
    }

    #[test]
    fn test_malformed_json_is_a_root_error() {
        let err = from_json_slice::<Transfer>(b"not json").unwrap_err();
        assert!(errors_of(err).get(ROOT_FIELD).is_some());
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let err = from_json_slice::<Transfer>(br#"{"address": "abc", "amount": 1} extra"#).unwrap_err();
        assert!(errors_of(err).get(ROOT_FIELD).is_some());
    }

    #[test]
    fn test_semantic_checks_collect_every_field() {
        let err = from_value::<Transfer>(json!({"address": "", "amount": -1})).unwrap_err();
        assert_eq!(errors_of(err), json!({"address": "must not be empty", "amount": "must be positive"}));
    }

    #[test]
    fn test_urlencoded_parses_numbers_from_text() {
        let parsed: Transfer = from_urlencoded("address=a%20b&amount=5").unwrap();
        assert_eq!(parsed.address, "a b");
        assert_eq!(parsed.amount, 5);

        let err = from_urlencoded::<Transfer>("address=abc&amount=x").unwrap_err();
        assert!(errors_of(err).get("amount").is_some());
    }

    #[test]
    fn test_pairs_round_trip_through_encoding() {
        let parsed: Transfer = from_pairs([("address", "a&b=c"), ("amount", "3")]).unwrap();
        assert_eq!(parsed.address, "a&b=c");
    }

    #[test]
    fn test_no_params_is_always_available() {
        assert_eq!(NoParams::undeclared(), Some(NoParams));
        assert!(Transfer::undeclared().is_none());
    }
}
