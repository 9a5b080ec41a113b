//! Response payload validators
//!
//! A validator checks a successful response body before it is cached or
//! handed back. A failed check is reported as a Parse error.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{ErrorKind, FetchError, FetchResult};

/// Checks the shape of a response body
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), String>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), String> {
        self(value)
    }
}

/// Requires an object carrying every listed field
#[derive(Debug, Clone)]
pub struct RequireFields {
    fields: Vec<String>,
}

impl RequireFields {
    pub fn new<I, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequireFields {
    fn validate(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("expected an object, got {}", type_name(value)))?;

        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| !object.contains_key(field.as_str()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing fields: {}", missing.join(", ")))
        }
    }
}

/// Accepts any value that deserializes into `T`
pub struct Decodes<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Decodes<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Decodes<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Validator for Decodes<T> {
    fn validate(&self, value: &Value) -> Result<(), String> {
        T::deserialize(value).map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Run `validator` over `value`, turning a rejection into a Parse error
pub fn check(endpoint: &str, value: Value, validator: &dyn Validator) -> FetchResult<Value> {
    match validator.validate(&value) {
        Ok(()) => Ok(value),
        Err(reason) => {
            warn!(endpoint, "Response failed validation: {}", reason);
            Err(FetchError::new(ErrorKind::Parse, endpoint)
                .with_detail(format!("invalid response: {}", reason)))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
