//! Query keys and tags

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Identifies one cached result set: an endpoint plus its arguments
///
/// Arguments are stored as canonical JSON (object keys sorted), so two
/// structurally equal argument values always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    endpoint: String,
    args: String,
}

impl QueryKey {
    pub fn new(endpoint: impl Into<String>, args: &Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            args: canonical(args).to_string(),
        }
    }

    /// Key for an endpoint that takes no arguments
    pub fn bare(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, &Value::Null)
    }

    /// Key from any serializable argument value
    pub fn from_args<T: Serialize + ?Sized>(
        endpoint: impl Into<String>,
        args: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(endpoint, &serde_json::to_value(args)?))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serialized arguments
    pub fn args(&self) -> &str {
        &self.args
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.args)
    }
}

/// Copy of `value` with object keys inserted in sorted order
///
/// `serde_json::Map` keeps insertion order when `preserve_order` is enabled
/// anywhere in the build, so sorting cannot be left to it.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|key| (key.clone(), canonical(&map[key])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Tag for one item of a type, e.g. `item_tag("Playlist", "p1")` is
/// `"Playlist:p1"`
pub fn item_tag(kind: &str, id: impl fmt::Display) -> String {
    format!("{}:{}", kind, id)
}
