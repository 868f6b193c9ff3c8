//! Deterministic JSON and YAML helpers.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{serde_error, OrchError};

/// Recursively orders object keys so equal values render to equal bytes.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            Value::Object(ordered.into_iter().collect::<Map<_, _>>())
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Compact JSON bytes with sorted keys.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, OrchError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json.serialize", err))?;
    serde_json::to_vec(&canonicalize(value)).map_err(|err| serde_error("json.write", err))
}

/// Indented JSON with sorted keys, used for files humans read.
pub fn to_canonical_json_pretty<T: Serialize>(value: &T) -> Result<String, OrchError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json.serialize", err))?;
    serde_json::to_string_pretty(&canonicalize(value)).map_err(|err| serde_error("json.write", err))
}

/// Decodes JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, OrchError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json.deserialize", err))
}

/// Encodes a value as YAML.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String, OrchError> {
    serde_yaml::to_string(value).map_err(|err| serde_error("yaml.serialize", err))
}

/// Decodes a YAML payload.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, OrchError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml.deserialize", err))
}
