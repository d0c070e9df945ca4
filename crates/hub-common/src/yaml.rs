//! YAML parsing into serde_json values
//!
//! Rendered manifests are multi-document streams; user supplied values are a
//! single mapping. Both are converted to `serde_json::Value` so the rest of
//! the gateway deals with one value type.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::error::{Error, Result};

/// Parse every document of a YAML stream, skipping empty documents.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| Error::internal(format!("failed to parse manifest: {}", e)))?;
    docs.into_iter()
        .map(yaml_to_json)
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
        .collect()
}

/// Parse user supplied chart values.
///
/// Empty input yields an empty mapping. Anything that is not a mapping is
/// rejected.
pub fn parse_values(input: &str) -> Result<Map<String, Value>> {
    let invalid = |detail: String| Error::bad_request(format!("Failed to parse values: {}", detail));

    let docs = YamlLoader::load_from_str(input).map_err(|e| invalid(e.to_string()))?;
    match docs.into_iter().next() {
        None => Ok(Map::new()),
        Some(doc) => match yaml_to_json(doc).map_err(|e| invalid(e.to_string()))? {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map),
            other => Err(invalid(format!("expected a mapping, got {}", type_name(&other)))),
        },
    }
}

/// Overlay `overrides` onto `base`, merging nested mappings.
pub fn merge_values(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_values(existing, incoming)
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

fn yaml_to_json(yaml: Yaml) -> Result<Value> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| Error::internal(e.to_string()))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(Error::internal("unsupported YAML key type")),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::internal("YAML aliases not supported")),
        Yaml::BadValue => Err(Error::internal("bad YAML value")),
    }
}
