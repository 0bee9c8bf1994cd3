use serde_json::Value;

use crate::errors::BackendError;

/// One persisted entity, as a mapping from field name to JSON value.
///
/// The datastore backends in use cannot hold nested objects, so records
/// pass through [`flatten`] on the way in and [`expand`] on the way out:
/// the fields named by an entity's serialized-key set are JSON-encoded
/// into plain strings for storage and decoded again on read.
pub type Record = serde_json::Map<String, Value>;

/// Returns a copy of `record` with every field named in
/// `serialized_keys` replaced by its JSON string encoding. Fields outside
/// the set pass through untouched.
pub fn flatten(record: &Record, serialized_keys: &[&str]) -> Result<Record, BackendError> {
    let mut flat = record.clone();

    for key in serialized_keys {
        if let Some(value) = flat.get_mut(*key) {
            let encoded =
                serde_json::to_string(value).map_err(|source| BackendError::Json { source })?;
            *value = Value::String(encoded);
        }
    }

    Ok(flat)
}

/// The inverse of [`flatten`]: JSON-decodes every field named in
/// `serialized_keys`. Fails with [`BackendError::Decode`] when a declared
/// field does not hold valid JSON; other records are unaffected.
pub fn expand(flat: &Record, serialized_keys: &[&str]) -> Result<Record, BackendError> {
    let mut record = flat.clone();

    for key in serialized_keys {
        if let Some(value) = record.get_mut(*key) {
            let encoded = match value {
                Value::String(s) => s.as_str(),
                _ => continue,
            };
            let decoded = serde_json::from_str(encoded).map_err(|source| BackendError::Decode {
                field: (*key).to_owned(),
                source,
            })?;
            *value = decoded;
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{expand, flatten, Record};
    use crate::errors::BackendError;

    const KEYS: &[&str] = &["a"];

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn flatten_encodes_declared_fields_only() {
        let original = record(json!({"a": {"x": 13, "y": ["d", "e", "f"]}, "b": "fluflu"}));
        let flat = flatten(&original, KEYS).unwrap();

        assert!(flat["a"].is_string());
        assert_eq!(flat["b"], original["b"]);
    }

    #[test]
    fn expand_reverses_flatten() {
        let original = record(json!({
            "a": {"x": 13, "y": ["d", "e", "f"]},
            "b": "fluflu",
            "extra": 42,
        }));

        let flat = flatten(&original, KEYS).unwrap();
        assert_eq!(expand(&flat, KEYS).unwrap(), original);
    }

    #[test]
    fn declared_string_fields_survive_the_roundtrip() {
        let original = record(json!({"a": "just a string"}));
        let flat = flatten(&original, KEYS).unwrap();

        assert_eq!(flat["a"], json!("\"just a string\""));
        assert_eq!(expand(&flat, KEYS).unwrap(), original);
    }

    #[test]
    fn absent_declared_fields_are_ignored() {
        let original = record(json!({"b": 1}));

        assert_eq!(flatten(&original, KEYS).unwrap(), original);
        assert_eq!(expand(&original, KEYS).unwrap(), original);
    }

    #[test]
    fn expand_refuses_invalid_json() {
        let flat = record(json!({"a": "{not json"}));

        match expand(&flat, KEYS) {
            Err(BackendError::Decode { field, .. }) => assert_eq!(field, "a"),
            other => panic!("expected a decode error, got {:?}", other),
        }
    }
}
