use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};

/// Identity of a cache entry: operation name plus normalized arguments.
///
/// Normalization sorts object keys recursively and treats an empty object
/// the same as no arguments, so `{"b":1,"a":2}` and `{"a":2,"b":1}` address
/// the same entry.
#[derive(Debug, Clone)]
pub struct QueryKey {
    operation: String,
    args: Value,
    canonical: String,
}

impl QueryKey {
    #[must_use]
    pub fn new(operation: &str, args: &Value) -> Self {
        let args = normalize(args);
        let canonical = args.to_string();
        Self {
            operation: operation.to_string(),
            args,
            canonical,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Normalized arguments.
    #[must_use]
    pub const fn args(&self) -> &Value {
        &self.args
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.operation == other.operation && self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.operation.hash(state);
        self.canonical.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_null() {
            write!(f, "{}()", self.operation)
        } else {
            write!(f, "{}({})", self.operation, self.canonical)
        }
    }
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(fields) if fields.is_empty() => Value::Null,
        other => sort_keys(other),
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(fields.len());
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&fields[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &QueryKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_key_ignores_field_order() {
        let a = QueryKey::new("getFlashcards", &json!({"categoryId": 3, "filter": {"z": 1, "a": [2, {"y": 0, "b": 1}]}}));
        let b = QueryKey::new("getFlashcards", &json!({"filter": {"a": [2, {"b": 1, "y": 0}], "z": 1}, "categoryId": 3}));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_empty_arguments_are_equivalent() {
        assert_eq!(QueryKey::new("getCategories", &json!({})), QueryKey::new("getCategories", &Value::Null));
        assert_eq!(QueryKey::new("getCategories", &Value::Null).to_string(), "getCategories()");
    }

    #[test]
    fn test_different_operation_or_arguments_differ() {
        let base = QueryKey::new("getFlashcard", &json!({"id": 1}));
        assert_ne!(base, QueryKey::new("getFlashcard", &json!({"id": 2})));
        assert_ne!(base, QueryKey::new("getCategory", &json!({"id": 1})));
        // A string id and a numeric id are different arguments.
        assert_ne!(base, QueryKey::new("getFlashcard", &json!({"id": "1"})));
    }

    #[test]
    fn test_display() {
        let key = QueryKey::new("getFlashcards", &json!({"page": 2, "categoryId": 1}));
        assert_eq!(key.to_string(), r#"getFlashcards({"categoryId":1,"page":2})"#);
    }
}
