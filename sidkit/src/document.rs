//! Session documents.
//!
//! A [`Document`] is the key-value state kept for one session: a JSON object
//! whose values can be any JSON value. Stores persist it as JSON text and
//! always read and write it as a whole.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::{StoreError, StoreResult};

/// The stored form of an empty document.
pub(crate) const EMPTY_DOCUMENT: &str = "{}";

/// The key-value state of a single session.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use sidkit::Document;
///
/// let mut document = Document::new();
/// document.insert("name", json!("shantaram"));
///
/// assert_eq!(document.get("name"), Some(&json!("shantaram")));
/// assert_eq!(document.to_json()?, r#"{"name":"shantaram"}"#);
/// # Ok::<(), sidkit::store::StoreError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a document from its stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MalformedDocument`] if `data` is not valid JSON
    /// or is valid JSON but not an object.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::Document;
    ///
    /// assert!(Document::from_json("{}")?.is_empty());
    /// assert!(Document::from_json("[1, 2]").is_err());
    /// # Ok::<(), sidkit::store::StoreError>(())
    /// ```
    pub fn from_json(data: &str) -> StoreResult<Self> {
        let value: Value = serde_json::from_str(data)
            .map_err(|err| StoreError::MalformedDocument(Box::new(err)))?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StoreError::MalformedDocument(
                format!("expected a JSON object, found `{other}`").into(),
            )),
        }
    }

    /// Serializes the document to its stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if serialization fails.
    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string(&self.0).map_err(StoreError::Encode)
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns `true` if the document contains `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts `value` under `key`, returning the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Removes `key`, returning its value, if any.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Removes all keys.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the document has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the keys and values.
    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }

    /// Consumes the document, returning the underlying JSON map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        Value::Object(document.0)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_document_round_trips() {
        let document = Document::from_json(EMPTY_DOCUMENT).unwrap();
        assert!(document.is_empty());
        assert_eq!(document.to_json().unwrap(), EMPTY_DOCUMENT);
    }

    #[test]
    fn nested_values_survive_storage() {
        let document: Document = [
            ("user", json!({"id": 7, "roles": ["admin", "dev"]})),
            ("visits", json!(3)),
            ("flag", json!(false)),
            ("nothing", Value::Null),
        ]
        .into_iter()
        .collect();

        let stored = document.to_json().unwrap();
        assert_eq!(Document::from_json(&stored).unwrap(), document);
    }

    #[test]
    fn invalid_json_is_malformed() {
        let error = Document::from_json("{\"name\":").unwrap_err();
        assert!(matches!(error, StoreError::MalformedDocument(_)));
    }

    #[test]
    fn non_object_json_is_malformed() {
        for data in ["[]", "\"text\"", "42", "null", "true"] {
            let error = Document::from_json(data).unwrap_err();
            assert!(
                matches!(error, StoreError::MalformedDocument(_)),
                "{data} should be rejected"
            );
        }
    }

    #[test]
    fn insert_and_remove() {
        let mut document = Document::new();
        assert_eq!(document.insert("a", json!(1)), None);
        assert_eq!(document.insert("a", json!(2)), Some(json!(1)));
        assert!(document.contains_key("a"));
        assert_eq!(document.len(), 1);

        assert_eq!(document.remove("a"), Some(json!(2)));
        assert_eq!(document.remove("a"), None);
        assert!(document.is_empty());
    }

    #[test]
    fn converts_into_json_value() {
        let mut document = Document::new();
        document.insert("website", json!("shantaram.xyz"));

        assert_eq!(Value::from(document), json!({"website": "shantaram.xyz"}));
    }
}
