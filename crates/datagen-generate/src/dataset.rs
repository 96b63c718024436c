use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::GenerationError;

/// Items emitted under one final collection name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetCollection {
    pub name: String,
    pub items: Vec<Value>,
}

/// Generated data by final collection name, in order of first appearance.
/// Collections sharing a name are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    collections: Vec<DatasetCollection>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `name` is present, even without items.
    pub fn ensure(&mut self, name: &str) -> &mut DatasetCollection {
        let position = match self
            .collections
            .iter()
            .position(|collection| collection.name == name)
        {
            Some(position) => position,
            None => {
                self.collections.push(DatasetCollection {
                    name: name.to_string(),
                    items: Vec::new(),
                });
                self.collections.len() - 1
            }
        };
        &mut self.collections[position]
    }

    pub fn push(&mut self, name: &str, item: Value) {
        self.ensure(name).items.push(item);
    }

    pub fn get(&self, name: &str) -> Option<&[Value]> {
        self.collections
            .iter()
            .find(|collection| collection.name == name)
            .map(|collection| collection.items.as_slice())
    }

    pub fn collections(&self) -> &[DatasetCollection] {
        &self.collections
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections
            .iter()
            .map(|collection| collection.name.as_str())
    }

    pub fn total_items(&self) -> usize {
        self.collections
            .iter()
            .map(|collection| collection.items.len())
            .sum()
    }

    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .collections
            .iter()
            .map(|collection| {
                (
                    collection.name.clone(),
                    Value::Array(collection.items.clone()),
                )
            })
            .collect();
        Value::Object(map)
    }

    /// SHA-256 of the compact JSON form, hex encoded.
    pub fn fingerprint(&self) -> Result<String, GenerationError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.collections.len()))?;
        for collection in &self.collections {
            map.serialize_entry(&collection.name, &collection.items)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn same_name_collections_merge_in_first_seen_order() {
        let mut dataset = Dataset::new();
        dataset.push("users", json!({"id": 1}));
        dataset.ensure("orders");
        dataset.push("users", json!({"id": 2}));

        assert_eq!(dataset.names().collect::<Vec<_>>(), vec!["users", "orders"]);
        assert_eq!(dataset.get("users").map(<[Value]>::len), Some(2));
        assert_eq!(dataset.get("orders"), Some(&[][..]));
        assert_eq!(
            serde_json::to_string(&dataset).expect("serialize"),
            r#"{"users":[{"id":1},{"id":2}],"orders":[]}"#
        );
        assert_eq!(dataset.to_value(), json!({"users": [{"id": 1}, {"id": 2}], "orders": []}));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let mut first = Dataset::new();
        first.push("users", json!({"id": 1}));
        let mut second = first.clone();
        assert_eq!(first.fingerprint().ok(), second.fingerprint().ok());
        second.push("users", json!({"id": 2}));
        assert_ne!(first.fingerprint().ok(), second.fingerprint().ok());
        assert_eq!(first.fingerprint().map(|hash| hash.len()).ok(), Some(64));
    }
}
