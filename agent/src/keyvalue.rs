//! Key-value stores for device identity, inventory attributes and
//! artifact provides metadata.
//!
//! Two flavours live here: [`KeyValueList`], an ordered accumulator with a
//! compact delimited serialization used for artifact "provides", and
//! [`Keystore`], a flat name/value table with a JSON object projection used
//! for identity and inventory attributes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AgentError;

/// ASCII unit separator, between a key and its value
const KEY_VALUE_DELIMITER: char = '\x1F';
/// ASCII record separator, terminating each pair
const KEY_VALUE_SEPARATOR: char = '\x1E';

/// A single key/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: String,
}

/// Ordered key-value accumulator.
///
/// New entries are inserted at the head, so iteration order is
/// most-recent-first. Consumers must not rely on the order of duplicate
/// keys surviving a serialization round trip, only on set equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueList {
    items: Vec<KeyValueEntry>,
}

impl KeyValueList {
    /// Create an empty list
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Insert a pair at the head of the list
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(
            0,
            KeyValueEntry {
                key: key.into(),
                value: value.into(),
            },
        );
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the list holds no pairs
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the pairs, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &KeyValueEntry> {
        self.items.iter()
    }

    /// Look up the first value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Append all entries of `other` onto the tail of this list.
    ///
    /// Takes `other` by value: the ownership transfer that the original
    /// list-takeover contract expressed by nulling the source handle is
    /// expressed here by consuming it.
    pub fn append(&mut self, mut other: KeyValueList) {
        self.items.append(&mut other.items);
    }

    /// Flatten the list to a single delimited string.
    ///
    /// Each pair becomes `key` + US + `value` + RS with no other
    /// delimiters. Keys and values containing either control byte are
    /// rejected, since the format defines no escaping.
    pub fn to_delimited_string(&self) -> Result<String, AgentError> {
        let mut out = String::new();
        for entry in &self.items {
            if entry.key.contains(KEY_VALUE_DELIMITER)
                || entry.key.contains(KEY_VALUE_SEPARATOR)
                || entry.value.contains(KEY_VALUE_DELIMITER)
                || entry.value.contains(KEY_VALUE_SEPARATOR)
            {
                return Err(AgentError::MalformedInput(format!(
                    "key-value pair '{}' contains a reserved separator byte",
                    entry.key
                )));
            }
            out.push_str(&entry.key);
            out.push(KEY_VALUE_DELIMITER);
            out.push_str(&entry.value);
            out.push(KEY_VALUE_SEPARATOR);
        }
        Ok(out)
    }

    /// Rebuild a list from its delimited form.
    ///
    /// Records lacking a unit separator are rejected. Reconstruction is
    /// head-insertion, so the relative order of pairs is reversed.
    pub fn from_delimited_string(s: &str) -> Result<Self, AgentError> {
        let mut list = KeyValueList::new();
        for record in s.split(KEY_VALUE_SEPARATOR) {
            if record.is_empty() {
                continue;
            }
            let Some((key, value)) = record.split_once(KEY_VALUE_DELIMITER) else {
                return Err(AgentError::MalformedInput(
                    "key-value record lacks a unit separator".to_string(),
                ));
            };
            list.push(key, value);
        }
        Ok(list)
    }
}

/// A single keystore item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreItem {
    pub name: String,
    pub value: String,
}

/// Flat table of name/value attributes.
///
/// Used for the device identity sent with authentication requests and for
/// the inventory attributes published to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keystore {
    items: Vec<KeystoreItem>,
}

impl Keystore {
    /// Create an empty keystore
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the keystore holds no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Set or replace the item stored under `name`
    pub fn set_item(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(item) = self.items.iter_mut().find(|i| i.name == name) {
            item.value = value;
        } else {
            self.items.push(KeystoreItem { name, value });
        }
    }

    /// Look up the value stored under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.value.as_str())
    }

    /// Iterate over the items in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &KeystoreItem> {
        self.items.iter()
    }

    /// Project the keystore to a flat JSON object of string values
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for item in &self.items {
            object.insert(item.name.clone(), Value::String(item.value.clone()));
        }
        Value::Object(object)
    }

    /// Replace the keystore contents from a flat JSON object.
    ///
    /// The previous contents are released first. Non-string members are
    /// skipped, matching the tolerant behaviour of the original store.
    pub fn from_json(&mut self, object: &Value) -> Result<(), AgentError> {
        let Some(map) = object.as_object() else {
            return Err(AgentError::MalformedInput(
                "keystore document is not an object".to_string(),
            ));
        };
        self.items.clear();
        for (name, value) in map {
            if let Some(value) = value.as_str() {
                self.items.push(KeystoreItem {
                    name: name.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_round_trip_set_equality() {
        let mut list = KeyValueList::new();
        list.push("artifact_name", "release-2");
        list.push("rootfs-image.version", "release-2");
        list.push("device_type", "gateway");

        let s = list.to_delimited_string().unwrap();
        let rebuilt = KeyValueList::from_delimited_string(&s).unwrap();

        assert_eq!(rebuilt.len(), list.len());
        for entry in list.iter() {
            assert_eq!(rebuilt.get(&entry.key), Some(entry.value.as_str()));
        }
    }

    #[test]
    fn test_list_rejects_record_without_delimiter() {
        let err = KeyValueList::from_delimited_string("key-without-value\x1E").unwrap_err();
        assert!(matches!(err, AgentError::MalformedInput(_)));
    }

    #[test]
    fn test_list_rejects_reserved_bytes() {
        let mut list = KeyValueList::new();
        list.push("bad\x1Fkey", "value");
        assert!(list.to_delimited_string().is_err());
    }

    #[test]
    fn test_list_append_transfers_ownership() {
        let mut a = KeyValueList::new();
        a.push("k1", "v1");
        let mut b = KeyValueList::new();
        b.push("k2", "v2");

        a.append(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get("k2"), Some("v2"));
    }

    #[test]
    fn test_keystore_json_round_trip() {
        let mut keystore = Keystore::new();
        keystore.set_item("serial", "0042");
        keystore.set_item("mac", "aa:bb:cc:dd:ee:ff");

        let json = keystore.to_json();
        let mut rebuilt = Keystore::new();
        rebuilt.from_json(&json).unwrap();

        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.get("serial"), Some("0042"));
        assert_eq!(rebuilt.get("mac"), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_keystore_from_json_replaces_in_place() {
        let mut keystore = Keystore::new();
        keystore.set_item("old", "value");

        let json = serde_json::json!({"new": "value"});
        keystore.from_json(&json).unwrap();

        assert_eq!(keystore.get("old"), None);
        assert_eq!(keystore.get("new"), Some("value"));
    }

    #[test]
    fn test_keystore_set_item_replaces_value() {
        let mut keystore = Keystore::new();
        keystore.set_item("name", "first");
        keystore.set_item("name", "second");
        assert_eq!(keystore.len(), 1);
        assert_eq!(keystore.get("name"), Some("second"));
    }
}
