//! Ephemeral per-client presence
//!
//! Presence is not part of durable document content. It rides along the
//! change stream as a [`PresenceChange`] and is dropped when a client
//! detaches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key/value presence of one client on one document
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presence(BTreeMap<String, String>);

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Reset to empty
    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Presence {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Presence mutation carried by a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceChange {
    /// Replace the author's presence
    Put(Presence),
    /// Drop the author's presence entirely
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_set_and_clear() {
        let mut presence = Presence::new();
        presence.set("cursor", "12");
        presence.set("name", "ada");
        assert_eq!(presence.len(), 2);
        assert_eq!(presence.get("cursor"), Some("12"));

        presence.clear();
        assert!(presence.is_empty());
        assert_eq!(presence.get("cursor"), None);
    }

    #[test]
    fn test_presence_from_iter() {
        let presence: Presence = [("color", "red")].into_iter().collect();
        assert_eq!(presence.get("color"), Some("red"));
    }
}
