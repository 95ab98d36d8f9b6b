//! Message metadata: string keys to string values, carried on every header.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved key holding the originating client IP.
///
/// Set once by the first hop that sees the request and preserved by every
/// forwarding hop after it.
pub const META_REAL_IP: &str = "X-Real-IP";

/// Metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value. Returns `None` for missing keys and empty values.
    pub fn peek(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Set a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a key.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Call `f` for every key/value pair in key order.
    pub fn visit(&self, mut f: impl FnMut(&str, &str)) {
        for (k, v) in &self.0 {
            f(k, v);
        }
    }

    /// Iterate over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every entry of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_ignores_empty_values() {
        let mut meta = Metadata::new();
        meta.set(META_REAL_IP, "");
        assert_eq!(meta.peek(META_REAL_IP), None);
        meta.set(META_REAL_IP, "10.0.0.7");
        assert_eq!(meta.peek(META_REAL_IP), Some("10.0.0.7"));
    }

    #[test]
    fn test_merge_overwrites() {
        let mut a: Metadata = [("k", "1"), ("x", "a")].into_iter().collect();
        let b: Metadata = [("k", "2")].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.peek("k"), Some("2"));
        assert_eq!(a.peek("x"), Some("a"));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let meta: Metadata = [("trace", "abc")].into_iter().collect();
        assert_eq!(serde_json::to_string(&meta).unwrap(), r#"{"trace":"abc"}"#);
    }
}
