//! Structural query keys.
//!
//! A [`QueryKey`] is an ordered tuple of primitive values, usually a namespace
//! followed by parameters (`["menus", "ADMIN"]`). Two keys built separately from
//! equal parts address the same cache entry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One primitive component of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        KeyPart::Str(value.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeyPart::Null)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Null => f.write_str("null"),
            KeyPart::Bool(b) => write!(f, "{}", b),
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Structural cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    /// Start a key with a namespace part.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self(vec![KeyPart::Str(namespace.into())])
    }

    /// Build a key from arbitrary parts.
    pub fn from_parts(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// Append a parameter, builder style.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The leading string part, if any.
    pub fn namespace(&self) -> Option<&str> {
        match self.0.first() {
            Some(KeyPart::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// True when every part of `prefix` equals the corresponding leading part of `self`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Canonical string form used as the object key in persisted documents.
    ///
    /// This is the compact JSON encoding of the parts, e.g. `["menus","ADMIN"]`.
    pub fn hash_key(&self) -> String {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|p| match p {
                KeyPart::Null => "null".to_string(),
                KeyPart::Bool(b) => b.to_string(),
                KeyPart::Int(i) => i.to_string(),
                KeyPart::Str(s) => serde_json::Value::String(s.clone()).to_string(),
            })
            .collect();
        format!("[{}]", parts.join(","))
    }

    /// Parse the canonical form produced by [`QueryKey::hash_key`].
    pub fn from_hash_key(hash: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(hash)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash_key())
    }
}

/// Build a [`QueryKey`] from a list of primitive values.
///
/// ```
/// use arda_core::query_key;
/// let key = query_key!["menus", "ADMIN"];
/// assert_eq!(key.namespace(), Some("menus"));
/// ```
#[macro_export]
macro_rules! query_key {
    ($($part:expr),* $(,)?) => {
        $crate::key::QueryKey::from_parts(vec![$($crate::key::KeyPart::from($part)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality() {
        let role = String::from("ADMIN");
        let a = QueryKey::new("menus").with(role.clone());
        let b = crate::query_key!["menus", "ADMIN"];
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_part_types_are_distinct() {
        let int_key = crate::query_key!["page", 1i64];
        let str_key = crate::query_key!["page", "1"];
        assert_ne!(int_key, str_key);
    }

    #[test]
    fn test_prefix_matching() {
        let key = crate::query_key!["menus", "ADMIN", 3i64];
        assert!(key.starts_with(&QueryKey::new("menus")));
        assert!(key.starts_with(&crate::query_key!["menus", "ADMIN"]));
        assert!(!key.starts_with(&crate::query_key!["menus", "USER"]));
        assert!(!QueryKey::new("menus").starts_with(&key));
    }

    #[test]
    fn test_hash_key_round_trip() {
        let key = crate::query_key!["menus", "AD\"MIN", 7i64, true, None::<String>];
        let hash = key.hash_key();
        assert_eq!(hash, r#"["menus","AD\"MIN",7,true,null]"#);
        assert_eq!(QueryKey::from_hash_key(&hash).unwrap(), key);
    }

    #[test]
    fn test_namespace() {
        assert_eq!(crate::query_key!["menus"].namespace(), Some("menus"));
        assert_eq!(crate::query_key![1i64].namespace(), None);
        assert_eq!(QueryKey::from_parts(vec![]).namespace(), None);
    }
}
