//! Content fingerprints used as the Schema Store's identity key

use sha2::{Sha256, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum of canonical schema content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from text
    pub fn from_text(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Compute checksum from a JSON value.
    ///
    /// `serde_json` maps keep keys sorted, so the compact rendering is already
    /// independent of the submitted key order.
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::from_text(&value.to_string())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that content matches this checksum
    pub fn verify(&self, content: &str) -> bool {
        Self::from_text(content) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let content = r#"{"name":"test","type":"string"}"#;
        assert_eq!(Checksum::from_text(content), Checksum::from_text(content));
    }

    #[test]
    fn test_checksum_different_content() {
        let checksum1 = Checksum::from_text(r#"{"name":"test1"}"#);
        let checksum2 = Checksum::from_text(r#"{"name":"test2"}"#);
        assert_ne!(checksum1, checksum2);
    }

    #[test]
    fn test_json_key_order_is_irrelevant() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{ "a": 2, "b": 1 }"#).unwrap();
        assert_eq!(Checksum::from_json(&a), Checksum::from_json(&b));
    }

    #[test]
    fn test_checksum_verification() {
        let checksum = Checksum::from_text("abc");
        assert!(checksum.verify("abc"));
        assert!(!checksum.verify("abd"));
    }
}
