//! Bucket and object key identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Minimum bucket name length
pub const MIN_BUCKET_NAME_LEN: usize = 3;

/// Maximum bucket name length
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// Maximum object key length in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Naming rule a rejected bucket name violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    /// Not between 3 and 63 characters long
    Length,
    /// Contains `..`
    ConsecutivePeriods,
    /// Not lowercase letters, digits, `.` and `-`, starting and ending alphanumeric
    Pattern,
}

impl fmt::Display for NameRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameRule::Length => write!(
                f,
                "bucket name must be at least {} and no more than {} characters long",
                MIN_BUCKET_NAME_LEN, MAX_BUCKET_NAME_LEN
            ),
            NameRule::ConsecutivePeriods => {
                f.write_str("bucket name cannot contain successive periods")
            }
            NameRule::Pattern => f.write_str(
                "bucket name may only contain lowercase letters, digits, '.' and '-', \
                 and must start and end with a letter or digit",
            ),
        }
    }
}

/// A validated bucket name.
///
/// Construction goes through [`BucketName::parse`], so holding a `BucketName`
/// means the naming rules were already checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BucketName(String);

impl BucketName {
    /// Validate `name` against the bucket naming rules.
    ///
    /// Rules are checked in order: length, consecutive periods, pattern.
    pub fn parse(name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check `name` against the bucket naming rules without allocating a `BucketName`.
pub fn validate(name: &str) -> StoreResult<()> {
    let rule = if name.len() < MIN_BUCKET_NAME_LEN || name.len() > MAX_BUCKET_NAME_LEN {
        Some(NameRule::Length)
    } else if name.contains("..") {
        Some(NameRule::ConsecutivePeriods)
    } else if !matches_pattern(name) {
        Some(NameRule::Pattern)
    } else {
        None
    };

    match rule {
        Some(rule) => Err(StoreError::InvalidName {
            name: name.to_string(),
            rule,
        }),
        None => Ok(()),
    }
}

// [a-z0-9][a-z0-9.-]*[a-z0-9]
fn matches_pattern(name: &str) -> bool {
    let bytes = name.as_bytes();
    let edge = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let inner = |b: u8| edge(b) || b == b'.' || b == b'-';

    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if bytes.len() >= 2 => {
            edge(first) && edge(last) && bytes[1..bytes.len() - 1].iter().all(|&b| inner(b))
        }
        _ => false,
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for BucketName {
    type Error = StoreError;

    fn try_from(value: &str) -> StoreResult<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for BucketName {
    type Error = StoreError;

    fn try_from(value: String) -> StoreResult<Self> {
        Self::parse(value)
    }
}

impl<'de> Deserialize<'de> for BucketName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        BucketName::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// An object key within a bucket.
///
/// Keys are opaque; only empty keys and keys longer than 1024 bytes are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> StoreResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(StoreError::InvalidArgument(
                "object key cannot be empty".to_string(),
            ));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::InvalidArgument(format!(
                "object key is {} bytes, maximum is {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ObjectKey {
    type Error = StoreError;

    fn try_from(value: &str) -> StoreResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = StoreError;

    fn try_from(value: String) -> StoreResult<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_of(name: &str) -> Option<NameRule> {
        match BucketName::parse(name) {
            Ok(_) => None,
            Err(StoreError::InvalidName { rule, .. }) => Some(rule),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_valid_names() {
        for name in ["my-bucket1", "abc", "a.b-c", "bucket.with.dots", "123"] {
            assert!(BucketName::parse(name).is_ok(), "{} should be valid", name);
        }
        let max = "a".repeat(63);
        assert!(BucketName::parse(max).is_ok());
    }

    #[test]
    fn test_length_rule() {
        for len in [0, 1, 2, 64, 100] {
            let name = "a".repeat(len);
            assert_eq!(rule_of(&name), Some(NameRule::Length), "length {}", len);
        }
    }

    #[test]
    fn test_consecutive_periods() {
        assert_eq!(rule_of("my..bucket"), Some(NameRule::ConsecutivePeriods));
        let err = BucketName::parse("my..bucket").unwrap_err();
        assert!(err.to_string().contains("successive periods"));
    }

    #[test]
    fn test_pattern_rule() {
        for name in ["My-Bucket", "-bucket", "bucket-", ".bucket", "bucket.", "buck_et", "bück"] {
            assert_eq!(rule_of(name), Some(NameRule::Pattern), "{}", name);
        }
    }

    #[test]
    fn test_deserialize_validates() {
        #[derive(Deserialize)]
        struct Wrapper {
            bucket: BucketName,
        }

        let ok: Wrapper = toml::from_str("bucket = \"photos\"").unwrap();
        assert_eq!(ok.bucket.as_str(), "photos");

        let bad: Result<Wrapper, _> = toml::from_str("bucket = \"Photos\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_object_key_limits() {
        assert!(ObjectKey::new("a/b/c.txt").is_ok());
        assert!(ObjectKey::new("").is_err());
        assert!(ObjectKey::new("k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(ObjectKey::new("k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
