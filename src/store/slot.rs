//! Slot records for the allocation store

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a slot in the pool (0 = lowest interval)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotIndex(u64);

impl SlotIndex {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for SlotIndex {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An occupied slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub index: SlotIndex,
    /// Time of the claim or of the last tag update
    pub updated_at: DateTime<Utc>,
    /// Caller supplied owner, usually an instance UUID
    pub tag: Option<String>,
}

impl SlotRecord {
    pub fn new(index: SlotIndex, updated_at: DateTime<Utc>, tag: Option<String>) -> Self {
        Self {
            index,
            updated_at,
            tag,
        }
    }
}

/// Tags end up on a single output line next to the interval.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(Error::InvalidTag("tag must not be empty".to_string()));
    }
    if tag.chars().any(char::is_control) {
        return Err(Error::InvalidTag(format!(
            "tag {:?} contains control characters",
            tag
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_index_ordering() {
        let a = SlotIndex::new(1);
        let b = SlotIndex::from(2);
        assert!(a < b);
        assert_eq!(b.get(), 2);
        assert_eq!(b.to_string(), "2");
    }

    #[test]
    fn test_slot_index_serializes_as_number() {
        let json = serde_json::to_string(&SlotIndex::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_tag_validation() {
        assert!(validate_tag("6ba7b810-9dad-11d1-80b4-00c04fd430c8").is_ok());
        assert!(validate_tag("edge-router-3").is_ok());
        assert!(matches!(validate_tag(""), Err(Error::InvalidTag(_))));
        assert!(matches!(validate_tag("a\nb"), Err(Error::InvalidTag(_))));
    }
}
