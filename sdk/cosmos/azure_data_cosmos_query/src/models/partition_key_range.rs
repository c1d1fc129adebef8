// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

use crate::{Range, Result};

/// The lowest effective partition key. Every container's first range starts here.
pub const MINIMUM_INCLUSIVE_EFFECTIVE_PARTITION_KEY: &str = "";

/// The effective partition key bound that every container's last range ends at.
pub const MAXIMUM_EXCLUSIVE_EFFECTIVE_PARTITION_KEY: &str = "FF";

/// A physical partition key range, as reported by the backend's partition key range metadata.
///
/// A partition key range always covers `[min_inclusive, max_exclusive)` of the effective partition key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: String,
    pub max_exclusive: String,

    /// IDs of the ranges this range was split or merged from, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
            parents: Vec::new(),
        }
    }

    /// Converts this partition key range into the half-open [`Range`] it covers.
    pub fn to_range(&self) -> Result<Range<String>> {
        Range::half_open(self.min_inclusive.clone(), self.max_exclusive.clone())
    }
}

/// The full effective partition key space, `["", "FF")`.
pub fn full_range() -> Range<String> {
    Range::from_ordered_bounds(
        MINIMUM_INCLUSIVE_EFFECTIVE_PARTITION_KEY.to_string(),
        MAXIMUM_EXCLUSIVE_EFFECTIVE_PARTITION_KEY.to_string(),
        true,
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_pkrange_metadata() {
        let pkrange: PartitionKeyRange = serde_json::from_str(
            r#"{"id":"3","minInclusive":"40","maxExclusive":"80","parents":["0"],"ridPrefix":3}"#,
        )
        .unwrap();

        assert_eq!("3", pkrange.id);
        assert_eq!(vec!["0".to_string()], pkrange.parents);
        let range = pkrange.to_range().unwrap();
        assert!(range.is_min_inclusive());
        assert!(!range.is_max_inclusive());
        assert_eq!("40", range.min().as_str());
    }

    #[test]
    fn rejects_inverted_pkrange() {
        let pkrange = PartitionKeyRange::new("1", "80", "40");
        assert!(pkrange.to_range().is_err());
    }

    #[test]
    fn full_range_spans_key_space() {
        let range = full_range();
        assert!(range.contains(&"00".to_string()));
        assert!(range.contains(&"FE".to_string()));
        assert!(!range.contains(&"FF".to_string()));
    }
}
