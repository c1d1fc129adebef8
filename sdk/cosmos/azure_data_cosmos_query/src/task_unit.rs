// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Units of work for change-feed and query connectors.
//!
//! A connector splits a container's key space across tasks with one [`FeedRangeTaskUnit`] per feed range, and
//! keeps a [`MetadataTaskUnit`] recording the feed ranges it last saw for each container. When the recorded ranges
//! drift from the backend's current ones, the task units are re-targeted with [`FeedRangeTaskUnit::resolve_drift`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    query::{FeedRangeTarget, SplitMergeHandler},
    Error, Range, Result,
};

/// The progress of one connector task over one feed range of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRangeTaskUnit {
    pub database_name: String,
    pub container_name: String,
    pub container_rid: String,
    pub feed_range: Range<String>,

    /// The continuation to resume the feed range from, or `None` to start from the beginning.
    pub continuation_state: Option<String>,

    /// The destination the task writes to.
    pub topic: String,
}

impl FeedRangeTarget for FeedRangeTaskUnit {
    fn feed_range(&self) -> &Range<String> {
        &self.feed_range
    }

    fn with_feed_range(&self, range: Range<String>) -> Self {
        Self {
            feed_range: range,
            ..self.clone()
        }
    }
}

impl FeedRangeTaskUnit {
    /// Re-targets the task units of one container to its `current` feed ranges.
    ///
    /// Units for unchanged ranges are kept verbatim. A unit whose range was split is replaced by one unit per child
    /// range, each carrying the parent's continuation. Units whose ranges were merged are kept separate.
    /// Current ranges that overlap none of the units are ignored.
    ///
    /// Fails with [`Error::ClientValidation`] if the units belong to different containers, and with
    /// [`Error::FatalConsistency`] if the current ranges leave part of a unit's range uncovered.
    pub fn resolve_drift(units: &[Self], current: &[Range<String>]) -> Result<Vec<Self>> {
        if let Some(first) = units.first() {
            if let Some(other) = units
                .iter()
                .find(|u| u.container_rid != first.container_rid)
            {
                return Err(Error::ClientValidation(format!(
                    "task units span containers {} and {}",
                    first.container_rid, other.container_rid
                )));
            }
        }

        let current: Vec<Range<String>> = current
            .iter()
            .filter(|c| units.iter().any(|u| u.feed_range.overlaps(c)))
            .cloned()
            .collect();
        SplitMergeHandler::resolve(units, &current)
    }
}

/// What a connector knows about the containers it reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataTaskUnit {
    pub database_name: String,
    pub containers: Vec<String>,
    pub container_rids: Vec<String>,

    /// Entries of the form `container#topic`.
    pub containers_topic_map: Vec<String>,
    pub storage_name: String,
    pub storage_type: String,

    /// The feed ranges last seen for each container, by container resource ID.
    #[serde(default)]
    pub feed_ranges: BTreeMap<String, Vec<Range<String>>>,
}

impl MetadataTaskUnit {
    /// Gets the topic configured for a container.
    pub fn topic_for(&self, container: &str) -> Option<&str> {
        self.containers_topic_map.iter().find_map(|entry| {
            let (name, topic) = entry.split_once('#')?;
            (name == container).then_some(topic)
        })
    }

    /// Records the feed ranges currently served for a container.
    pub fn record_feed_ranges(&mut self, container_rid: impl Into<String>, mut ranges: Vec<Range<String>>) {
        ranges.sort_by(|a, b| a.min().cmp(b.min()));
        self.feed_ranges.insert(container_rid.into(), ranges);
    }

    /// Indicates if a container's `current` feed ranges differ from the recorded ones.
    ///
    /// A container without recorded ranges has always drifted.
    pub fn has_drifted(&self, container_rid: &str, current: &[Range<String>]) -> bool {
        let Some(recorded) = self.feed_ranges.get(container_rid) else {
            return true;
        };
        let mut current = current.to_vec();
        current.sort_by(|a, b| a.min().cmp(b.min()));
        *recorded != current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: &str, max: &str) -> Range<String> {
        Range::half_open(min.to_string(), max.to_string()).unwrap()
    }

    fn unit(min: &str, max: &str, continuation: Option<&str>) -> FeedRangeTaskUnit {
        FeedRangeTaskUnit {
            database_name: "db".into(),
            container_name: "orders".into(),
            container_rid: "rid1".into(),
            feed_range: range(min, max),
            continuation_state: continuation.map(String::from),
            topic: "orders-topic".into(),
        }
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(unit("", "FF", Some("42"))).unwrap();
        assert_eq!("rid1", json["containerRid"]);
        assert_eq!("42", json["continuationState"]);
        assert_eq!(true, json["feedRange"]["isMinInclusive"]);
    }

    #[test]
    fn unchanged_ranges_keep_units() {
        let units = vec![unit("", "80", Some("a")), unit("80", "FF", None)];
        let resolved =
            FeedRangeTaskUnit::resolve_drift(&units, &[range("", "80"), range("80", "FF")]).unwrap();
        assert_eq!(units, resolved);
    }

    #[test]
    fn split_copies_continuation_to_children() {
        let units = vec![unit("", "FF", Some("a"))];
        let resolved =
            FeedRangeTaskUnit::resolve_drift(&units, &[range("", "80"), range("80", "FF")]).unwrap();
        assert_eq!(
            vec![unit("", "80", Some("a")), unit("80", "FF", Some("a"))],
            resolved
        );
    }

    #[test]
    fn merge_keeps_units_separate() {
        let units = vec![unit("", "80", Some("a")), unit("80", "FF", Some("b"))];
        let resolved = FeedRangeTaskUnit::resolve_drift(&units, &[range("", "FF")]).unwrap();
        assert_eq!(units, resolved);
    }

    #[test]
    fn rejects_units_from_several_containers() {
        let mut other = unit("80", "FF", None);
        other.container_rid = "rid2".into();
        let err = FeedRangeTaskUnit::resolve_drift(&[unit("", "80", None), other], &[range("", "FF")])
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn detects_drift() {
        let mut metadata = MetadataTaskUnit::default();
        assert!(metadata.has_drifted("rid1", &[range("", "FF")]));

        metadata.record_feed_ranges("rid1", vec![range("80", "FF"), range("", "80")]);
        assert!(!metadata.has_drifted("rid1", &[range("", "80"), range("80", "FF")]));
        assert!(metadata.has_drifted("rid1", &[range("", "FF")]));
    }

    #[test]
    fn looks_up_topics() {
        let metadata = MetadataTaskUnit {
            containers_topic_map: vec!["orders#orders-topic".into(), "users#users-topic".into()],
            ..Default::default()
        };
        assert_eq!(Some("users-topic"), metadata.topic_for("users"));
        assert_eq!(None, metadata.topic_for("missing"));
    }
}
