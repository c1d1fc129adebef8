// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Reconciles recorded per-range progress with the backend's current partition key ranges.
//!
//! Partition key ranges split and merge over time, so the ranges recorded in a continuation (or by a connector's
//! task units) can stop matching the ranges the backend serves. [`SplitMergeHandler`] maps each recorded range onto
//! the current layout without inventing backend cursors:
//!
//! * A recorded range that is still current is targeted as-is.
//! * A recorded range that was split is targeted once per current child range, each carrying the parent's cursor.
//! * Recorded ranges that were merged stay separate targets, each with its own cursor. They are queried as
//!   sub-ranges of the merged range until each one ends.
//!
//! A mixed event, where a range is split and part of it merged with a neighbor, falls out of the same rule:
//! every pair of overlapping recorded and current ranges yields one target covering their intersection.

use crate::{models::PartitionKeyRange, query::QuerySettings, Error, Range, Result};

/// A unit of work bound to an effective partition key range, which can be re-targeted to a different range.
pub trait FeedRangeTarget: Clone {
    fn feed_range(&self) -> &Range<String>;

    /// Creates a copy of this target, carrying the same progress, applied to `range`.
    fn with_feed_range(&self, range: Range<String>) -> Self;
}

/// How a current range was matched against the recorded ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResolution {
    /// A recorded range matches the current range exactly.
    Exact,

    /// The current range is part of a single recorded range.
    Split,

    /// Several recorded ranges (or parts of them) make up the current range.
    Merge,
}

/// Maps recorded per-range progress onto the current partition key ranges.
#[derive(Debug, Default, Clone, Copy)]
pub struct SplitMergeHandler;

impl SplitMergeHandler {
    /// Resolves `offered` targets against the `current` ranges.
    ///
    /// Every current range must overlap at least one offered target, and the current ranges must together cover
    /// every offered range. Otherwise the topology is inconsistent and [`Error::FatalConsistency`] is returned.
    /// Callers that only hold progress for part of the key space should first drop the current ranges that overlap
    /// none of their targets.
    ///
    /// The result is ordered by range.
    pub fn resolve<T: FeedRangeTarget>(offered: &[T], current: &[Range<String>]) -> Result<Vec<T>> {
        Ok(Self::resolve_with_kinds(offered, current)?
            .into_iter()
            .map(|(target, _)| target)
            .collect())
    }

    /// Like [`resolve`](Self::resolve), but also reports how each target was derived.
    pub fn resolve_with_kinds<T: FeedRangeTarget>(
        offered: &[T],
        current: &[Range<String>],
    ) -> Result<Vec<(T, RangeResolution)>> {
        for target in offered {
            check_covered(target.feed_range(), current)?;
        }

        let mut current: Vec<&Range<String>> = current.iter().collect();
        current.sort_by(|a, b| a.min().cmp(b.min()));

        let mut resolved = Vec::new();
        for range in current {
            if let Some(exact) = offered.iter().find(|o| o.feed_range() == range) {
                tracing::trace!(range = %range, "range unchanged");
                resolved.push((exact.clone(), RangeResolution::Exact));
                continue;
            }

            let mut overlapping: Vec<&T> = offered
                .iter()
                .filter(|o| o.feed_range().overlaps(range))
                .collect();
            overlapping.sort_by(|a, b| a.feed_range().min().cmp(b.feed_range().min()));

            let kind = match overlapping.as_slice() {
                [] => {
                    return Err(Error::FatalConsistency(format!(
                        "current range {range} does not overlap any recorded range"
                    )))
                }
                [single] if single.feed_range().contains_range(range) => RangeResolution::Split,
                _ => RangeResolution::Merge,
            };
            tracing::debug!(range = %range, recorded = overlapping.len(), ?kind, "range changed");

            for target in overlapping {
                match target.feed_range().intersection(range) {
                    Some(shared) if &shared == target.feed_range() => {
                        resolved.push((target.clone(), kind))
                    }
                    Some(shared) => resolved.push((target.with_feed_range(shared), kind)),
                    None => {}
                }
            }
        }

        Ok(resolved)
    }
}

/// Checks that the `current` ranges leave no gap inside `recorded`.
fn check_covered(recorded: &Range<String>, current: &[Range<String>]) -> Result<()> {
    let mut pieces: Vec<Range<String>> = current
        .iter()
        .filter_map(|c| c.intersection(recorded))
        .collect();
    pieces.sort_by(|a, b| a.min().cmp(b.min()));

    let uncovered = || {
        Error::FatalConsistency(format!(
            "recorded range {recorded} is not covered by the current ranges"
        ))
    };

    let (Some(first), Some(last)) = (pieces.first(), pieces.last()) else {
        return Err(uncovered());
    };
    if first.min() != recorded.min() || first.is_min_inclusive() != recorded.is_min_inclusive() {
        return Err(uncovered());
    }
    if last.max() != recorded.max() || last.is_max_inclusive() != recorded.is_max_inclusive() {
        return Err(uncovered());
    }
    for pair in pieces.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if left.max() != right.min() || !(left.is_max_inclusive() || right.is_min_inclusive()) {
            return Err(uncovered());
        }
    }

    Ok(())
}

/// Fetches the current partition key ranges and resolves `offered` against the ones it touches.
pub(crate) async fn resolve_current<T: FeedRangeTarget>(
    settings: &QuerySettings,
    offered: &[T],
) -> Result<Vec<T>> {
    let current = settings
        .backend
        .resolve_current_ranges(&settings.collection)
        .await?;
    let current = relevant_ranges(&current, offered)?;
    SplitMergeHandler::resolve(offered, &current)
}

/// Converts partition key ranges to [`Range`]s, keeping those that overlap any offered target.
pub(crate) fn relevant_ranges<T: FeedRangeTarget>(
    pkranges: &[PartitionKeyRange],
    offered: &[T],
) -> Result<Vec<Range<String>>> {
    let mut ranges = Vec::with_capacity(pkranges.len());
    for pkrange in pkranges {
        let range = pkrange.to_range()?;
        if offered.iter().any(|o| o.feed_range().overlaps(&range)) {
            ranges.push(range);
        }
    }
    Ok(ranges)
}
