// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Intervals over an ordered key space.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An immutable interval over an ordered key space, such as the effective partition key space.
///
/// Each bound carries its own inclusivity flag, so a `Range` can express `[a, b)`, `(a, b]`, `[a, b]` and `(a, b)`.
/// The range `[a, a)` (or any range with `min == max` that is not inclusive on both ends) is valid and contains no keys.
///
/// The JSON form is `{"min": .., "max": .., "isMinInclusive": .., "isMaxInclusive": ..}`.
/// All four fields are required: a range without inclusivity flags is rejected when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    try_from = "RangeRepr<K>",
    bound(deserialize = "K: Deserialize<'de> + Ord + fmt::Debug")
)]
pub struct Range<K> {
    min: K,
    max: K,
    is_min_inclusive: bool,
    is_max_inclusive: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeRepr<K> {
    min: K,
    max: K,
    is_min_inclusive: bool,
    is_max_inclusive: bool,
}

impl<K: Ord + fmt::Debug> TryFrom<RangeRepr<K>> for Range<K> {
    type Error = Error;

    fn try_from(value: RangeRepr<K>) -> Result<Self> {
        Range::new(
            value.min,
            value.max,
            value.is_min_inclusive,
            value.is_max_inclusive,
        )
    }
}

impl<K: Ord + fmt::Debug> Range<K> {
    /// Creates a new range, failing with [`Error::InvalidRange`] if `min > max`.
    pub fn new(min: K, max: K, is_min_inclusive: bool, is_max_inclusive: bool) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidRange(format!(
                "min {:?} is greater than max {:?}",
                min, max
            )));
        }

        Ok(Self {
            min,
            max,
            is_min_inclusive,
            is_max_inclusive,
        })
    }

    /// Creates the half-open range `[min, max)`, the shape used by partition key ranges.
    pub fn half_open(min: K, max: K) -> Result<Self> {
        Self::new(min, max, true, false)
    }
}

impl<K> Range<K> {
    /// Creates a range from bounds the caller already knows to be ordered.
    pub(crate) const fn from_ordered_bounds(
        min: K,
        max: K,
        is_min_inclusive: bool,
        is_max_inclusive: bool,
    ) -> Self {
        Self {
            min,
            max,
            is_min_inclusive,
            is_max_inclusive,
        }
    }

    pub fn min(&self) -> &K {
        &self.min
    }

    pub fn max(&self) -> &K {
        &self.max
    }

    pub fn is_min_inclusive(&self) -> bool {
        self.is_min_inclusive
    }

    pub fn is_max_inclusive(&self) -> bool {
        self.is_max_inclusive
    }
}

impl<K: Ord> Range<K> {
    /// Indicates if the range contains no keys.
    pub fn is_empty(&self) -> bool {
        self.min == self.max && !(self.is_min_inclusive && self.is_max_inclusive)
    }

    /// Indicates if `key` falls within the range.
    pub fn contains(&self, key: &K) -> bool {
        let above_min = match key.cmp(&self.min) {
            Ordering::Greater => true,
            Ordering::Equal => self.is_min_inclusive,
            Ordering::Less => false,
        };
        let below_max = match key.cmp(&self.max) {
            Ordering::Less => true,
            Ordering::Equal => self.is_max_inclusive,
            Ordering::Greater => false,
        };
        above_min && below_max
    }

    /// Indicates if the two ranges share at least one key.
    pub fn overlaps(&self, other: &Range<K>) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }

        ends_after_start(self, other) && ends_after_start(other, self)
    }

    /// Indicates if every key of `other` also falls within this range.
    pub fn contains_range(&self, other: &Range<K>) -> bool {
        if other.is_empty() {
            return true;
        }

        let min_ok = match self.min.cmp(&other.min) {
            Ordering::Less => true,
            Ordering::Equal => self.is_min_inclusive || !other.is_min_inclusive,
            Ordering::Greater => false,
        };
        let max_ok = match self.max.cmp(&other.max) {
            Ordering::Greater => true,
            Ordering::Equal => self.is_max_inclusive || !other.is_max_inclusive,
            Ordering::Less => false,
        };
        min_ok && max_ok
    }
}

impl<K: Ord + Clone> Range<K> {
    /// Computes the keys shared by both ranges, or `None` if they do not overlap.
    pub fn intersection(&self, other: &Range<K>) -> Option<Range<K>> {
        if !self.overlaps(other) {
            return None;
        }

        let (min, is_min_inclusive) = match self.min.cmp(&other.min) {
            Ordering::Greater => (self.min.clone(), self.is_min_inclusive),
            Ordering::Less => (other.min.clone(), other.is_min_inclusive),
            Ordering::Equal => (
                self.min.clone(),
                self.is_min_inclusive && other.is_min_inclusive,
            ),
        };
        let (max, is_max_inclusive) = match self.max.cmp(&other.max) {
            Ordering::Less => (self.max.clone(), self.is_max_inclusive),
            Ordering::Greater => (other.max.clone(), other.is_max_inclusive),
            Ordering::Equal => (
                self.max.clone(),
                self.is_max_inclusive && other.is_max_inclusive,
            ),
        };

        Some(Range {
            min,
            max,
            is_min_inclusive,
            is_max_inclusive,
        })
    }
}

/// Checks that `left` does not end before `right` begins.
fn ends_after_start<K: Ord>(left: &Range<K>, right: &Range<K>) -> bool {
    match left.max.cmp(&right.min) {
        Ordering::Greater => true,
        Ordering::Equal => left.is_max_inclusive && right.is_min_inclusive,
        Ordering::Less => false,
    }
}

impl<K: fmt::Display> fmt::Display for Range<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{},{}{}",
            if self.is_min_inclusive { '[' } else { '(' },
            self.min,
            self.max,
            if self.is_max_inclusive { ']' } else { ')' }
        )
    }
}
