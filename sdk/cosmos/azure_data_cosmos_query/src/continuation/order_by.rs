// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    continuation::CompositeContinuationToken, models::OrderByItem, query::FeedRangeTarget, Error,
    Range,
};

/// The resumption state of a single partition key range under an ORDER BY query.
///
/// In addition to the range's backend cursor, records the position of the last result merged from the range,
/// as its ORDER BY values and resource ID. When `inclusive` is `true` the result at that exact position is
/// returned again on resume, otherwise it is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderByContinuationToken {
    composite_token: CompositeContinuationToken,
    order_by_items: Vec<OrderByItem>,
    rid: String,
    inclusive: bool,
}

impl OrderByContinuationToken {
    pub fn new(
        composite_token: CompositeContinuationToken,
        order_by_items: Vec<OrderByItem>,
        rid: impl Into<String>,
        inclusive: bool,
    ) -> Self {
        Self {
            composite_token,
            order_by_items,
            rid: rid.into(),
            inclusive,
        }
    }

    pub fn composite_token(&self) -> &CompositeContinuationToken {
        &self.composite_token
    }

    /// The ORDER BY values of the boundary result, one per clause.
    pub fn order_by_items(&self) -> &[OrderByItem] {
        &self.order_by_items
    }

    /// The resource ID of the boundary result.
    pub fn rid(&self) -> &str {
        &self.rid
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }

    /// Parses a token from its JSON form, returning `None` on any malformed or foreign-shaped input.
    pub fn try_parse(input: &str) -> Option<Self> {
        serde_json::from_str(input).ok()
    }
}

impl fmt::Display for OrderByContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for OrderByContinuationToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s).ok_or_else(|| {
            Error::InvalidContinuationToken(format!("not an ORDER BY continuation token: {s}"))
        })
    }
}

impl FeedRangeTarget for OrderByContinuationToken {
    fn feed_range(&self) -> &Range<String> {
        self.composite_token.range()
    }

    fn with_feed_range(&self, range: Range<String>) -> Self {
        Self {
            composite_token: self.composite_token.with_range(range),
            order_by_items: self.order_by_items.clone(),
            rid: self.rid.clone(),
            inclusive: self.inclusive,
        }
    }
}
