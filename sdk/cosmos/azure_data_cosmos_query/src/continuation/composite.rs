// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{query::FeedRangeTarget, Error, Range};

/// The resumption state of a single partition key range: an opaque backend cursor plus the range it applies to.
///
/// Serializes to a single-line JSON object:
///
/// ```json
/// {"token":"<backend cursor>","range":{"min":"","max":"80","isMinInclusive":true,"isMaxInclusive":false}}
/// ```
///
/// A `null` token means "from the start of the range".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeContinuationToken {
    // Required, but may be `null`.
    #[serde(deserialize_with = "Option::deserialize")]
    token: Option<String>,
    range: Range<String>,
}

impl CompositeContinuationToken {
    pub fn new(token: Option<String>, range: Range<String>) -> Self {
        Self { token, range }
    }

    /// Gets the backend cursor, or `None` to start from the beginning of the range.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn range(&self) -> &Range<String> {
        &self.range
    }

    /// Creates a copy of this token that applies the same backend cursor to a different range.
    pub fn with_range(&self, range: Range<String>) -> Self {
        Self {
            token: self.token.clone(),
            range,
        }
    }

    /// Creates the token that follows this one on the same range.
    pub(crate) fn with_cursor(&self, token: Option<String>) -> Self {
        Self {
            token,
            range: self.range.clone(),
        }
    }

    /// Parses a token from its JSON form, returning `None` on any malformed or foreign-shaped input.
    pub fn try_parse(input: &str) -> Option<Self> {
        serde_json::from_str(input).ok()
    }
}

impl fmt::Display for CompositeContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for CompositeContinuationToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s).ok_or_else(|| {
            Error::InvalidContinuationToken(format!("not a composite continuation token: {s}"))
        })
    }
}

impl FeedRangeTarget for CompositeContinuationToken {
    fn feed_range(&self) -> &Range<String> {
        &self.range
    }

    fn with_feed_range(&self, range: Range<String>) -> Self {
        self.with_range(range)
    }
}
