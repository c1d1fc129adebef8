// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Wraps the continuation of a TOP query with the number of results the query may still return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TopContinuationToken {
    top: u64,
    source_token: String,
}

impl TopContinuationToken {
    pub fn new(top: u64, source_token: impl Into<String>) -> Self {
        Self {
            top,
            source_token: source_token.into(),
        }
    }

    /// The number of results still to be returned.
    pub fn top(&self) -> u64 {
        self.top
    }

    /// The continuation of the wrapped query.
    pub fn source_token(&self) -> &str {
        &self.source_token
    }

    pub fn try_parse(input: &str) -> Option<Self> {
        serde_json::from_str(input).ok()
    }
}

impl fmt::Display for TopContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for TopContinuationToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s).ok_or_else(|| {
            Error::InvalidContinuationToken(format!("not a TOP continuation token: {s}"))
        })
    }
}
