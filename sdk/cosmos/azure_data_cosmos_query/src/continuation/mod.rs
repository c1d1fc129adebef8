// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Continuation tokens for resuming cross-partition queries.
//!
//! The continuation surfaced to callers is a single-line JSON array with one entry per partition key range that
//! still has results: [`CompositeContinuationToken`]s for unordered queries, [`OrderByContinuationToken`]s for
//! ORDER BY queries. TOP queries wrap that array in a [`TopContinuationToken`].

mod composite;
mod order_by;
mod top;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use composite::CompositeContinuationToken;
pub use order_by::OrderByContinuationToken;
pub use top::TopContinuationToken;

use crate::{Error, Range, Result};

/// The per-range tokens of a cross-partition continuation.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateContinuation {
    Composite(Vec<CompositeContinuationToken>),
    OrderBy(Vec<OrderByContinuationToken>),
}

/// A cross-partition continuation, as supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedContinuation {
    /// The remaining TOP limit, if the continuation was produced by a TOP query.
    pub top: Option<u64>,
    pub tokens: AggregateContinuation,
}

// Accept a bare token object as a one-element array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn parse_tokens<T: DeserializeOwned>(input: &str) -> Option<Vec<T>> {
    match serde_json::from_str::<OneOrMany<T>>(input).ok()? {
        OneOrMany::Many(tokens) if tokens.is_empty() => None,
        OneOrMany::Many(tokens) => Some(tokens),
        OneOrMany::One(token) => Some(vec![token]),
    }
}

impl ParsedContinuation {
    /// Parses a caller-supplied cross-partition continuation.
    ///
    /// Fails with [`Error::InvalidContinuationToken`] if the input is not a (possibly TOP-wrapped) non-empty
    /// list of composite or ORDER BY tokens, or if two of its tokens cover overlapping ranges.
    pub fn parse(input: &str) -> Result<Self> {
        let (top, inner) = match TopContinuationToken::try_parse(input) {
            Some(wrapper) => (Some(wrapper.top()), wrapper.source_token().to_string()),
            None => (None, input.to_string()),
        };

        let tokens = if let Some(tokens) = parse_tokens(&inner) {
            AggregateContinuation::OrderBy(tokens)
        } else if let Some(tokens) = parse_tokens(&inner) {
            AggregateContinuation::Composite(tokens)
        } else {
            return Err(Error::InvalidContinuationToken(format!(
                "unrecognized continuation: {input}"
            )));
        };

        match &tokens {
            AggregateContinuation::Composite(tokens) => {
                check_disjoint(tokens.iter().map(|t| t.range()))?
            }
            AggregateContinuation::OrderBy(tokens) => {
                check_disjoint(tokens.iter().map(|t| t.composite_token().range()))?
            }
        }

        Ok(Self { top, tokens })
    }

    /// Extracts the composite tokens of an unordered query's continuation.
    pub(crate) fn into_composite(self) -> Result<Vec<CompositeContinuationToken>> {
        match self.tokens {
            AggregateContinuation::Composite(tokens) => Ok(tokens),
            AggregateContinuation::OrderBy(_) => Err(Error::InvalidContinuationToken(
                "an ORDER BY continuation cannot resume an unordered query".into(),
            )),
        }
    }

    /// Extracts the ORDER BY tokens of an ORDER BY query's continuation, checking each carries one value per clause.
    pub(crate) fn into_order_by(self, clauses: usize) -> Result<Vec<OrderByContinuationToken>> {
        let tokens = match self.tokens {
            AggregateContinuation::OrderBy(tokens) => tokens,
            AggregateContinuation::Composite(_) => {
                return Err(Error::InvalidContinuationToken(
                    "an unordered continuation cannot resume an ORDER BY query".into(),
                ))
            }
        };

        if let Some(token) = tokens.iter().find(|t| t.order_by_items().len() != clauses) {
            return Err(Error::InvalidContinuationToken(format!(
                "continuation has {} ORDER BY values but the query has {} ORDER BY clauses",
                token.order_by_items().len(),
                clauses
            )));
        }

        Ok(tokens)
    }
}

/// Checks that no key is covered by more than one token's range.
fn check_disjoint<'a>(ranges: impl Iterator<Item = &'a Range<String>>) -> Result<()> {
    let mut ranges: Vec<&Range<String>> = ranges.collect();
    ranges.sort_by(|a, b| a.min().cmp(b.min()));
    for pair in ranges.windows(2) {
        if pair[0].overlaps(pair[1]) {
            return Err(Error::InvalidContinuationToken(format!(
                "continuation ranges {} and {} overlap",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}

/// Serializes per-range tokens into the single-line JSON array surfaced to callers.
pub(crate) fn serialize_aggregate<T: Serialize>(tokens: &[T]) -> Result<String> {
    Ok(serde_json::to_string(tokens)?)
}
