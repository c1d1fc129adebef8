// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Range;

/// The placeholder the backend leaves in rewritten ORDER BY queries for a resume filter.
const ORDER_BY_FILTER_PLACEHOLDER: &str = "{documentdb-formattableorderbyquery-filter}";

/// The direction of a single ORDER BY clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Per-query execution details produced by the backend's query planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfo {
    /// One entry per ORDER BY clause, in clause order.
    #[serde(default)]
    pub order_by: Vec<SortOrder>,

    #[serde(default)]
    pub order_by_expressions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,

    /// The query to send to each partition, if the planner rewrote it.
    #[serde(default)]
    pub rewritten_query: String,

    /// Planner fields this engine does not act on.
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

impl QueryInfo {
    /// Indicates if the query requires an ordered cross-partition merge.
    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Gets the query text to send to each partition.
    ///
    /// Returns the original query if the planner did not rewrite it.
    pub fn partition_query_text(&self, original: &str) -> String {
        if self.rewritten_query.is_empty() {
            original.to_string()
        } else {
            self.rewritten_query
                .replace(ORDER_BY_FILTER_PLACEHOLDER, "true")
        }
    }
}

/// The query plan returned by the backend: what to run, and which effective partition key ranges it can touch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionedQueryExecutionInfo {
    pub query_info: QueryInfo,

    /// The effective partition key ranges the query's filters can match. Empty means all ranges.
    #[serde(default)]
    pub query_ranges: Vec<Range<String>>,
}
