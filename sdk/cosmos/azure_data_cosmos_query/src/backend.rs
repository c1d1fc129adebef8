// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! The interface between the query engine and the service that stores the collection.
//!
//! The engine never talks to the network itself. An SDK integrates the engine by implementing [`QueryBackend`]
//! on top of its transport, which owns authentication, retries, throttling and timeouts.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    models::{PartitionKeyRange, PartitionedQueryExecutionInfo},
    PartitionKey, Query, Range, Result,
};

/// Identifies which part of the collection a page request is scoped to.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedTarget {
    /// Every partition key range overlapping this effective partition key range.
    Range(Range<String>),

    /// A single logical partition.
    PartitionKey(PartitionKey),

    /// A single partition key range, by ID.
    PartitionKeyRangeId(String),
}

/// A request for one page of a query's results, scoped to a [`FeedTarget`].
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub query: Query,
    pub target: FeedTarget,

    /// The backend cursor returned by the previous page for this target, or `None` to start at the beginning.
    pub continuation: Option<String>,

    /// The maximum number of items the backend should return.
    pub max_item_count: usize,
}

/// One page of results returned by the backend.
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    pub items: Vec<Value>,

    /// The cursor for the next page, or `None` if the target has no more results.
    pub continuation: Option<String>,
    pub request_charge: f64,
    pub activity_id: Option<String>,
}

impl PageResponse {
    pub fn new(items: Vec<Value>, continuation: Option<String>) -> Self {
        Self {
            items,
            continuation,
            ..Default::default()
        }
    }

    pub fn with_request_charge(mut self, request_charge: f64) -> Self {
        self.request_charge = request_charge;
        self
    }

    pub fn with_activity_id(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }
}

/// The backend operations the query engine depends on.
///
/// Errors are reported as [`Error::Backend`](crate::Error::Backend) with the status and sub-status the service returned.
/// A request targeting a range that no longer exists must fail with a status for which
/// [`Error::is_range_gone`](crate::Error::is_range_gone) is `true`; the engine recovers from those locally.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Gets the query plan for a cross-partition query.
    async fn query_plan(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<PartitionedQueryExecutionInfo>;

    /// Gets the collection's current, authoritative partition key ranges.
    async fn resolve_current_ranges(&self, collection: &str) -> Result<Vec<PartitionKeyRange>>;

    /// Fetches one page of results.
    async fn fetch_page(&self, collection: &str, request: PageRequest) -> Result<PageResponse>;
}
