// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Cross-partition query execution.

mod context;
mod factory;
mod order_by;
mod parallel;
mod partition_queue;
mod split_merge;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{backend::QueryBackend, Error};

pub use factory::QueryExecutionContextFactory;
pub use split_merge::{FeedRangeTarget, RangeResolution, SplitMergeHandler};

/// A SQL query, with optional parameters.
///
/// Serializes to the query body accepted by the backend:
///
/// ```json
/// {"query":"SELECT * FROM c WHERE c.id = @id","parameters":[{"name":"@id","value":"42"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "query")]
    text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<QueryParameter>,
}

impl Query {
    /// Gets the query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[QueryParameter] {
        &self.parameters
    }

    /// Adds a named parameter to the query.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use azure_data_cosmos_query::Query;
    ///
    /// let query = Query::from("SELECT * FROM c WHERE c.status = @status")
    ///     .with_parameter("@status", "active");
    /// assert_eq!(1, query.parameters().len());
    /// ```
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(QueryParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Creates a copy of this query with different text and the same parameters.
    pub(crate) fn with_text(&self, text: String) -> Self {
        Self {
            text,
            parameters: self.parameters.clone(),
        }
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self {
            text,
            parameters: Vec::new(),
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        text.to_string().into()
    }
}

/// A named query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: Value,
}

/// Settings shared by every partition of one query execution.
pub(crate) struct QuerySettings {
    pub backend: Arc<dyn QueryBackend>,
    pub collection: String,

    /// The query sent to each partition, after any rewrite by the query plan.
    pub query: Query,
    pub page_size: usize,
}

/// The backend cost of producing part of a page.
#[derive(Debug, Default)]
pub(crate) struct FetchMetrics {
    pub request_charge: f64,
    pub activity_ids: Vec<String>,
}

impl FetchMetrics {
    pub fn record(&mut self, request_charge: f64, activity_id: Option<&str>) {
        self.request_charge += request_charge;
        if let Some(id) = activity_id {
            self.activity_ids.push(id.to_string());
        }
    }

    pub fn absorb(&mut self, other: FetchMetrics) {
        self.request_charge += other.request_charge;
        self.activity_ids.extend(other.activity_ids);
    }
}

/// The items an executor produced for one output page.
///
/// If `error` is set, the executor failed after gathering `items`; the items are surfaced first and the error on
/// the following pull.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    pub items: Vec<Value>,
    pub metrics: FetchMetrics,
    pub error: Option<Error>,
}
