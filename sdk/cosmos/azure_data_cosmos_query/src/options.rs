// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use crate::PartitionKey;

/// The page size used when a query does not request one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// The number of concurrent partition fetches used when a query does not request a specific degree of parallelism.
pub const DEFAULT_MAX_DEGREE_OF_PARALLELISM: usize = 16;

/// The number of items the unordered executor may prefetch ahead of the consumer when a query does not set a bound.
pub const DEFAULT_MAX_BUFFERED_ITEM_COUNT: usize = 1000;

/// Options fixed when constructing a [`QueryExecutionContextFactory`](crate::QueryExecutionContextFactory).
///
/// These supply the defaults used whenever a query's [`QueryOptions`] leave a setting unspecified.
#[derive(Clone, Debug)]
pub struct QueryEngineOptions {
    pub default_page_size: usize,
    pub default_max_degree_of_parallelism: usize,
    pub default_max_buffered_item_count: usize,
}

impl Default for QueryEngineOptions {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            default_max_degree_of_parallelism: DEFAULT_MAX_DEGREE_OF_PARALLELISM,
            default_max_buffered_item_count: DEFAULT_MAX_BUFFERED_ITEM_COUNT,
        }
    }
}

impl QueryEngineOptions {
    /// Creates a new [`QueryEngineOptionsBuilder`] that can be used to construct a [`QueryEngineOptions`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// let options = azure_data_cosmos_query::QueryEngineOptions::builder()
    ///     .with_default_page_size(50)
    ///     .build();
    /// assert_eq!(50, options.default_page_size);
    /// ```
    pub fn builder() -> QueryEngineOptionsBuilder {
        QueryEngineOptionsBuilder::default()
    }
}

/// Builder used to construct a [`QueryEngineOptions`].
///
/// Obtain a [`QueryEngineOptionsBuilder`] by calling [`QueryEngineOptions::builder()`]
#[derive(Default)]
pub struct QueryEngineOptionsBuilder(QueryEngineOptions);

impl QueryEngineOptionsBuilder {
    /// Sets the page size used when a query does not request one. Zero is treated as one.
    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.0.default_page_size = page_size.max(1);
        self
    }

    /// Sets the concurrency used when a query does not request a specific degree of parallelism. Zero is treated as one.
    pub fn with_default_max_degree_of_parallelism(mut self, degree: usize) -> Self {
        self.0.default_max_degree_of_parallelism = degree.max(1);
        self
    }

    /// Sets the prefetch bound used when a query does not set one.
    pub fn with_default_max_buffered_item_count(mut self, count: usize) -> Self {
        self.0.default_max_buffered_item_count = count;
        self
    }

    /// Builds a [`QueryEngineOptions`] from the builder.
    ///
    /// This does not consume the builder, and can be called multiple times.
    pub fn build(&self) -> QueryEngineOptions {
        self.0.clone()
    }
}

/// Options to be passed to [`QueryExecutionContextFactory::execute_query()`](crate::QueryExecutionContextFactory::execute_query()).
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// The maximum number of items per page. Absent, zero or negative uses the engine default.
    pub max_item_count: Option<i32>,

    /// Allows the query to fan out to every partition. Required unless the query is scoped to one partition.
    pub enable_cross_partition_query: bool,

    /// Scopes the query to a single logical partition.
    pub partition_key: Option<PartitionKey>,

    /// Scopes the query to a single partition key range, by ID.
    pub partition_key_range_id: Option<String>,

    /// The number of concurrent partition fetches.
    /// Zero fetches sequentially, a negative value uses the engine default and a positive value is an explicit cap.
    pub max_degree_of_parallelism: Option<i32>,

    /// The number of items the unordered executor may prefetch ahead of the consumer.
    /// Absent, zero or negative uses the engine default.
    pub max_buffered_item_count: Option<i32>,

    /// A continuation token returned by a previous page of the same query, to resume from.
    pub continuation: Option<String>,
}

impl QueryOptions {
    /// Creates a new [`QueryOptionsBuilder`] that can be used to construct a [`QueryOptions`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// let options = azure_data_cosmos_query::QueryOptions::builder()
    ///     .with_cross_partition_query(true)
    ///     .with_max_item_count(10)
    ///     .build();
    /// assert!(options.enable_cross_partition_query);
    /// ```
    pub fn builder() -> QueryOptionsBuilder {
        QueryOptionsBuilder::default()
    }

    pub(crate) fn page_size(&self, engine: &QueryEngineOptions) -> usize {
        match self.max_item_count {
            Some(count) if count > 0 => count as usize,
            _ => engine.default_page_size.max(1),
        }
    }

    pub(crate) fn degree_of_parallelism(&self, engine: &QueryEngineOptions) -> usize {
        match self.max_degree_of_parallelism {
            Some(0) => 1,
            Some(degree) if degree > 0 => degree as usize,
            _ => engine.default_max_degree_of_parallelism.max(1),
        }
    }

    pub(crate) fn buffered_item_count(&self, engine: &QueryEngineOptions) -> usize {
        match self.max_buffered_item_count {
            Some(count) if count > 0 => count as usize,
            _ => engine.default_max_buffered_item_count,
        }
    }
}

/// Builder used to construct a [`QueryOptions`].
///
/// Obtain a [`QueryOptionsBuilder`] by calling [`QueryOptions::builder()`]
#[derive(Default)]
pub struct QueryOptionsBuilder(QueryOptions);

impl QueryOptionsBuilder {
    pub fn with_max_item_count(mut self, count: i32) -> Self {
        self.0.max_item_count = Some(count);
        self
    }

    pub fn with_cross_partition_query(mut self, enabled: bool) -> Self {
        self.0.enable_cross_partition_query = enabled;
        self
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<PartitionKey>) -> Self {
        self.0.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_partition_key_range_id(mut self, id: impl Into<String>) -> Self {
        self.0.partition_key_range_id = Some(id.into());
        self
    }

    pub fn with_max_degree_of_parallelism(mut self, degree: i32) -> Self {
        self.0.max_degree_of_parallelism = Some(degree);
        self
    }

    pub fn with_max_buffered_item_count(mut self, count: i32) -> Self {
        self.0.max_buffered_item_count = Some(count);
        self
    }

    pub fn with_continuation(mut self, continuation: impl Into<String>) -> Self {
        self.0.continuation = Some(continuation.into());
        self
    }

    /// Builds a [`QueryOptions`] from the builder.
    ///
    /// This does not consume the builder, and can be called multiple times.
    pub fn build(&self) -> QueryOptions {
        self.0.clone()
    }
}
