// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{fmt, marker::PhantomData, sync::Arc};

use futures::Stream;
use serde::de::DeserializeOwned;
use tracing::Instrument;

use crate::{
    backend::{FeedTarget, PageRequest, QueryBackend},
    continuation::{CompositeContinuationToken, ParsedContinuation, TopContinuationToken},
    models::PartitionedQueryExecutionInfo,
    query::{
        order_by::OrderByQueryExecutor, parallel::ParallelQueryExecutor,
        split_merge::resolve_current, Batch, FetchMetrics, QuerySettings,
    },
    Error, FeedPage, FeedPager, Query, QueryEngineOptions, QueryOptions, Range, Result,
};

/// The entry point for executing queries against one collection.
///
/// The factory decides how each query is executed:
///
/// * Queries scoped to one partition, by [`QueryOptions::partition_key`] or [`QueryOptions::partition_key_range_id`],
///   are sent as-is. Their continuation is the backend's own.
/// * Other queries fan out to every partition key range the query plan targets, and require
///   [`QueryOptions::enable_cross_partition_query`]. ORDER BY queries are merged in order, others in no particular
///   order.
///
/// # Examples
///
/// ```rust,no_run
/// # async fn example(backend: std::sync::Arc<dyn azure_data_cosmos_query::backend::QueryBackend>) -> azure_data_cosmos_query::Result<()> {
/// use azure_data_cosmos_query::{QueryExecutionContextFactory, QueryOptions};
/// use futures::TryStreamExt;
///
/// let factory = QueryExecutionContextFactory::new(backend, "dbs/db1/colls/items", None);
/// let options = QueryOptions::builder()
///     .with_cross_partition_query(true)
///     .build();
/// let mut pages = factory.execute_query::<serde_json::Value>("SELECT * FROM c ORDER BY c.rank", Some(options))?;
/// while let Some(page) = pages.try_next().await? {
///     println!("{} items, resume with {:?}", page.items().len(), page.continuation());
/// }
/// # Ok(())
/// # }
/// ```
pub struct QueryExecutionContextFactory {
    backend: Arc<dyn QueryBackend>,
    collection: String,
    options: QueryEngineOptions,
}

impl QueryExecutionContextFactory {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        collection: impl Into<String>,
        options: Option<QueryEngineOptions>,
    ) -> Self {
        Self {
            backend,
            collection: collection.into(),
            options: options.unwrap_or_default(),
        }
    }

    /// Executes a query, returning a lazy sequence of pages.
    ///
    /// No backend request is made until the first page is pulled.
    /// Locally detectable problems are reported immediately: a cross-partition query without
    /// [`QueryOptions::enable_cross_partition_query`] fails with [`Error::ClientValidation`], and a malformed
    /// continuation with [`Error::InvalidContinuationToken`]. A continuation that is well-formed but does not match
    /// the query fails on the first pull instead.
    ///
    /// The first page is always produced, even if the query has no results.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = %self.collection), err)]
    pub fn execute_query<T: DeserializeOwned + Send + 'static>(
        &self,
        query: impl Into<Query>,
        options: Option<QueryOptions>,
    ) -> Result<FeedPager<T>> {
        let query = query.into();
        let options = options.unwrap_or_default();

        let strategy = match (&options.partition_key, &options.partition_key_range_id) {
            (Some(partition_key), _) => Strategy::SinglePartition {
                target: FeedTarget::PartitionKey(partition_key.clone()),
                continuation: options.continuation.clone(),
            },
            (None, Some(id)) => Strategy::SinglePartition {
                target: FeedTarget::PartitionKeyRangeId(id.clone()),
                continuation: options.continuation.clone(),
            },
            (None, None) => {
                if !options.enable_cross_partition_query {
                    return Err(Error::ClientValidation(
                        "cross partition query is required but disabled; set enable_cross_partition_query, or scope the query with a partition key".into(),
                    ));
                }
                let continuation = options
                    .continuation
                    .as_deref()
                    .map(ParsedContinuation::parse)
                    .transpose()?;
                Strategy::CrossPartition {
                    continuation,
                    max_degree_of_parallelism: options.degree_of_parallelism(&self.options),
                    max_buffered_item_count: options.buffered_item_count(&self.options),
                }
            }
        };

        let engine = QueryEngine::<T> {
            backend: self.backend.clone(),
            collection: self.collection.clone(),
            query,
            page_size: options.page_size(&self.options),
            phantom: PhantomData,
        };
        Ok(Box::pin(engine.into_stream(strategy)))
    }
}

enum Strategy {
    SinglePartition {
        target: FeedTarget,
        continuation: Option<String>,
    },
    CrossPartition {
        continuation: Option<ParsedContinuation>,
        max_degree_of_parallelism: usize,
        max_buffered_item_count: usize,
    },
}

/// Sends a query scoped to a single partition, passing the backend's continuation through.
struct SinglePartitionExecutor {
    settings: Arc<QuerySettings>,
    target: FeedTarget,
    continuation: Option<String>,
    started: bool,
}

impl SinglePartitionExecutor {
    async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.started && self.continuation.is_none() {
            return Ok(None);
        }

        let request = PageRequest {
            query: self.settings.query.clone(),
            target: self.target.clone(),
            continuation: self.continuation.clone(),
            max_item_count: self.settings.page_size,
        };
        let response = self
            .settings
            .backend
            .fetch_page(&self.settings.collection, request)
            .await?;

        self.started = true;
        self.continuation = response.continuation;
        let mut metrics = FetchMetrics::default();
        metrics.record(response.request_charge, response.activity_id.as_deref());
        Ok(Some(Batch {
            items: response.items,
            metrics,
            error: None,
        }))
    }
}

enum Executor {
    SinglePartition(SinglePartitionExecutor),
    Parallel(ParallelQueryExecutor),
    OrderBy(OrderByQueryExecutor),
}

impl Executor {
    /// Produces the next batch. `remaining` is the number of results a TOP clause still allows.
    async fn next_batch(&mut self, page_size: usize, remaining: Option<usize>) -> Result<Option<Batch>> {
        match self {
            Executor::SinglePartition(executor) => executor.next_batch().await,
            Executor::Parallel(executor) => {
                executor.next_batch(remaining.unwrap_or(usize::MAX)).await
            }
            Executor::OrderBy(executor) => {
                let limit = remaining.map_or(page_size, |r| r.min(page_size));
                executor.next_batch(limit).await
            }
        }
    }

    fn continuation(&self) -> Result<Option<String>> {
        match self {
            Executor::SinglePartition(executor) => Ok(executor.continuation.clone()),
            Executor::Parallel(executor) => executor.continuation(),
            Executor::OrderBy(executor) => executor.continuation(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Executor::SinglePartition(_) => "SinglePartition",
            Executor::Parallel(_) => "Parallel",
            Executor::OrderBy(_) => "OrderBy",
        }
    }
}

struct Pipeline {
    executor: Executor,

    // The number of results a TOP clause still allows.
    top: Option<u64>,
    pages: usize,
    pending_error: Option<Error>,
}

enum QueryState {
    Initial(Strategy),
    Running(Box<Pipeline>),
    Done,
}

impl fmt::Debug for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryState::Initial(_) => write!(f, "Initial"),
            QueryState::Running(pipeline) => write!(f, "Running({})", pipeline.executor.name()),
            QueryState::Done => write!(f, "Done"),
        }
    }
}

struct QueryEngine<T> {
    backend: Arc<dyn QueryBackend>,
    collection: String,
    query: Query,
    page_size: usize,
    phantom: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Send + 'static> QueryEngine<T> {
    fn into_stream(self, strategy: Strategy) -> impl Stream<Item = Result<FeedPage<T>>> + Send {
        futures::stream::unfold(
            (self, QueryState::Initial(strategy)),
            |(this, state)| async move {
                let span = tracing::debug_span!("QueryEngine::into_stream::next", ?state);
                let next = async {
                    match state {
                        QueryState::Initial(strategy) => match this.start(strategy).await {
                            Ok(pipeline) => this.next_page(Box::new(pipeline)).await,
                            Err(e) => Some((Err(e), QueryState::Done)),
                        },
                        QueryState::Running(pipeline) => this.next_page(pipeline).await,
                        QueryState::Done => None,
                    }
                }
                .instrument(span)
                .await;
                next.map(|(page, state)| (page, (this, state)))
            },
        )
    }

    fn settings(&self, query: Query) -> Arc<QuerySettings> {
        Arc::new(QuerySettings {
            backend: self.backend.clone(),
            collection: self.collection.clone(),
            query,
            page_size: self.page_size,
        })
    }

    #[tracing::instrument(level = "debug", skip_all, err)]
    async fn start(&self, strategy: Strategy) -> Result<Pipeline> {
        let (continuation, max_degree_of_parallelism, max_buffered_item_count) = match strategy {
            Strategy::SinglePartition {
                target,
                continuation,
            } => {
                tracing::debug!(?target, "executing single partition query");
                return Ok(Pipeline {
                    executor: Executor::SinglePartition(SinglePartitionExecutor {
                        settings: self.settings(self.query.clone()),
                        target,
                        continuation,
                        started: false,
                    }),
                    top: None,
                    pages: 0,
                    pending_error: None,
                });
            }
            Strategy::CrossPartition {
                continuation,
                max_degree_of_parallelism,
                max_buffered_item_count,
            } => (
                continuation,
                max_degree_of_parallelism,
                max_buffered_item_count,
            ),
        };

        let plan = self.backend.query_plan(&self.collection, &self.query).await?;
        let query_info = &plan.query_info;
        let settings = self.settings(
            self.query
                .with_text(query_info.partition_query_text(self.query.text())),
        );

        let top = match (query_info.top, continuation.as_ref().map(|c| c.top)) {
            (None, None | Some(None)) => None,
            (Some(top), None) => Some(top),
            (Some(_), Some(Some(remaining))) => Some(remaining),
            (Some(_), Some(None)) | (None, Some(Some(_))) => {
                return Err(Error::InvalidContinuationToken(
                    "continuation does not match the query's TOP clause".into(),
                ))
            }
        };

        let executor = if top == Some(0) {
            tracing::debug!("TOP 0 query returns no results");
            Executor::Parallel(ParallelQueryExecutor::new(
                settings,
                Vec::new(),
                max_degree_of_parallelism,
                max_buffered_item_count,
            ))
        } else if query_info.has_order_by() {
            let orders = query_info.order_by.clone();
            tracing::debug!(?orders, resumed = continuation.is_some(), "executing ORDER BY query");
            match continuation {
                Some(continuation) => {
                    let tokens = continuation.into_order_by(orders.len())?;
                    let targets = resolve_current(&settings, &tokens).await?;
                    Executor::OrderBy(OrderByQueryExecutor::resume(
                        settings,
                        orders,
                        targets,
                        max_degree_of_parallelism,
                    ))
                }
                None => {
                    let tokens = self.initial_tokens(&plan).await?;
                    Executor::OrderBy(OrderByQueryExecutor::start(
                        settings,
                        orders,
                        tokens,
                        max_degree_of_parallelism,
                    ))
                }
            }
        } else {
            tracing::debug!(resumed = continuation.is_some(), "executing unordered query");
            let tokens = match continuation {
                Some(continuation) => {
                    let tokens = continuation.into_composite()?;
                    resolve_current(&settings, &tokens).await?
                }
                None => self.initial_tokens(&plan).await?,
            };
            Executor::Parallel(ParallelQueryExecutor::new(
                settings,
                tokens,
                max_degree_of_parallelism,
                max_buffered_item_count,
            ))
        };

        Ok(Pipeline {
            executor,
            top,
            pages: 0,
            pending_error: None,
        })
    }

    /// Targets every current partition key range the query plan can match, from its start.
    async fn initial_tokens(
        &self,
        plan: &PartitionedQueryExecutionInfo,
    ) -> Result<Vec<CompositeContinuationToken>> {
        let pkranges = self
            .backend
            .resolve_current_ranges(&self.collection)
            .await?;
        let mut tokens = Vec::with_capacity(pkranges.len());
        for pkrange in &pkranges {
            let range: Range<String> = pkrange.to_range()?;
            if plan.query_ranges.is_empty() || plan.query_ranges.iter().any(|q| q.overlaps(&range))
            {
                tokens.push(CompositeContinuationToken::new(None, range));
            }
        }
        tracing::debug!(
            ranges = tokens.len(),
            total = pkranges.len(),
            "resolved target ranges"
        );
        Ok(tokens)
    }

    async fn next_page(
        &self,
        mut pipeline: Box<Pipeline>,
    ) -> Option<(Result<FeedPage<T>>, QueryState)> {
        if let Some(err) = pipeline.pending_error.take() {
            return Some((Err(err), QueryState::Done));
        }

        let remaining = pipeline
            .top
            .map(|top| usize::try_from(top).unwrap_or(usize::MAX));
        let batch = if remaining == Some(0) {
            None
        } else {
            match pipeline
                .executor
                .next_batch(self.page_size, remaining)
                .await
            {
                Ok(batch) => batch,
                Err(e) => return Some((Err(e), QueryState::Done)),
            }
        };

        let Some(batch) = batch else {
            // The first page is produced even when there are no results.
            return (pipeline.pages == 0).then(|| {
                let page = FeedPage::new(Vec::new(), None, 0.0, Vec::new());
                (Ok(page), QueryState::Done)
            });
        };

        if let Some(top) = pipeline.top.as_mut() {
            *top = top.saturating_sub(batch.items.len() as u64);
        }
        let continuation = match pipeline.top {
            Some(0) => {
                tracing::debug!("TOP limit reached, remaining results are discarded");
                None
            }
            Some(top) => match pipeline.executor.continuation() {
                Ok(inner) => inner.map(|inner| TopContinuationToken::new(top, inner).to_string()),
                Err(e) => return Some((Err(e), QueryState::Done)),
            },
            None => match pipeline.executor.continuation() {
                Ok(continuation) => continuation,
                Err(e) => return Some((Err(e), QueryState::Done)),
            },
        };

        let Batch {
            items,
            metrics,
            error,
        } = batch;
        if items.is_empty()
            && continuation.is_none()
            && error.is_none()
            && metrics.request_charge == 0.0
            && pipeline.pages > 0
        {
            return None;
        }

        let page = FeedPage::new(
            items,
            continuation,
            metrics.request_charge,
            metrics.activity_ids,
        );
        let page = match page.deserialize_into::<T>() {
            Ok(page) => page,
            Err(e) => return Some((Err(e), QueryState::Done)),
        };
        tracing::debug!(
            items = page.items().len(),
            request_charge = page.request_charge(),
            has_continuation = page.continuation().is_some(),
            "produced page"
        );

        pipeline.pages += 1;
        pipeline.pending_error = error;
        let state = if page.continuation().is_none() && pipeline.pending_error.is_none() {
            QueryState::Done
        } else {
            QueryState::Running(pipeline)
        };
        Some((Ok(page), state))
    }
}
