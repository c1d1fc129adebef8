// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::collections::VecDeque;

use futures::{stream::FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::{
    continuation::CompositeContinuationToken,
    models::OrderByResult,
    query::{partition_queue::FeedRangePartitionQueue, FetchMetrics},
    Error, Range, Result,
};

/// A result type a partition context can buffer.
pub(crate) trait PartitionItem: Sized + Send + Sync + 'static {
    fn from_value(value: Value) -> Result<Self>;
}

impl PartitionItem for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl PartitionItem for OrderByResult {
    fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Drops the leading items of a resumed range that were already returned before the continuation was taken.
pub(crate) type SkipFilter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextState {
    Created,
    Fetching,
    Buffered,
    Exhausted,
    Failed,
}

/// The result of [`PartitionRangeExecutionContext::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FillOutcome {
    /// At least one item is buffered.
    Ready,
    Exhausted,

    /// The backend no longer serves this range. The context must be replaced with the range's successors.
    RangeGone,

    /// The fetch failed. The error can be retrieved with [`PartitionRangeExecutionContext::take_error`].
    Failed,
}

/// Buffers the results of a single partition key range for the merge executors.
pub(crate) struct PartitionRangeExecutionContext<T> {
    queue: FeedRangePartitionQueue,
    state: ContextState,
    buffer: VecDeque<T>,

    // The cursor that fetched the page currently in `buffer`.
    buffer_origin: Option<String>,
    skip: Option<SkipFilter<T>>,
    error: Option<Error>,
    metrics: FetchMetrics,
}

impl<T: PartitionItem> PartitionRangeExecutionContext<T> {
    pub fn new(queue: FeedRangePartitionQueue) -> Self {
        Self {
            queue,
            state: ContextState::Created,
            buffer: VecDeque::new(),
            buffer_origin: None,
            skip: None,
            error: None,
            metrics: FetchMetrics::default(),
        }
    }

    /// Sets a filter for items to discard from the front of the range.
    ///
    /// Items are discarded until the first one the filter rejects, after which the filter is removed.
    pub fn with_skip(mut self, skip: SkipFilter<T>) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn range(&self) -> &Range<String> {
        self.queue.range()
    }

    /// Ensures an item is buffered, fetching pages from the backend until one arrives or the range ends.
    ///
    /// Pages that turn out to be empty are skipped.
    pub async fn fill(&mut self) -> FillOutcome {
        loop {
            match self.state {
                ContextState::Failed => return FillOutcome::Failed,
                ContextState::Exhausted => return FillOutcome::Exhausted,
                _ if !self.buffer.is_empty() => return FillOutcome::Ready,
                _ => {}
            }

            if self.queue.is_exhausted() {
                self.state = ContextState::Exhausted;
                return FillOutcome::Exhausted;
            }

            self.state = ContextState::Fetching;
            let origin = self.queue.continuation().map(String::from);
            let response = match self.queue.fetch_next_page().await {
                Ok(response) => response,
                Err(err) if err.is_range_gone() => {
                    tracing::debug!(range = %self.queue.range(), error = %err, "partition key range is gone");
                    self.state = ContextState::Created;
                    return FillOutcome::RangeGone;
                }
                Err(err) => {
                    self.error = Some(err);
                    self.state = ContextState::Failed;
                    return FillOutcome::Failed;
                }
            };

            self.metrics
                .record(response.request_charge, response.activity_id.as_deref());

            for value in response.items {
                match T::from_value(value) {
                    Ok(item) => self.buffer.push_back(item),
                    Err(err) => {
                        self.buffer.clear();
                        self.error = Some(err);
                        self.state = ContextState::Failed;
                        return FillOutcome::Failed;
                    }
                }
            }
            self.queue.advance(response.continuation);

            if let Some(skip) = &self.skip {
                while self.buffer.front().is_some_and(|item| skip(item)) {
                    self.buffer.pop_front();
                }
                if !self.buffer.is_empty() {
                    self.skip = None;
                }
            }

            self.buffer_origin = origin;
            self.state = ContextState::Buffered;
        }
    }

    pub fn peek(&self) -> Option<&T> {
        self.buffer.front()
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.buffer.pop_front();
        if self.buffer.is_empty() && self.queue.is_exhausted() {
            self.state = ContextState::Exhausted;
        }
        item
    }

    /// Removes up to `count` buffered items.
    pub fn drain(&mut self, count: usize) -> Vec<T> {
        let count = count.min(self.buffer.len());
        let items = self.buffer.drain(..count).collect();
        if self.buffer.is_empty() && self.queue.is_exhausted() {
            self.state = ContextState::Exhausted;
        }
        items
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == ContextState::Exhausted
            || (self.buffer.is_empty() && self.queue.is_exhausted())
    }

    /// Indicates if [`fill`](Self::fill) would have to contact the backend.
    pub fn needs_fetch(&self) -> bool {
        self.buffer.is_empty()
            && !self.queue.is_exhausted()
            && !matches!(
                self.state,
                ContextState::Failed | ContextState::Exhausted
            )
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    pub fn take_metrics(&mut self) -> FetchMetrics {
        std::mem::take(&mut self.metrics)
    }

    /// Gets the token that resumes this range from its first item not yet removed from the context.
    ///
    /// While a page is buffered, this points back at the cursor that fetched it, so a resumed query refetches the
    /// page. Callers must either remove a buffered page entirely before taking the token, or arrange to skip the
    /// removed part of it on resume.
    pub fn composite_token(&self) -> CompositeContinuationToken {
        if self.buffer.is_empty() {
            self.queue.composite_token().clone()
        } else {
            self.queue
                .composite_token()
                .with_cursor(self.buffer_origin.clone())
        }
    }
}

/// Fills several contexts concurrently, reporting the outcome for each by its index.
pub(crate) async fn fill_all<'a, T: PartitionItem>(
    contexts: impl IntoIterator<Item = (usize, &'a mut PartitionRangeExecutionContext<T>)>,
) -> Vec<(usize, FillOutcome)> {
    contexts
        .into_iter()
        .map(|(index, context)| async move { (index, context.fill().await) })
        .collect::<FuturesUnordered<_>>()
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        backend::{PageRequest, PageResponse, QueryBackend},
        models::{PartitionKeyRange, PartitionedQueryExecutionInfo},
        query::QuerySettings,
        Query, StatusCode, SubStatusCode,
    };

    /// Serves a fixed script of responses, one per fetch.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<PageResponse>>>,
        requests: Mutex<Vec<Option<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<PageResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn query_plan(
            &self,
            _collection: &str,
            _query: &Query,
        ) -> Result<PartitionedQueryExecutionInfo> {
            Ok(PartitionedQueryExecutionInfo::default())
        }

        async fn resolve_current_ranges(&self, _collection: &str) -> Result<Vec<PartitionKeyRange>> {
            Ok(Vec::new())
        }

        async fn fetch_page(&self, _collection: &str, request: PageRequest) -> Result<PageResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.continuation);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PageResponse::default()))
        }
    }

    fn context(backend: Arc<ScriptedBackend>) -> PartitionRangeExecutionContext<Value> {
        context_of(backend)
    }

    fn context_of<T: PartitionItem>(
        backend: Arc<ScriptedBackend>,
    ) -> PartitionRangeExecutionContext<T> {
        let settings = Arc::new(QuerySettings {
            backend,
            collection: "coll".into(),
            query: Query::from("SELECT * FROM c"),
            page_size: 10,
        });
        let token = CompositeContinuationToken::new(
            None,
            Range::half_open("".to_string(), "FF".to_string()).unwrap(),
        );
        PartitionRangeExecutionContext::new(FeedRangePartitionQueue::new(settings, token))
    }

    #[tokio::test]
    async fn buffers_then_exhausts() {
        let backend = ScriptedBackend::new(vec![Ok(PageResponse::new(
            vec![json!(1), json!(2)],
            None,
        )
        .with_request_charge(2.0)
        .with_activity_id("a1"))]);
        let mut context = context(backend.clone());
        assert_eq!(ContextState::Created, context.state);

        assert_eq!(FillOutcome::Ready, context.fill().await);
        assert_eq!(ContextState::Buffered, context.state);
        assert_eq!(Some(&json!(1)), context.peek());
        assert_eq!(Some(json!(1)), context.pop());
        assert!(!context.is_exhausted());
        assert_eq!(Some(json!(2)), context.pop());
        assert!(context.is_exhausted());
        assert_eq!(FillOutcome::Exhausted, context.fill().await);
        assert_eq!(1, backend.calls.load(Ordering::SeqCst));

        let metrics = context.take_metrics();
        assert_eq!(2.0, metrics.request_charge);
        assert_eq!(vec!["a1".to_string()], metrics.activity_ids);
    }

    #[tokio::test]
    async fn skips_empty_pages() {
        let backend = ScriptedBackend::new(vec![
            Ok(PageResponse::new(vec![], Some("c1".into()))),
            Ok(PageResponse::new(vec![json!("x")], Some("c2".into()))),
        ]);
        let mut context = context(backend.clone());
        assert_eq!(FillOutcome::Ready, context.fill().await);
        assert_eq!(
            vec![None, Some("c1".to_string())],
            *backend.requests.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn buffered_page_resumes_from_its_origin() {
        let backend = ScriptedBackend::new(vec![
            Ok(PageResponse::new(vec![json!(1)], Some("c1".into()))),
            Ok(PageResponse::new(vec![json!(2)], Some("c2".into()))),
        ]);
        let mut context = context(backend);
        context.fill().await;
        assert_eq!(None, context.composite_token().token());
        context.drain(1);
        assert_eq!(Some("c1"), context.composite_token().token());
        context.fill().await;
        assert_eq!(Some("c1"), context.composite_token().token());
    }

    #[tokio::test]
    async fn records_errors() {
        let backend = ScriptedBackend::new(vec![Err(Error::backend(
            StatusCode::INTERNAL_SERVER_ERROR,
            "boom",
        ))]);
        let mut context = context(backend.clone());
        assert_eq!(FillOutcome::Failed, context.fill().await);
        assert_eq!(ContextState::Failed, context.state);
        assert!(context.take_error().is_some());
        assert_eq!(FillOutcome::Failed, context.fill().await);
        assert_eq!(1, backend.calls.load(Ordering::SeqCst));
        assert_eq!(None, context.composite_token().token());
    }

    #[tokio::test]
    async fn page_that_fails_to_convert_is_not_skipped() {
        let backend = ScriptedBackend::new(vec![Ok(PageResponse::new(
            vec![json!({"not": "a result"})],
            Some("c1".into()),
        ))]);
        let mut context = context_of::<OrderByResult>(backend);
        assert_eq!(FillOutcome::Failed, context.fill().await);
        assert!(context.take_error().is_some());
        assert_eq!(None, context.composite_token().token());
        assert!(!context.queue.is_exhausted());
    }

    #[tokio::test]
    async fn reports_range_gone() {
        let backend = ScriptedBackend::new(vec![Err(Error::backend_with_sub_status(
            StatusCode::GONE,
            SubStatusCode::PARTITION_KEY_RANGE_GONE,
            "split",
        ))]);
        let mut context = context(backend);
        assert_eq!(FillOutcome::RangeGone, context.fill().await);
        assert!(context.take_error().is_none());
    }

    #[tokio::test]
    async fn skip_filter_spans_pages() {
        let backend = ScriptedBackend::new(vec![
            Ok(PageResponse::new(vec![json!(1), json!(2)], Some("c1".into()))),
            Ok(PageResponse::new(vec![json!(3), json!(4), json!(1)], None)),
        ]);
        let context = context(backend);
        let mut context =
            context.with_skip(Box::new(|item: &Value| item.as_i64().is_some_and(|v| v <= 3)));
        assert_eq!(FillOutcome::Ready, context.fill().await);
        assert_eq!(Some("c1"), context.composite_token().token());
        assert_eq!(vec![json!(4), json!(1)], context.drain(10));
        assert!(context.is_exhausted());
    }

    #[tokio::test]
    async fn fills_concurrently() {
        let backend = ScriptedBackend::new(vec![
            Ok(PageResponse::new(vec![json!(1)], None)),
            Ok(PageResponse::new(vec![json!(2)], None)),
        ]);
        let mut contexts = vec![context(backend.clone()), context(backend.clone())];
        let mut outcomes = fill_all(contexts.iter_mut().enumerate()).await;
        outcomes.sort_by_key(|(index, _)| *index);
        assert_eq!(
            vec![(0, FillOutcome::Ready), (1, FillOutcome::Ready)],
            outcomes
        );
        assert_eq!(2, backend.calls.load(Ordering::SeqCst));
    }
}
