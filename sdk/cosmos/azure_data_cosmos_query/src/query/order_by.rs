// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use crate::{
    continuation::{serialize_aggregate, CompositeContinuationToken, OrderByContinuationToken},
    models::{compare_sort_keys, OrderByItem, OrderByResult, SortOrder},
    query::{
        context::{fill_all, FillOutcome, PartitionRangeExecutionContext, SkipFilter},
        partition_queue::FeedRangePartitionQueue,
        split_merge::resolve_current,
        Batch, FetchMetrics, QuerySettings,
    },
    Error, Result,
};

/// A position in the merged result order.
#[derive(Debug, Clone)]
struct Boundary {
    items: Vec<OrderByItem>,
    rid: String,

    // Whether the result at this position is still to be returned.
    inclusive: bool,
}

impl Boundary {
    fn from_token(token: &OrderByContinuationToken) -> Self {
        Self {
            items: token.order_by_items().to_vec(),
            rid: token.rid().to_string(),
            inclusive: token.inclusive(),
        }
    }

    fn skip_filter(&self, orders: Arc<[SortOrder]>) -> SkipFilter<OrderByResult> {
        let boundary = self.clone();
        Box::new(move |result: &OrderByResult| {
            match compare_sort_keys(
                &result.order_by_items,
                &result.rid,
                &boundary.items,
                &boundary.rid,
                &orders,
            ) {
                Ordering::Less => true,
                Ordering::Equal => !boundary.inclusive,
                Ordering::Greater => false,
            }
        })
    }
}

struct Slot {
    context: PartitionRangeExecutionContext<OrderByResult>,

    // The last result taken from this range, or the position the range was resumed from.
    boundary: Option<Boundary>,
}

/// The buffered head of one range, ordered so that [`BinaryHeap`] pops the globally-next result first.
struct HeadEntry {
    items: Vec<OrderByItem>,
    rid: String,
    slot: usize,
    orders: Arc<[SortOrder]>,
}

impl Ord for HeadEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_sort_keys(
            &other.items,
            &other.rid,
            &self.items,
            &self.rid,
            &self.orders,
        )
        .then_with(|| other.slot.cmp(&self.slot))
    }
}

impl PartialOrd for HeadEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeadEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeadEntry {}

/// Merges the pre-sorted results of several partition key ranges into one sorted sequence.
///
/// Results are ordered by their ORDER BY values under the query's clause directions, with ties broken by resource ID.
/// Before each result is chosen, every range that could supply it has its next result buffered.
pub(crate) struct OrderByQueryExecutor {
    settings: Arc<QuerySettings>,
    orders: Arc<[SortOrder]>,

    // Retired slots are left as `None` so heap entries keep pointing at the right slot.
    slots: Vec<Option<Slot>>,
    heads: BinaryHeap<HeadEntry>,

    // Slots whose head must be (re)buffered before the next result can be chosen.
    pending: Vec<usize>,
    last_emitted: Option<Boundary>,
    max_degree_of_parallelism: usize,
    retired_metrics: FetchMetrics,
}

impl OrderByQueryExecutor {
    fn new(
        settings: Arc<QuerySettings>,
        orders: Vec<SortOrder>,
        max_degree_of_parallelism: usize,
    ) -> Self {
        Self {
            settings,
            orders: orders.into(),
            slots: Vec::new(),
            heads: BinaryHeap::new(),
            pending: Vec::new(),
            last_emitted: None,
            max_degree_of_parallelism: max_degree_of_parallelism.max(1),
            retired_metrics: FetchMetrics::default(),
        }
    }

    /// Creates an executor for ranges that have not returned any results yet.
    pub fn start(
        settings: Arc<QuerySettings>,
        orders: Vec<SortOrder>,
        mut tokens: Vec<CompositeContinuationToken>,
        max_degree_of_parallelism: usize,
    ) -> Self {
        let mut executor = Self::new(settings, orders, max_degree_of_parallelism);
        tokens.sort_by(|a, b| a.range().min().cmp(b.range().min()));
        for token in tokens {
            executor.push_slot(token, None);
        }
        executor
    }

    /// Creates an executor resuming each range from its recorded position.
    pub fn resume(
        settings: Arc<QuerySettings>,
        orders: Vec<SortOrder>,
        mut tokens: Vec<OrderByContinuationToken>,
        max_degree_of_parallelism: usize,
    ) -> Self {
        let mut executor = Self::new(settings, orders, max_degree_of_parallelism);
        tokens.sort_by(|a, b| {
            a.composite_token()
                .range()
                .min()
                .cmp(b.composite_token().range().min())
        });
        for token in tokens {
            let boundary = Boundary::from_token(&token);
            executor.push_slot(token.composite_token().clone(), Some(boundary));
        }
        executor
    }

    fn push_slot(&mut self, token: CompositeContinuationToken, boundary: Option<Boundary>) {
        let mut context = PartitionRangeExecutionContext::new(FeedRangePartitionQueue::new(
            self.settings.clone(),
            token,
        ));
        if let Some(boundary) = &boundary {
            context = context.with_skip(boundary.skip_filter(self.orders.clone()));
        }
        self.pending.push(self.slots.len());
        self.slots.push(Some(Slot { context, boundary }));
    }

    /// Produces the next page of at most `limit` results in merged order, or `None` once every range is exhausted.
    pub async fn next_batch(&mut self, limit: usize) -> Result<Option<Batch>> {
        let mut batch = Batch::default();
        while batch.items.len() < limit {
            if let Err(err) = self.fill_pending().await {
                self.collect_metrics(&mut batch.metrics);
                if batch.items.is_empty() {
                    return Err(err);
                }
                batch.error = Some(err);
                return Ok(Some(batch));
            }

            let Some(head) = self.heads.pop() else {
                break;
            };
            let Some(slot) = self.slots.get_mut(head.slot).and_then(Option::as_mut) else {
                continue;
            };
            let Some(result) = slot.context.pop() else {
                continue;
            };

            let boundary = Boundary {
                items: result.order_by_items,
                rid: result.rid,
                inclusive: false,
            };
            slot.boundary = Some(boundary.clone());
            self.last_emitted = Some(boundary);
            self.pending.push(head.slot);
            batch.items.push(result.payload);
        }

        self.collect_metrics(&mut batch.metrics);
        if batch.items.is_empty() && self.is_done() {
            return Ok(None);
        }
        tracing::trace!(items = batch.items.len(), "closed ORDER BY page");
        Ok(Some(batch))
    }

    fn is_done(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .all(|slot| slot.context.is_exhausted())
    }

    /// Gets the continuation for the results not yet returned, or `None` if there are none.
    pub fn continuation(&self) -> Result<Option<String>> {
        let mut tokens = Vec::new();
        for slot in self.slots.iter().flatten() {
            if slot.context.is_exhausted() {
                continue;
            }

            let composite = slot.context.composite_token();
            let token = match (slot.boundary.as_ref(), self.last_emitted.as_ref()) {
                (Some(boundary), _) | (None, Some(boundary)) => OrderByContinuationToken::new(
                    composite,
                    boundary.items.clone(),
                    boundary.rid.clone(),
                    boundary.inclusive,
                ),
                (None, None) => match slot.context.peek() {
                    Some(head) => OrderByContinuationToken::new(
                        composite,
                        head.order_by_items.clone(),
                        head.rid.clone(),
                        true,
                    ),
                    None => {
                        return Err(Error::FatalConsistency(format!(
                            "no ORDER BY position recorded for range {}",
                            slot.context.range()
                        )))
                    }
                },
            };
            tokens.push(token);
        }

        if tokens.is_empty() {
            return Ok(None);
        }
        tokens.sort_by(|a, b| {
            a.composite_token()
                .range()
                .min()
                .cmp(b.composite_token().range().min())
        });
        serialize_aggregate(&tokens).map(Some)
    }

    /// Buffers the head of every pending slot, at most `max_degree_of_parallelism` at a time.
    async fn fill_pending(&mut self) -> Result<()> {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(self.max_degree_of_parallelism);
            let selected: Vec<usize> = self.pending.drain(..take).collect();

            let outcomes = fill_all(self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
                match slot {
                    Some(slot) if selected.contains(&i) => Some((i, &mut slot.context)),
                    _ => None,
                }
            }))
            .await;

            let mut gone = Vec::new();
            let mut failure = None;
            for (i, outcome) in outcomes {
                match outcome {
                    FillOutcome::Ready => self.push_head(i),
                    FillOutcome::Exhausted => self.retire(i),
                    FillOutcome::RangeGone => gone.push(i),
                    FillOutcome::Failed => {
                        let err = self.slots[i]
                            .as_mut()
                            .and_then(|slot| slot.context.take_error());
                        failure = failure.or(err);
                    }
                }
            }

            for i in gone {
                self.replace_gone(i).await?;
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(())
    }

    fn push_head(&mut self, index: usize) {
        let Some(head) = self.slots[index]
            .as_ref()
            .and_then(|slot| slot.context.peek())
        else {
            return;
        };
        self.heads.push(HeadEntry {
            items: head.order_by_items.clone(),
            rid: head.rid.clone(),
            slot: index,
            orders: self.orders.clone(),
        });
    }

    fn retire(&mut self, index: usize) {
        if let Some(mut slot) = self.slots[index].take() {
            self.retired_metrics.absorb(slot.context.take_metrics());
        }
    }

    async fn replace_gone(&mut self, index: usize) -> Result<()> {
        let Some(slot) = self.slots[index].as_ref() else {
            return Ok(());
        };
        let offered = slot.context.composite_token();
        let boundary = slot.boundary.clone().or_else(|| self.last_emitted.clone());

        let targets = resolve_current(&self.settings, std::slice::from_ref(&offered)).await?;
        if targets.len() == 1 && targets[0] == offered {
            return Err(Error::FatalConsistency(format!(
                "range {} was reported gone but is still current",
                offered.range()
            )));
        }

        tracing::debug!(
            range = %offered.range(),
            replacements = targets.len(),
            "re-targeted gone partition key range"
        );
        self.retire(index);
        for target in targets {
            self.push_slot(target, boundary.clone());
        }
        Ok(())
    }

    fn collect_metrics(&mut self, metrics: &mut FetchMetrics) {
        metrics.absorb(std::mem::take(&mut self.retired_metrics));
        for slot in self.slots.iter_mut().flatten() {
            metrics.absorb(slot.context.take_metrics());
        }
    }
}
