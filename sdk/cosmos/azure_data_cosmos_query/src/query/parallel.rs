// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    continuation::{serialize_aggregate, CompositeContinuationToken},
    query::{
        context::{fill_all, FillOutcome, PartitionRangeExecutionContext},
        partition_queue::FeedRangePartitionQueue,
        split_merge::resolve_current,
        Batch, FetchMetrics, QuerySettings,
    },
    Error, Result,
};

/// Merges the results of several partition key ranges in no particular order.
///
/// Ranges take turns contributing whole backend pages to the output. Results from one range keep the order the
/// backend returned them in.
///
/// While waiting on the range whose turn it is, pages for the following ranges are prefetched, up to
/// `max_degree_of_parallelism` fetches at once and only while the prefetched results stay within
/// `max_buffered_item_count`.
pub(crate) struct ParallelQueryExecutor {
    settings: Arc<QuerySettings>,

    // Ordered by range.
    contexts: Vec<PartitionRangeExecutionContext<Value>>,
    next: usize,
    max_degree_of_parallelism: usize,
    max_buffered_item_count: usize,

    // Charges of contexts replaced since the last page.
    retired_metrics: FetchMetrics,
}

impl ParallelQueryExecutor {
    pub fn new(
        settings: Arc<QuerySettings>,
        mut tokens: Vec<CompositeContinuationToken>,
        max_degree_of_parallelism: usize,
        max_buffered_item_count: usize,
    ) -> Self {
        tokens.sort_by(|a, b| a.range().min().cmp(b.range().min()));
        let contexts = tokens
            .into_iter()
            .map(|token| {
                PartitionRangeExecutionContext::new(FeedRangePartitionQueue::new(
                    settings.clone(),
                    token,
                ))
            })
            .collect();
        Self {
            settings,
            contexts,
            next: 0,
            max_degree_of_parallelism: max_degree_of_parallelism.max(1),
            max_buffered_item_count,
            retired_metrics: FetchMetrics::default(),
        }
    }

    /// Produces the next page, or `None` once every range is exhausted.
    ///
    /// A page is closed once the next backend page would overflow the page size, or once every range has
    /// contributed to it. `limit` caps the number of items; a page is only split when that cap is reached.
    pub async fn next_batch(&mut self, limit: usize) -> Result<Option<Batch>> {
        let mut batch = Batch::default();
        self.remove_exhausted(&mut batch.metrics);
        if self.contexts.is_empty() {
            return Ok(None);
        }

        let page_size = self.settings.page_size;
        let mut contributed = 0;
        while !self.contexts.is_empty() && contributed < self.contexts.len() {
            let index = self.next % self.contexts.len();
            self.next = index;

            if self.contexts[index].needs_fetch() {
                match self.fill_from(index).await {
                    Ok(true) => {}
                    // The set of contexts changed; pick again.
                    Ok(false) => continue,
                    Err(err) => {
                        self.collect_metrics(&mut batch.metrics);
                        if batch.items.is_empty() {
                            return Err(err);
                        }
                        batch.error = Some(err);
                        return Ok(Some(batch));
                    }
                }
            }

            let buffered = self.contexts[index].buffered_len();
            if !batch.items.is_empty() && batch.items.len() + buffered > page_size {
                break;
            }

            let remaining = limit.saturating_sub(batch.items.len());
            batch.items.extend(self.contexts[index].drain(remaining));
            if self.contexts[index].is_exhausted() {
                batch
                    .metrics
                    .absorb(self.contexts.remove(index).take_metrics());
            } else {
                self.next = index + 1;
                contributed += 1;
            }

            if batch.items.len() >= limit || batch.items.len() >= page_size {
                break;
            }
        }

        self.collect_metrics(&mut batch.metrics);
        tracing::trace!(
            items = batch.items.len(),
            active_ranges = self.contexts.len(),
            "closed unordered page"
        );
        Ok(Some(batch))
    }

    /// Gets the continuation for the results not yet returned, or `None` if there are none.
    pub fn continuation(&self) -> Result<Option<String>> {
        let tokens: Vec<_> = self
            .contexts
            .iter()
            .filter(|c| !c.is_exhausted())
            .map(|c| c.composite_token())
            .collect();
        if tokens.is_empty() {
            return Ok(None);
        }
        serialize_aggregate(&tokens).map(Some)
    }

    /// Fills the context at `index`, prefetching for the contexts after it.
    ///
    /// Returns `false` if the context at `index` was exhausted or replaced, so the caller has to choose again.
    async fn fill_from(&mut self, index: usize) -> Result<bool> {
        let mut selected = vec![index];
        let buffered: usize = self.contexts.iter().map(|c| c.buffered_len()).sum();
        let count = self.contexts.len();
        for candidate in (index + 1..count).chain(0..index) {
            if selected.len() >= self.max_degree_of_parallelism {
                break;
            }
            if !self.contexts[candidate].needs_fetch() {
                continue;
            }
            let projected = buffered + (selected.len() + 1) * self.settings.page_size;
            if projected > self.max_buffered_item_count {
                break;
            }
            selected.push(candidate);
        }

        let outcomes = fill_all(
            self.contexts
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| selected.contains(i)),
        )
        .await;

        let mut gone = Vec::new();
        let mut failure = None;
        for (i, outcome) in outcomes {
            match outcome {
                FillOutcome::RangeGone => gone.push(i),
                FillOutcome::Failed if failure.is_none() => {
                    failure = self.contexts[i].take_error();
                }
                _ => {}
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        if gone.is_empty() {
            return Ok(!self.contexts[index].is_exhausted());
        }

        // Replace from the back so earlier indices stay valid.
        gone.sort_unstable();
        for i in gone.into_iter().rev() {
            self.replace_gone(i).await?;
        }
        Ok(false)
    }

    async fn replace_gone(&mut self, index: usize) -> Result<()> {
        let offered = self.contexts[index].composite_token();
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
        let mut gone = self.contexts.remove(index);
        self.retired_metrics.absorb(gone.take_metrics());
        let replacements: Vec<_> = targets
            .into_iter()
            .map(|token| {
                PartitionRangeExecutionContext::new(FeedRangePartitionQueue::new(
                    self.settings.clone(),
                    token,
                ))
            })
            .collect();
        self.contexts.splice(index..index, replacements);
        Ok(())
    }

    fn remove_exhausted(&mut self, metrics: &mut FetchMetrics) {
        let mut i = 0;
        while i < self.contexts.len() {
            if self.contexts[i].is_exhausted() {
                metrics.absorb(self.contexts.remove(i).take_metrics());
                if self.next > i {
                    self.next -= 1;
                }
            } else {
                i += 1;
            }
        }
    }

    fn collect_metrics(&mut self, metrics: &mut FetchMetrics) {
        metrics.absorb(std::mem::take(&mut self.retired_metrics));
        for context in &mut self.contexts {
            metrics.absorb(context.take_metrics());
        }
    }
}
