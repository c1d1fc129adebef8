// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::sync::Arc;

use crate::{
    backend::{FeedTarget, PageRequest, PageResponse},
    continuation::CompositeContinuationToken,
    query::QuerySettings,
    Range, Result,
};

/// A cursor over the results of one partition key range.
///
/// The queue owns the range's [`CompositeContinuationToken`]. Fetching a page does not move it; the caller
/// [`advance`](Self::advance)s the queue once it has accepted the page, so a page that fails to fetch or to
/// convert is requested again when the range is resumed.
pub(crate) struct FeedRangePartitionQueue {
    settings: Arc<QuerySettings>,
    token: CompositeContinuationToken,
    started: bool,
}

impl FeedRangePartitionQueue {
    pub fn new(settings: Arc<QuerySettings>, token: CompositeContinuationToken) -> Self {
        Self {
            settings,
            token,
            started: false,
        }
    }

    pub fn range(&self) -> &Range<String> {
        self.token.range()
    }

    /// Gets the backend cursor the next fetch will send.
    pub fn continuation(&self) -> Option<&str> {
        self.token.token()
    }

    pub fn composite_token(&self) -> &CompositeContinuationToken {
        &self.token
    }

    /// Indicates if the backend has reported the end of this range.
    ///
    /// A queue created from a token with no cursor has not started yet, and is not exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.started && self.token.token().is_none()
    }

    pub async fn fetch_next_page(&mut self) -> Result<PageResponse> {
        let request = PageRequest {
            query: self.settings.query.clone(),
            target: FeedTarget::Range(self.token.range().clone()),
            continuation: self.token.token().map(String::from),
            max_item_count: self.settings.page_size,
        };

        let response = self
            .settings
            .backend
            .fetch_page(&self.settings.collection, request)
            .await?;

        tracing::trace!(
            range = %self.token.range(),
            continuation = ?self.token.token(),
            items = response.items.len(),
            request_charge = response.request_charge,
            "fetched partition page"
        );

        Ok(response)
    }

    /// Moves the queue past the page that returned `continuation`.
    pub fn advance(&mut self, continuation: Option<String>) {
        self.token = self.token.with_cursor(continuation);
        self.started = true;
    }
}
