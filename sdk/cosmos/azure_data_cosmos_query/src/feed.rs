// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::pin::Pin;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Result;

/// A single page of query results.
#[derive(Debug, Clone)]
pub struct FeedPage<T> {
    items: Vec<T>,
    continuation: Option<String>,
    request_charge: f64,
    activity_ids: Vec<String>,
}

impl<T> FeedPage<T> {
    pub(crate) fn new(
        items: Vec<T>,
        continuation: Option<String>,
        request_charge: f64,
        activity_ids: Vec<String>,
    ) -> Self {
        Self {
            items,
            continuation,
            request_charge,
            activity_ids,
        }
    }

    /// Gets the items in this page of results.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the page, returning its items.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Gets the token to resume the query after this page, or `None` if the query has no more results.
    ///
    /// The token is opaque, stable across processes and can be passed to [`QueryOptions::continuation`](crate::QueryOptions::continuation).
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Gets the total request charge of every backend request made to produce this page.
    pub fn request_charge(&self) -> f64 {
        self.request_charge
    }

    /// Gets the activity IDs of every backend request made to produce this page.
    pub fn activity_ids(&self) -> &[String] {
        &self.activity_ids
    }
}

impl FeedPage<Value> {
    pub(crate) fn deserialize_into<T: DeserializeOwned>(self) -> Result<FeedPage<T>> {
        let items = self
            .items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(FeedPage {
            items,
            continuation: self.continuation,
            request_charge: self.request_charge,
            activity_ids: self.activity_ids,
        })
    }
}

/// A lazy sequence of [`FeedPage`]s.
///
/// The sequence ends after the first error. Pages already yielded remain valid, and their continuation tokens can still be used.
/// Dropping the pager cancels any backend requests still in flight.
pub type FeedPager<T> = Pin<Box<dyn Stream<Item = Result<FeedPage<T>>> + Send>>;
