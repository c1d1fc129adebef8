// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::{
    cmp::Ordering,
    sync::{
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use azure_data_cosmos_query::{
    backend::{FeedTarget, PageRequest, PageResponse, QueryBackend},
    models::{
        compare_sort_keys, full_range, OrderByItem, PartitionKeyRange,
        PartitionedQueryExecutionInfo, QueryInfo, SortOrder,
    },
    Error, Query, Range, Result, StatusCode, SubStatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The number of distinct partition keys the generated items are spread over.
pub const PARTITION_KEY_COUNT: usize = 12;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MockItem {
    pub id: String,
    pub partition_key: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(rename = "_rid")]
    pub rid: String,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; only a missing field is `None`.
fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl MockItem {
    /// Generates `count` items. Every ninth value is `null` and every ninth (offset by four) is undefined;
    /// the rest are numbers with plenty of duplicates.
    pub fn generate(count: usize) -> Vec<MockItem> {
        (0..count)
            .map(|i| MockItem {
                id: format!("item{i}"),
                partition_key: format!("pk{}", i % PARTITION_KEY_COUNT),
                value: match i % 9 {
                    0 => Some(Value::Null),
                    4 => None,
                    _ => Some(json!((i * 7) % 23)),
                },
                rid: format!("rid{i:04}"),
            })
            .collect()
    }

    /// The item's position in the effective partition key space: partition key `pkN` maps to `N * 21` in hex.
    pub fn effective_partition_key(&self) -> String {
        let index: usize = self
            .partition_key
            .trim_start_matches("pk")
            .parse()
            .unwrap_or(0);
        format!("{:02X}", index * 21)
    }

    fn order_by_items(&self) -> Vec<OrderByItem> {
        vec![OrderByItem {
            item: self.value.clone(),
        }]
    }
}

/// Sorts items the way a partition returns them for `ORDER BY c.value`.
pub fn sort_items(items: &mut [MockItem], order: SortOrder) {
    items.sort_by(|a, b| compare_items(a, b, order));
}

fn compare_items(a: &MockItem, b: &MockItem, order: SortOrder) -> Ordering {
    compare_sort_keys(
        &a.order_by_items(),
        &a.rid,
        &b.order_by_items(),
        &b.rid,
        &[order],
    )
}

/// A backend call the mock can be told to fail.
enum Fault {
    /// Fail the n-th page request (counting from 1) with a 500.
    Page(usize),
}

struct State {
    items: Vec<MockItem>,
    ranges: Vec<PartitionKeyRange>,
    next_range_id: usize,
    faults: Vec<Fault>,
}

/// An in-memory collection served through [`QueryBackend`].
///
/// Items are placed in the effective partition key space by partition key, and each partition key range serves
/// the items whose key it covers. Splitting or merging ranges does not move any data; it only changes which ranges
/// are current. A request for a range that is no longer covered by a single current range fails as "gone".
///
/// Page cursors are the position of the last returned item: its resource ID for unordered queries, or its
/// ORDER BY values and resource ID for ORDER BY queries. A cursor stays valid in any range that holds the rest of
/// its results.
pub struct MockBackend {
    state: Mutex<State>,
    plan_calls: AtomicUsize,
    range_calls: AtomicUsize,
    page_calls: AtomicUsize,
}

impl MockBackend {
    /// Creates a backend with four ranges holding `items`.
    pub fn new(items: Vec<MockItem>) -> Self {
        let ranges = vec![
            PartitionKeyRange::new("0", "", "40"),
            PartitionKeyRange::new("1", "40", "80"),
            PartitionKeyRange::new("2", "80", "C0"),
            PartitionKeyRange::new("3", "C0", "FF"),
        ];
        Self {
            state: Mutex::new(State {
                items,
                next_range_id: ranges.len(),
                ranges,
                faults: Vec::new(),
            }),
            plan_calls: AtomicUsize::new(0),
            range_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_items(count: usize) -> Self {
        Self::new(MockItem::generate(count))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn items(&self) -> Vec<MockItem> {
        self.state().items.clone()
    }

    pub fn ranges(&self) -> Vec<PartitionKeyRange> {
        self.state().ranges.clone()
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.plan_calls() + self.range_calls() + self.page_calls()
    }

    /// Makes the n-th page request, counting from 1 across the backend's lifetime, fail with a 500.
    pub fn fail_page_request(&self, n: usize) {
        self.state().faults.push(Fault::Page(n));
    }

    /// Splits range `id` at `at`, returning the IDs of the two children.
    pub fn split(&self, id: &str, at: &str) -> (String, String) {
        let mut state = self.state();
        let index = state
            .ranges
            .iter()
            .position(|r| r.id == id)
            .unwrap_or_else(|| panic!("no range {id}"));
        let parent = state.ranges.remove(index);
        assert!(parent.min_inclusive.as_str() < at && at < parent.max_exclusive.as_str());

        let left_id = state.next_range_id.to_string();
        let right_id = (state.next_range_id + 1).to_string();
        state.next_range_id += 2;

        let mut left = PartitionKeyRange::new(left_id.clone(), parent.min_inclusive.clone(), at);
        left.parents = vec![parent.id.clone()];
        let mut right = PartitionKeyRange::new(right_id.clone(), at, parent.max_exclusive.clone());
        right.parents = vec![parent.id.clone()];
        state.ranges.insert(index, right);
        state.ranges.insert(index, left);
        (left_id, right_id)
    }

    /// Merges two adjacent ranges, returning the ID of the merged range.
    pub fn merge(&self, left: &str, right: &str) -> String {
        let mut state = self.state();
        let left_index = state
            .ranges
            .iter()
            .position(|r| r.id == left)
            .unwrap_or_else(|| panic!("no range {left}"));
        assert_eq!(right, state.ranges[left_index + 1].id, "ranges must be adjacent");

        let right_range = state.ranges.remove(left_index + 1);
        let left_range = state.ranges.remove(left_index);
        let id = state.next_range_id.to_string();
        state.next_range_id += 1;

        let mut merged = PartitionKeyRange::new(
            id.clone(),
            left_range.min_inclusive.clone(),
            right_range.max_exclusive.clone(),
        );
        merged.parents = vec![left_range.id, right_range.id];
        state.ranges.insert(left_index, merged);
        id
    }

    /// Finds the items a request targets, failing as "gone" if the target is not served by one current range.
    fn target_items(state: &State, target: &FeedTarget) -> Result<Vec<MockItem>> {
        let gone = |what: String| {
            Error::backend_with_sub_status(
                StatusCode::GONE,
                SubStatusCode::PARTITION_KEY_RANGE_GONE,
                format!("{what} is not served by a current partition key range"),
            )
        };

        let range = match target {
            FeedTarget::PartitionKey(partition_key) => {
                return Ok(state
                    .items
                    .iter()
                    .filter(|item| partition_key.value() == &json!(item.partition_key))
                    .cloned()
                    .collect());
            }
            FeedTarget::PartitionKeyRangeId(id) => state
                .ranges
                .iter()
                .find(|r| &r.id == id)
                .ok_or_else(|| gone(format!("range {id}")))?
                .to_range()?,
            FeedTarget::Range(range) => {
                let served = state.ranges.iter().any(|r| {
                    r.to_range()
                        .map(|current| current.contains_range(range))
                        .unwrap_or(false)
                });
                if !served {
                    return Err(gone(format!("range {range}")));
                }
                range.clone()
            }
        };

        Ok(state
            .items
            .iter()
            .filter(|item| range.contains(&item.effective_partition_key()))
            .cloned()
            .collect())
    }
}

#[derive(Serialize, Deserialize)]
struct OrderByCursor {
    items: Vec<OrderByItem>,
    rid: String,
}

fn bad_request(message: impl Into<String>) -> Error {
    Error::backend(StatusCode::BAD_REQUEST, message)
}

#[async_trait]
impl QueryBackend for MockBackend {
    async fn query_plan(
        &self,
        _collection: &str,
        query: &Query,
    ) -> Result<PartitionedQueryExecutionInfo> {
        self.plan_calls.fetch_add(1, AtomicOrdering::SeqCst);

        let text = query.text();
        let top = match text.split_once("TOP ") {
            Some((_, rest)) => {
                let count = rest.split_whitespace().next().unwrap_or_default();
                Some(
                    count
                        .parse()
                        .map_err(|_| bad_request(format!("invalid TOP {count}")))?,
                )
            }
            None => None,
        };

        let mut query_info = QueryInfo {
            top,
            ..Default::default()
        };
        if text.contains("ORDER BY") {
            let (order, direction) = if text.trim_end().ends_with("DESC") {
                (SortOrder::Descending, "DESC")
            } else {
                (SortOrder::Ascending, "ASC")
            };
            query_info.order_by = vec![order];
            query_info.order_by_expressions = vec!["c.value".into()];
            query_info.rewritten_query = format!(
                "SELECT c._rid, [{{\"item\": c.value}}] AS orderByItems, c AS payload FROM c WHERE {{documentdb-formattableorderbyquery-filter}} ORDER BY c.value {direction}"
            );
        }

        Ok(PartitionedQueryExecutionInfo {
            query_info,
            query_ranges: vec![full_range()],
        })
    }

    async fn resolve_current_ranges(&self, _collection: &str) -> Result<Vec<PartitionKeyRange>> {
        self.range_calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self.ranges())
    }

    async fn fetch_page(&self, _collection: &str, request: PageRequest) -> Result<PageResponse> {
        let call = self.page_calls.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let state = self.state();
        if state
            .faults
            .iter()
            .any(|fault| matches!(fault, Fault::Page(n) if *n == call))
        {
            return Err(Error::backend(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("injected failure on page request {call}"),
            ));
        }

        let mut items = Self::target_items(&state, &request.target)?;
        drop(state);

        let text = request.query.text();
        let ordered = text.contains("orderByItems");
        let order = if text.trim_end().ends_with("DESC") {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };

        if ordered {
            sort_items(&mut items, order);
            if let Some(cursor) = &request.continuation {
                let cursor: OrderByCursor = serde_json::from_str(cursor)
                    .map_err(|e| bad_request(format!("invalid cursor: {e}")))?;
                items.retain(|item| {
                    compare_sort_keys(
                        &item.order_by_items(),
                        &item.rid,
                        &cursor.items,
                        &cursor.rid,
                        &[order],
                    ) == Ordering::Greater
                });
            }
        } else {
            items.sort_by(|a, b| a.rid.cmp(&b.rid));
            if let Some(cursor) = &request.continuation {
                items.retain(|item| item.rid.as_str() > cursor.as_str());
            }
        }

        let has_more = items.len() > request.max_item_count;
        items.truncate(request.max_item_count);
        let continuation = match items.last() {
            Some(last) if has_more => Some(if ordered {
                serde_json::to_string(&OrderByCursor {
                    items: last.order_by_items(),
                    rid: last.rid.clone(),
                })?
            } else {
                last.rid.clone()
            }),
            _ => None,
        };

        let items = items
            .into_iter()
            .map(|item| {
                let payload = serde_json::to_value(&item)?;
                Ok(if ordered {
                    json!({
                        "_rid": item.rid,
                        "orderByItems": item.order_by_items(),
                        "payload": payload,
                    })
                } else {
                    payload
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PageResponse::new(items, continuation)
            .with_request_charge(1.0)
            .with_activity_id(uuid::Uuid::new_v4().to_string()))
    }
}

/// Installs a `tracing` subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Checks that every current range holds at least one item.
pub fn assert_spread(backend: &MockBackend) {
    for range in backend.ranges() {
        let range: Range<String> = range.to_range().unwrap();
        assert!(
            backend
                .items()
                .iter()
                .any(|item| range.contains(&item.effective_partition_key())),
            "range {range} holds no items"
        );
    }
}
