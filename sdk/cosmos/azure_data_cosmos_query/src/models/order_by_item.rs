// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use super::SortOrder;

/// A single ORDER BY value attached to a partition result, in the form `{"item": <value>}`.
///
/// An absent `item` means the ordered expression was undefined for that document, which is distinct from `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub item: Option<Value>,
}

impl OrderByItem {
    pub fn new(item: impl Into<Value>) -> Self {
        Self {
            item: Some(item.into()),
        }
    }

    /// An item whose ordered expression was undefined.
    pub fn undefined() -> Self {
        Self { item: None }
    }
}

// `Option<Value>` would turn an explicit `null` into `None`; we need to keep it.
fn deserialize_present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// The envelope each partition returns for a rewritten ORDER BY query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByResult {
    #[serde(rename = "_rid")]
    pub rid: String,

    #[serde(rename = "orderByItems")]
    pub order_by_items: Vec<OrderByItem>,

    /// The projected document the caller asked for.
    #[serde(default)]
    pub payload: Value,
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Compares two non-null ORDER BY values in ascending order.
///
/// Values of different JSON types order by type: boolean, then number, then string, then array, then object.
/// Arrays and objects compare equal to others of their own type.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (Some(Value::Number(l)), Some(Value::Number(r))) => compare_numbers(l, r),
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

/// Compares integers exactly and falls back to `f64` when either side is fractional.
fn compare_numbers(left: &Number, right: &Number) -> Ordering {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return l.cmp(&r);
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        return l.cmp(&r);
    }
    // An integer outside i64 is a u64 above i64::MAX, so it is larger than any i64.
    match (left.as_i64(), right.as_i64(), left.as_u64(), right.as_u64()) {
        (Some(_), None, _, Some(_)) => Ordering::Less,
        (None, Some(_), Some(_), _) => Ordering::Greater,
        _ => {
            let l = left.as_f64().unwrap_or(f64::NAN);
            let r = right.as_f64().unwrap_or(f64::NAN);
            l.total_cmp(&r)
        }
    }
}

/// Compares two lists of ORDER BY values under the query's clause directions.
///
/// Undefined and `null` values sort before every other value under both directions, with undefined first.
/// Clauses beyond the shorter of `orders` and either item list are ignored.
pub fn compare_order_by_items(
    left: &[OrderByItem],
    right: &[OrderByItem],
    orders: &[SortOrder],
) -> Ordering {
    for ((l, r), order) in left.iter().zip(right).zip(orders) {
        let l = l.item.as_ref();
        let r = r.item.as_ref();
        let (l_rank, r_rank) = (type_rank(l), type_rank(r));
        let ordering = match (l_rank <= 1, r_rank <= 1) {
            (true, true) => l_rank.cmp(&r_rank),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => match order {
                SortOrder::Ascending => compare_values(l, r),
                SortOrder::Descending => compare_values(l, r).reverse(),
            },
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Compares two ORDER BY positions, breaking ties between equal values by resource ID.
///
/// This is the total order results are merged in: it must match the order each partition returns its results in.
pub fn compare_sort_keys(
    left_items: &[OrderByItem],
    left_rid: &str,
    right_items: &[OrderByItem],
    right_rid: &str,
    orders: &[SortOrder],
) -> Ordering {
    compare_order_by_items(left_items, right_items, orders).then_with(|| left_rid.cmp(right_rid))
}
