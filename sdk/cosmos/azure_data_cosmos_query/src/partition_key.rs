// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A logical partition key value used to scope a query to a single partition.
///
/// The engine never hashes partition keys itself. A scoped query is sent to the backend as-is and the
/// backend routes it, so this type only has to carry the value faithfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Value);

impl PartitionKey {
    /// Gets the JSON value of the partition key.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<i64> for PartitionKey {
    fn from(value: i64) -> Self {
        Self(Value::from(value))
    }
}

impl From<f64> for PartitionKey {
    fn from(value: f64) -> Self {
        Self(Value::from(value))
    }
}

impl From<bool> for PartitionKey {
    fn from(value: bool) -> Self {
        Self(Value::Bool(value))
    }
}

impl From<Value> for PartitionKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
