// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Wire models exchanged with the query backend.

mod order_by_item;
mod partition_key_range;
mod query_plan;

pub use order_by_item::*;
pub use partition_key_range::*;
pub use query_plan::*;
