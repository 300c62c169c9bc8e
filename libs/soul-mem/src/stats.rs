// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::tag::MemoryTag;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Live-allocation totals for one tag.
#[derive(Debug, Clone, Copy)]
pub struct MemoryTagStats {
    pub tag: MemoryTag,
    pub bytes: usize,
    pub allocations: usize,
}

/// Immutable snapshot of a manager's record table.
///
/// Produced atomically under the manager lock; the per-tag order is
/// unspecified.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatistics {
    pub total_bytes: usize,
    pub allocation_count: usize,
    pub tags: Vec<MemoryTagStats>,
}

impl Serialize for MemoryTagStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("MemoryTagStats", 4)?;
        out.serialize_field("hash", &self.tag.hash_value())?;
        out.serialize_field("label", self.tag.label().unwrap_or(""))?;
        out.serialize_field("bytes", &self.bytes)?;
        out.serialize_field("allocations", &self.allocations)?;
        out.end()
    }
}
