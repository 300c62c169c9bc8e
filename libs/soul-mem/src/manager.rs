// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::stats::{MemoryStatistics, MemoryTagStats};
use crate::tag::MemoryTag;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The accounting seam consumed by every tracked allocator.
///
/// Implementations must be thread-safe; all operations are expected to
/// succeed (accounting never fails, see the crate docs).
pub trait MemoryAccounting: Send + Sync {
    /// Inserts or overwrites the record for `ptr`. Overwriting replaces both
    /// size and tag.
    fn register_allocation(&self, ptr: usize, size: usize, tag: MemoryTag);

    /// Removes the record for `ptr` if present; no-op otherwise.
    fn unregister_allocation(&self, ptr: usize);

    /// Recorded size for `ptr`, or 0 when unknown.
    fn allocation_size(&self, ptr: usize) -> usize;

    /// Sum of all live record sizes.
    fn total_allocated(&self) -> usize;

    /// Number of live records.
    fn allocation_count(&self) -> usize;

    /// Sum of live record sizes whose tag hash matches `tag`.
    fn allocated_by_tag(&self, tag: MemoryTag) -> usize;

    /// Bucketizes the live records by tag hash into an immutable snapshot.
    fn snapshot(&self) -> MemoryStatistics;

    /// Emits every remaining record as a leak diagnostic.
    fn report_leaks(&self);
}

#[derive(Debug, Clone, Copy)]
struct AllocationInfo {
    size: usize,
    tag: MemoryTag,
}

/// Tracked-allocation table keyed by pointer address.
///
/// One internal mutex serializes every update; readers take the same lock,
/// so a snapshot is always consistent with the record set that produced it.
#[derive(Debug, Default)]
pub struct MemoryManager {
    allocations: Mutex<HashMap<usize, AllocationInfo>>,
    debug_mode: AtomicBool,
}

impl MemoryManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles per-operation `tracing` events for register/unregister.
    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    /// Discards every record without touching the underlying memory.
    /// Test utility; idempotent.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<usize, AllocationInfo>> {
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryAccounting for MemoryManager {
    fn register_allocation(&self, ptr: usize, size: usize, tag: MemoryTag) {
        self.lock().insert(ptr, AllocationInfo { size, tag });
        if self.debug_mode() {
            tracing::debug!(ptr = %format_args!("{ptr:#x}"), size, tag = %tag, "allocated");
        }
    }

    fn unregister_allocation(&self, ptr: usize) {
        let removed = self.lock().remove(&ptr);
        if let Some(info) = removed
            && self.debug_mode()
        {
            tracing::debug!(
                ptr = %format_args!("{ptr:#x}"),
                size = info.size,
                tag = %info.tag,
                "deallocated"
            );
        }
    }

    fn allocation_size(&self, ptr: usize) -> usize {
        self.lock().get(&ptr).map_or(0, |info| info.size)
    }

    fn total_allocated(&self) -> usize {
        self.lock().values().map(|info| info.size).sum()
    }

    fn allocation_count(&self) -> usize {
        self.lock().len()
    }

    fn allocated_by_tag(&self, tag: MemoryTag) -> usize {
        self.lock()
            .values()
            .filter(|info| info.tag == tag)
            .map(|info| info.size)
            .sum()
    }

    fn snapshot(&self) -> MemoryStatistics {
        let allocations = self.lock();

        let mut per_tag: HashMap<u32, MemoryTagStats> = HashMap::with_capacity(allocations.len());
        let mut total_bytes = 0;
        for info in allocations.values() {
            total_bytes += info.size;
            let bucket = per_tag
                .entry(info.tag.hash_value())
                .or_insert(MemoryTagStats {
                    tag: info.tag,
                    bytes: 0,
                    allocations: 0,
                });
            bucket.bytes += info.size;
            bucket.allocations += 1;
        }

        MemoryStatistics {
            total_bytes,
            allocation_count: allocations.len(),
            tags: per_tag.into_values().collect(),
        }
    }

    fn report_leaks(&self) {
        for (ptr, info) in self.lock().iter() {
            tracing::warn!(
                ptr = %format_args!("{ptr:#x}"),
                size = info.size,
                tag = %info.tag,
                "leaked allocation"
            );
        }
    }
}
