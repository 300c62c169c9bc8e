// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::AllocError;
use crate::manager::MemoryAccounting;
use crate::registry::AccountantHandle;
use crate::tag::MemoryTag;
use core::ptr::NonNull;
use std::alloc::Layout;
use std::sync::Arc;

/// Adapts the global byte allocator into a tagged, tracked one.
///
/// Every successful allocation is registered under this allocator's tag;
/// every deallocation is unregistered.
#[derive(Debug, Clone)]
pub struct TaggedAllocator {
    accountant: AccountantHandle,
    tag: MemoryTag,
}

impl TaggedAllocator {
    /// Allocator resolving its accountant through the registry on every
    /// operation.
    #[must_use]
    pub fn new(tag: MemoryTag) -> Self {
        Self {
            accountant: AccountantHandle::Registry,
            tag,
        }
    }

    /// Allocator pinned to one accountant.
    #[must_use]
    pub fn with_accountant(accountant: Arc<dyn MemoryAccounting>, tag: MemoryTag) -> Self {
        Self {
            accountant: AccountantHandle::Pinned(accountant),
            tag,
        }
    }

    /// Reserves `layout` bytes and records them under this allocator's tag.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidArgument`] for zero-sized layouts,
    /// [`AllocError::OutOfMemory`] when the global allocator fails.
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError::InvalidArgument);
        }

        // Safety: non-zero size, checked above.
        let raw = unsafe { std::alloc::alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError::OutOfMemory)?;

        self.accountant
            .resolve()
            .register_allocation(ptr.as_ptr() as usize, layout.size(), self.tag);
        Ok(ptr)
    }

    /// Unregisters and frees an allocation made by
    /// [`allocate`][Self::allocate].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on an allocator sharing this global
    /// allocator, with the same `layout`, and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.accountant
            .resolve()
            .unregister_allocation(ptr.as_ptr() as usize);
        // Safety: forwarded caller contract.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }

    /// Reserves storage for `n` values of `T`.
    ///
    /// # Errors
    ///
    /// [`AllocError::OutOfMemory`] when the request overflows or the global
    /// allocator fails; [`AllocError::InvalidArgument`] when `n` is zero or
    /// `T` is zero-sized.
    pub fn allocate_array<T>(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        let layout = Layout::array::<T>(n).map_err(|_| AllocError::OutOfMemory)?;
        Ok(self.allocate(layout)?.cast())
    }

    /// Releases storage obtained from [`allocate_array`][Self::allocate_array].
    ///
    /// # Safety
    ///
    /// Same contract as [`deallocate`][Self::deallocate], with the original
    /// `n`.
    pub unsafe fn deallocate_array<T>(&self, ptr: NonNull<T>, n: usize) {
        let Ok(layout) = Layout::array::<T>(n) else {
            return;
        };
        // Safety: forwarded caller contract.
        unsafe { self.deallocate(ptr.cast(), layout) };
    }

    #[must_use]
    pub fn tag(&self) -> MemoryTag {
        self.tag
    }
}
