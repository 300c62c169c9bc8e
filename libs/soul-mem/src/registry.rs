// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::manager::{MemoryAccounting, MemoryManager};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

static SLOT: RwLock<Option<Arc<dyn MemoryAccounting>>> = RwLock::new(None);
static DEFAULT: OnceLock<Arc<MemoryManager>> = OnceLock::new();

/// Process-wide *current accountant* slot.
///
/// Three states: installed (a caller-owned accountant), default (the lazily
/// created built-in [`MemoryManager`]), and reset. [`current`][Self::current]
/// never observes an empty slot: a reset slot resolves to the default
/// manager. The slot lock is the single linearization point for concurrent
/// installs.
pub struct MemoryRegistry;

impl MemoryRegistry {
    /// Resolves the current accountant.
    #[must_use]
    pub fn current() -> Arc<dyn MemoryAccounting> {
        let slot = SLOT.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(installed) = slot.as_ref() {
            return Arc::clone(installed);
        }
        drop(slot);

        Arc::clone(Self::default_manager()) as Arc<dyn MemoryAccounting>
    }

    /// Installs a caller-owned accountant as the current one.
    pub fn install(manager: Arc<dyn MemoryAccounting>) {
        *SLOT.write().unwrap_or_else(PoisonError::into_inner) = Some(manager);
    }

    /// Clears any installed accountant; subsequent resolutions fall back to
    /// the built-in default manager.
    pub fn reset() {
        *SLOT.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn default_manager() -> &'static Arc<MemoryManager> {
        DEFAULT.get_or_init(|| Arc::new(MemoryManager::new()))
    }
}

/// How an allocator finds its accountant.
///
/// `Registry` re-resolves through [`MemoryRegistry`] on every operation, so
/// an allocator outliving an installed manager simply falls back to whatever
/// is current at that point. `Pinned` keeps one accountant alive for the
/// allocator's lifetime.
#[derive(Clone)]
pub enum AccountantHandle {
    Registry,
    Pinned(Arc<dyn MemoryAccounting>),
}

impl AccountantHandle {
    pub(crate) fn resolve(&self) -> Arc<dyn MemoryAccounting> {
        match self {
            AccountantHandle::Registry => MemoryRegistry::current(),
            AccountantHandle::Pinned(accountant) => Arc::clone(accountant),
        }
    }
}

impl core::fmt::Debug for AccountantHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AccountantHandle::Registry => f.write_str("AccountantHandle::Registry"),
            AccountantHandle::Pinned(_) => f.write_str("AccountantHandle::Pinned(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::MemoryTag;
    use std::sync::Mutex;

    // The registry is process-global; serialize the tests that touch it.
    static REGISTRY_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn current_never_empty() {
        let _guard = REGISTRY_GUARD.lock().unwrap_or_else(PoisonError::into_inner);
        MemoryRegistry::reset();

        let manager = MemoryRegistry::current();
        manager.register_allocation(0x42, 8, MemoryTag::literal("RegistryTest"));
        assert_eq!(manager.allocation_size(0x42), 8);
        manager.unregister_allocation(0x42);
    }

    #[test]
    fn install_and_reset_swap_the_slot() {
        let _guard = REGISTRY_GUARD.lock().unwrap_or_else(PoisonError::into_inner);

        let installed = Arc::new(MemoryManager::new());
        MemoryRegistry::install(installed.clone());
        MemoryRegistry::current().register_allocation(0x99, 24, MemoryTag::literal("Installed"));
        assert_eq!(installed.allocation_size(0x99), 24);

        MemoryRegistry::reset();
        assert_eq!(MemoryRegistry::current().allocation_size(0x99), 0);

        installed.clear();
    }
}
