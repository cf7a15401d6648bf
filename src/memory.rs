//! Process-wide memory accounting shared by every range.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a [`MemoryTracker`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct MemorySnapshot {
    /// Bytes of cell data held in caches.
    pub memory: u64,
    /// Cells held in caches.
    pub items: u64,
}

/// Atomic counters of cache memory, injected into every range.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    memory: AtomicU64,
    items: AtomicU64,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_memory(&self, bytes: u64) {
        self.memory.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_items(&self, items: u64) {
        self.items.fetch_add(items, Ordering::Relaxed);
    }

    /// Release `bytes`, saturating at zero.
    pub fn remove_memory(&self, bytes: u64) {
        let _ = self
            .memory
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub fn remove_items(&self, items: u64) {
        let _ = self
            .items
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |held| {
                Some(held.saturating_sub(items))
            });
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            memory: self.memory.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
        }
    }
}
