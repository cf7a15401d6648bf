use std::sync::Arc;

use crate::{
    access_group::{AccessGroupFactory, CacheAccessGroupFactory},
    cellstore::CellStoreOpener,
    commit_log::LogStore,
    master::MasterClient,
    memory::MemoryTracker,
    metadata::MetadataStore,
    option::RangeOptions,
};

/// Collaborators shared by every range of one range server.
#[derive(Clone)]
pub struct RangeServerContext {
    pub(crate) options: RangeOptions,
    pub(crate) log_store: Arc<dyn LogStore>,
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) master: Arc<dyn MasterClient>,
    pub(crate) cell_stores: Arc<dyn CellStoreOpener>,
    pub(crate) access_groups: Arc<dyn AccessGroupFactory>,
    pub(crate) memory: Arc<MemoryTracker>,
}

impl RangeServerContext {
    pub fn new(
        options: RangeOptions,
        log_store: Arc<dyn LogStore>,
        metadata: Arc<dyn MetadataStore>,
        master: Arc<dyn MasterClient>,
        cell_stores: Arc<dyn CellStoreOpener>,
    ) -> Self {
        Self {
            options,
            log_store,
            metadata,
            master,
            cell_stores,
            access_groups: Arc::new(CacheAccessGroupFactory),
            memory: Arc::new(MemoryTracker::new()),
        }
    }

    /// Replace the factory building each range's access groups.
    pub fn with_access_group_factory(self, access_groups: Arc<dyn AccessGroupFactory>) -> Self {
        Self {
            access_groups,
            ..self
        }
    }

    /// Share an existing memory tracker.
    pub fn with_memory_tracker(self, memory: Arc<MemoryTracker>) -> Self {
        Self { memory, ..self }
    }

    pub fn options(&self) -> &RangeOptions {
        &self.options
    }

    pub fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }
}
