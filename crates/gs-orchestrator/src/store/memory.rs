//! In-memory workload store

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use gs_core::error::StoreError;
use gs_core::time::current_time_millis;
use gs_core::traits::WorkloadStore;
use gs_core::types::{Transition, Workload, WorkloadId};

/// Workload records held in a concurrent map
pub struct MemoryStore {
    workloads: DashMap<WorkloadId, Workload>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            workloads: DashMap::new(),
        }
    }

    /// Build a store pre-filled with `workloads`
    pub fn with_workloads(workloads: impl IntoIterator<Item = Workload>) -> Self {
        let store = Self::new();
        for workload in workloads {
            store.workloads.insert(workload.id, workload);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadStore for MemoryStore {
    async fn get(&self, id: &WorkloadId) -> Result<Option<Workload>, StoreError> {
        Ok(self.workloads.get(id).map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<Workload>, StoreError> {
        let mut all: Vec<Workload> = self.workloads.iter().map(|r| r.clone()).collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }

    async fn insert(&self, workload: Workload) -> Result<(), StoreError> {
        match self.workloads.entry(workload.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(workload.id)),
            Entry::Vacant(slot) => {
                slot.insert(workload);
                Ok(())
            }
        }
    }

    async fn apply_transition(
        &self,
        id: &WorkloadId,
        transition: Transition,
    ) -> Result<Option<Workload>, StoreError> {
        let mut record = self.workloads.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        match record.status.apply(transition) {
            Some(next) => {
                record.status = next;
                record.updated_at = current_time_millis();
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_settings(
        &self,
        id: &WorkloadId,
        settings: BTreeMap<String, String>,
    ) -> Result<Workload, StoreError> {
        let mut record = self.workloads.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        record.settings = settings;
        record.updated_at = current_time_millis();
        Ok(record.clone())
    }

    async fn delete(&self, id: &WorkloadId) -> Result<Option<Workload>, StoreError> {
        Ok(self.workloads.remove(id).map(|(_, w)| w))
    }
}
