//! Persistence boundary

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Transition, Workload, WorkloadId};

/// Keyed store of workload records.
///
/// Each method is atomic for the record it touches; there are no
/// cross-record guarantees.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get(&self, id: &WorkloadId) -> Result<Option<Workload>, StoreError>;

    async fn list(&self) -> Result<Vec<Workload>, StoreError>;

    /// Insert a new record; fails if the id is taken
    async fn insert(&self, workload: Workload) -> Result<(), StoreError>;

    /// Apply a status transition and bump `updated_at`.
    ///
    /// Returns `Ok(None)` when the transition is not legal from the current
    /// status; the record is left untouched in that case.
    async fn apply_transition(
        &self,
        id: &WorkloadId,
        transition: Transition,
    ) -> Result<Option<Workload>, StoreError>;

    /// Replace the flavor settings and bump `updated_at`
    async fn update_settings(
        &self,
        id: &WorkloadId,
        settings: BTreeMap<String, String>,
    ) -> Result<Workload, StoreError>;

    /// Remove a record, returning it if it existed
    async fn delete(&self, id: &WorkloadId) -> Result<Option<Workload>, StoreError>;
}
