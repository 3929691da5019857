//! JSON file-backed workload store
//!
//! The whole record set lives in one file and is rewritten on every change.
//! Writes go to a sibling temp file first and are renamed into place.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use gs_core::error::StoreError;
use gs_core::time::current_time_millis;
use gs_core::traits::WorkloadStore;
use gs_core::types::{Transition, Workload, WorkloadId};

/// Persistent store backed by a JSON array of workload records
pub struct JsonFileStore {
    path: PathBuf,
    /// Loaded records; the lock also serialises file writes
    records: Mutex<HashMap<WorkloadId, Workload>>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => HashMap::new(),
            Ok(bytes) => {
                let list: Vec<Workload> = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Serialization(format!("{}: {}", path.display(), e))
                })?;
                list.into_iter().map(|w| (w.id, w)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", path.display(), e))),
        };

        tracing::debug!("Loaded {} workloads from {:?}", records.len(), path);
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &HashMap<WorkloadId, Workload>) -> Result<(), StoreError> {
        let mut list: Vec<&Workload> = records.values().collect();
        list.sort_by_key(|w| (w.created_at, w.id));
        let json = serde_json::to_vec_pretty(&list)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(format!("{}: {}", parent.display(), e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for JsonFileStore {
    async fn get(&self, id: &WorkloadId) -> Result<Option<Workload>, StoreError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workload>, StoreError> {
        let records = self.records.lock().await;
        let mut all: Vec<Workload> = records.values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }

    async fn insert(&self, workload: Workload) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&workload.id) {
            return Err(StoreError::AlreadyExists(workload.id));
        }
        let id = workload.id;
        records.insert(id, workload);
        if let Err(e) = self.persist(&records).await {
            records.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    async fn apply_transition(
        &self,
        id: &WorkloadId,
        transition: Transition,
    ) -> Result<Option<Workload>, StoreError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        let Some(next) = record.status.apply(transition) else {
            return Ok(None);
        };

        let previous = record.clone();
        record.status = next;
        record.updated_at = current_time_millis();
        let updated = record.clone();

        if let Err(e) = self.persist(&records).await {
            records.insert(*id, previous);
            return Err(e);
        }
        Ok(Some(updated))
    }

    async fn update_settings(
        &self,
        id: &WorkloadId,
        settings: BTreeMap<String, String>,
    ) -> Result<Workload, StoreError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(id).ok_or(StoreError::NotFound(*id))?;

        let previous = record.clone();
        record.settings = settings;
        record.updated_at = current_time_millis();
        let updated = record.clone();

        if let Err(e) = self.persist(&records).await {
            records.insert(*id, previous);
            return Err(e);
        }
        Ok(updated)
    }

    async fn delete(&self, id: &WorkloadId) -> Result<Option<Workload>, StoreError> {
        let mut records = self.records.lock().await;
        let Some(removed) = records.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&records).await {
            records.insert(*id, removed);
            return Err(e);
        }
        Ok(Some(removed))
    }
}
