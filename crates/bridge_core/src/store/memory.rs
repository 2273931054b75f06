//! In-memory identity store used for substitution in tests and dry runs.

use super::record::{apply_mutator, IdentityRecord};
use super::{IdentityStore, Mutator, Scan};
use crate::error::StoreError;
use crate::identifier::Identifier;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

/// Non-durable [`IdentityStore`] backed by a `BTreeMap`.
///
/// Every write holds the map's write lock while the mutator runs, so updates
/// are trivially linearized.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: RwLock<BTreeMap<Identifier, IdentityRecord>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    async fn write(
        &self,
        id: &Identifier,
        expected_version: Option<Option<u64>>,
        mutator: Mutator,
    ) -> Result<IdentityRecord, StoreError> {
        let mut records = self.records.write().await;
        let current = records.get(id).cloned();

        if let Some(expected) = expected_version {
            let found = current.as_ref().map(|r| r.version);
            if found != expected {
                return Err(StoreError::ConcurrentConflict { expected, found });
            }
        }

        let next = apply_mutator(id, current, mutator)?;
        records.insert(id.clone(), next.clone());
        Ok(next)
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get(&self, id: &Identifier) -> Result<IdentityRecord, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn upsert(&self, id: &Identifier, mutator: Mutator) -> Result<IdentityRecord, StoreError> {
        self.write(id, None, mutator).await
    }

    async fn compare_and_upsert(
        &self,
        id: &Identifier,
        expected_version: Option<u64>,
        mutator: Mutator,
    ) -> Result<IdentityRecord, StoreError> {
        self.write(id, Some(expected_version), mutator).await
    }

    async fn remove(&self, id: &Identifier, reason: &str) -> Result<IdentityRecord, StoreError> {
        let removed = self
            .records
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        info!(target: "audit", identifier = %id, reason, "identity record deleted");
        Ok(removed)
    }

    async fn scan(&self) -> Result<Scan, StoreError> {
        let snapshot = self.records.read().await.values().cloned().collect();
        Ok(Scan::from_records(snapshot))
    }
}
