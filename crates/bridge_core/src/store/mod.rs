//! Identity Store: durable mapping from [`Identifier`] to [`IdentityRecord`].
//!
//! The [`IdentityStore`] trait is the capability contract every backend
//! satisfies. [`FileIdentityStore`] is the production backend (one
//! checksummed line per record, atomic replace on every commit);
//! [`MemoryIdentityStore`] exists for substitution in tests.
//!
//! ## Guarantees
//!
//! * Updates to the same identifier are linearized; `version` grows by one
//!   per committed update and no update is lost.
//! * Readers observe either the state before or after a commit, never a
//!   partial one.
//! * Corrupt entries are skipped with a warning; the rest of the store stays
//!   usable.

use crate::error::StoreError;
use crate::identifier::Identifier;
use async_trait::async_trait;
use tracing::info;

pub mod codec;
pub mod file;
pub mod memory;
pub mod record;
pub mod scan;

pub use file::FileIdentityStore;
pub use memory::MemoryIdentityStore;
pub use record::IdentityRecord;
pub use scan::{CorruptLine, Scan};

/// Update function handed to [`IdentityStore::upsert`].
///
/// Receives the current record (or `None`) and returns the desired record.
/// The store stamps `version` and `last_modified` itself.
pub type Mutator = Box<dyn FnOnce(Option<IdentityRecord>) -> IdentityRecord + Send>;

/// Capability contract for identity persistence backends.
#[async_trait]
pub trait IdentityStore: Send + Sync + std::fmt::Debug {
    /// Returns the record for `id`, or [`StoreError::NotFound`].
    async fn get(&self, id: &Identifier) -> Result<IdentityRecord, StoreError>;

    /// Applies `mutator` to the current record and commits the result atomically.
    async fn upsert(&self, id: &Identifier, mutator: Mutator) -> Result<IdentityRecord, StoreError>;

    /// Like [`upsert`](Self::upsert), but only if the stored version still
    /// equals `expected_version` (`None` meaning "no record yet").
    ///
    /// Fails with [`StoreError::ConcurrentConflict`] otherwise.
    async fn compare_and_upsert(
        &self,
        id: &Identifier,
        expected_version: Option<u64>,
        mutator: Mutator,
    ) -> Result<IdentityRecord, StoreError>;

    /// Explicitly deletes a record. The deletion and its reason are audited.
    async fn remove(&self, id: &Identifier, reason: &str) -> Result<IdentityRecord, StoreError>;

    /// Iterates every record of a consistent snapshot.
    async fn scan(&self) -> Result<Scan, StoreError>;

    /// [`get`](Self::get) with a miss mapped to `Ok(None)`.
    async fn lookup(&self, id: &Identifier) -> Result<Option<IdentityRecord>, StoreError> {
        match self.get(id).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Finds the first record whose cache field `field` equals `value`.
    async fn find_by_cache_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        let wanted = value.trim();
        Ok(self
            .scan()
            .await?
            .find(|record| record.cache_field(field).map(str::trim) == Some(wanted)))
    }

    /// Removes `role` from every record holding it. Returns how many changed.
    ///
    /// Each record is updated with an optimistic version check so a record
    /// deleted concurrently is not resurrected.
    async fn remove_role_everywhere(&self, role: &str) -> Result<usize, StoreError> {
        let holders: Vec<Identifier> = self
            .scan()
            .await?
            .filter(|record| record.has_role(role))
            .map(|record| record.identifier)
            .collect();

        let mut removed = 0;
        for id in holders {
            loop {
                let Some(current) = self.lookup(&id).await? else { break };
                if !current.has_role(role) {
                    break;
                }

                let expected = current.version;
                let tag = role.to_string();
                let mutator: Mutator = Box::new(move |existing: Option<IdentityRecord>| {
                    let mut record = existing.unwrap_or(current);
                    record.revoke_role(&tag);
                    record
                });
                match self.compare_and_upsert(&id, Some(expected), mutator).await {
                    Ok(_) => {
                        removed += 1;
                        break;
                    }
                    Err(StoreError::ConcurrentConflict { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        if removed > 0 {
            info!("🧹 Removed role '{}' from {} identities", record::normalize_role(role), removed);
        }
        Ok(removed)
    }
}
