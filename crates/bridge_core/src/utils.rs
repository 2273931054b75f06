//! Utility functions and factory helpers.
//!
//! This module provides convenient constructors for wiring the store, the
//! client and the coordinator together from a [`CoreConfig`].

use crate::catalog::RoleCatalog;
use crate::client::IntegrationClient;
use crate::config::CoreConfig;
use crate::coordinator::{ActionCoordinator, BridgeContext};
use crate::error::StoreError;
use crate::store::FileIdentityStore;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
///
/// A clock set before the epoch yields 0 rather than failing.
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Creates a context backed by the file store and the TCP control client.
///
/// Opens (and loads) the store file named in `config.store`, plus the role
/// catalog when one is configured. No network connection is made until the
/// first remote call.
///
/// # Arguments
///
/// * `config` - Fully populated core configuration
///
/// # Returns
///
/// A ready [`BridgeContext`], or the [`StoreError`] raised while loading.
pub async fn create_context(config: &CoreConfig) -> Result<BridgeContext, StoreError> {
    let store = FileIdentityStore::open_with_config(&config.store).await?;
    let client = IntegrationClient::connect(&config.remote, &config.client);
    let context = BridgeContext::new(Arc::new(store), Arc::new(client));

    match &config.store.role_catalog {
        Some(path) => Ok(context.with_catalog(RoleCatalog::load(path).await?)),
        None => Ok(context),
    }
}

/// Creates a coordinator over [`create_context`].
pub async fn create_coordinator(config: &CoreConfig) -> Result<ActionCoordinator, StoreError> {
    Ok(ActionCoordinator::new(create_context(config).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(current_timestamp_millis() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn test_create_context_opens_missing_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = CoreConfig::default();
        config.store.path = dir.path().join("identities.txt");

        let coordinator = create_coordinator(&config).await.unwrap();
        assert!(coordinator.show("nobody").await.unwrap().is_none());
        assert_eq!(coordinator.context().client.stats().calls_issued, 0);
        assert!(coordinator.context().catalog.is_none());
    }

    #[tokio::test]
    async fn test_create_context_loads_role_catalog() {
        let dir = tempfile::TempDir::new().unwrap();
        let catalog_path = dir.path().join("roles.txt");
        std::fs::write(&catalog_path, "mentor|Mentor|Helps new players\n").unwrap();

        let mut config = CoreConfig::default();
        config.store.path = dir.path().join("identities.txt");
        config.store.role_catalog = Some(catalog_path);

        let context = create_context(&config).await.unwrap();
        let catalog = context.catalog.expect("catalog configured");
        assert!(catalog.exists("mentor"));
        assert!(!catalog.exists("admin"));
    }
}
