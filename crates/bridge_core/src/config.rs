//! Core configuration types and defaults.
//!
//! These structures are consumed, not loaded, by the core: the application
//! crate reads them from TOML and hands them over fully populated.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for the integration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Remote control interface endpoint and credentials
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Per-call timeout, retry and deduplication behaviour
    #[serde(default)]
    pub client: ClientConfig,

    /// Identity store location and write deadline
    #[serde(default)]
    pub store: StoreConfig,
}

/// Where the game server's control interface lives and how to log in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// `host:port` of the control interface
    #[serde(default = "default_remote_address")]
    pub address: String,

    /// Token presented in the session handshake
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Timeout for establishing and authenticating a session, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum number of concurrently open sessions
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

/// Behaviour of individual remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Time to wait for a response before reporting `Timeout`, in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Extra attempts allowed for idempotent actions
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Factor applied to the delay after every retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Upper bound for a single retry delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long a completed result answers identical requests, in milliseconds
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
}

/// Where identity records are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the store file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Deadline for a single commit, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Catalog of grantable roles; when unset any valid role tag may be granted
    #[serde(default)]
    pub role_catalog: Option<PathBuf>,
}

fn default_remote_address() -> String {
    "127.0.0.1:1212".to_string()
}
fn default_connect_timeout_ms() -> u64 { 3000 }
fn default_pool_size() -> usize { 4 }
fn default_call_timeout_ms() -> u64 { 2000 }
fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_backoff_multiplier() -> u32 { 2 }
fn default_max_backoff_ms() -> u64 { 2000 }
fn default_dedup_window_ms() -> u64 { 5000 }
fn default_store_path() -> PathBuf {
    PathBuf::from("data/identities.txt")
}
fn default_write_timeout_ms() -> u64 { 5000 }

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: default_remote_address(),
            auth_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            write_timeout_ms: default_write_timeout_ms(),
            role_catalog: None,
        }
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

impl CoreConfig {
    /// Checks values that would make the core misbehave at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.remote.address.trim().is_empty() {
            return Err("remote.address cannot be empty".to_string());
        }
        if self.remote.pool_size == 0 {
            return Err("remote.pool_size must be greater than 0".to_string());
        }
        if self.client.call_timeout_ms == 0 {
            return Err("client.call_timeout_ms must be greater than 0".to_string());
        }
        if self.client.backoff_multiplier == 0 {
            return Err("client.backoff_multiplier must be at least 1".to_string());
        }
        if self.client.initial_backoff_ms > self.client.max_backoff_ms {
            return Err("client.initial_backoff_ms cannot exceed client.max_backoff_ms".to_string());
        }
        if self.store.path.as_os_str().is_empty() {
            return Err("store.path cannot be empty".to_string());
        }
        if self.store.write_timeout_ms == 0 {
            return Err("store.write_timeout_ms must be greater than 0".to_string());
        }
        if matches!(&self.store.role_catalog, Some(path) if path.as_os_str().is_empty()) {
            return Err("store.role_catalog cannot be empty when set".to_string());
        }
        Ok(())
    }
}
