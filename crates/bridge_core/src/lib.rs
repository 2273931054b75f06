//! # Bridge Core - Game Server Integration
//!
//! The stateful core behind a chat-driven administration bot for a
//! multiplayer game server. It turns "grant this player a role" or "kick
//! that player" into a store update plus a remote control call, and keeps
//! both correct under concurrent requests, partial failure and untrusted
//! input.
//!
//! ## Components
//!
//! * **Identifier Normalizer** ([`identifier`]) - Canonicalizes raw player
//!   identifiers and rejects anything outside the allowlist
//! * **Identity Store** ([`store`]) - Durable identifier → record mapping with
//!   atomic, per-identifier linearized updates and corruption-tolerant reads
//! * **Integration Client** ([`client`]) - Timeout-bounded, deduplicated
//!   calls to the game server's control interface
//! * **Action Coordinator** ([`coordinator`]) - Sequences the above and
//!   produces exactly one [`ActionResult`] per request
//! * **Role Catalog** ([`catalog`]) - Optional list of the roles that may
//!   be granted
//!
//! ## Request Flow
//!
//! 1. The front end calls [`ActionCoordinator::execute`] with a raw identifier
//!    and an [`Action`]
//! 2. The identifier is normalized and the payload validated
//! 3. The Identity Store is updated (role changes) or consulted (everything else)
//! 4. The Integration Client performs the remote call, collapsing identical
//!    concurrent requests onto one
//! 5. The outcome is returned as `Success`, `RemoteFailure`, `StoreFailure`,
//!    `Rejected` or `Timeout`
//!
//! ```rust
//! # #[tokio::main]
//! # async fn main() {
//! use bridge_core::identifier::normalize;
//!
//! let id = normalize("  SomeCkey99 ").unwrap();
//! assert_eq!(id.as_str(), "someckey99");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Failures are values, never panics. Bad input is a [`RejectedError`],
//! persistence problems are [`StoreError`]s, and remote problems become a
//! [`RemoteFailureReason`] inside the result. A `Timeout` means the wait was
//! abandoned: the remote side may still have applied the action.
//!
//! ## Thread Safety
//!
//! * The file store serializes updates per identifier with a `DashMap` of
//!   async mutexes and publishes snapshots through an `RwLock`
//! * The client shares an in-flight table and a result cache between all
//!   clones, and bounds open sessions with a semaphore
//! * Collaborators are handed around explicitly in a [`BridgeContext`]

// Re-export core types and functions for easy access
pub use action::{Action, ActionRequest, ActionResult, IdempotencyKey};
pub use catalog::{RoleCatalog, RoleDefinition};
pub use client::{ClientStats, ControlTransport, IntegrationClient, TcpTransport};
pub use config::{ClientConfig, CoreConfig, RemoteConfig, StoreConfig};
pub use coordinator::{ActionCoordinator, BridgeContext};
pub use error::{BridgeError, RejectedError, RemoteFailureReason, StoreError, TransportError};
pub use identifier::{normalize, Identifier};
pub use policy::{can_perform, CallerContext, PermissionPolicy};
pub use store::{FileIdentityStore, IdentityRecord, IdentityStore, MemoryIdentityStore};
pub use utils::{create_context, create_coordinator};

// Public module declarations
pub mod action;
pub mod catalog;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identifier;
pub mod policy;
pub mod store;
pub mod utils;
