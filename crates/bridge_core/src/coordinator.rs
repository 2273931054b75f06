//! Action Coordinator: the single entry point the front end calls.
//!
//! Every request moves through the same states:
//!
//! ```text
//! Received -> Normalized -> [StoreUpdate | StoreLookup] -> RemoteInvoke -> outcome
//!     \-> Rejected            \-> StoreFailure
//! ```
//!
//! The store is always consulted before the remote side is contacted. A
//! store failure means the remote call is never attempted. A remote failure
//! or timeout after a store update is not rolled back; re-submitting the
//! same request is safe because the store step and the client are both
//! idempotent per request.

use crate::action::{Action, ActionRequest, ActionResult};
use crate::catalog::RoleCatalog;
use crate::client::IntegrationClient;
use crate::error::{BridgeError, RejectedError, StoreError};
use crate::identifier::{normalize, Identifier};
use crate::policy::{can_perform, CallerContext, PermissionPolicy};
use crate::store::{IdentityRecord, IdentityStore, Mutator};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache field holding the player's linked chat nickname.
pub const ALIAS_FIELD: &str = "alias";

/// Cache field holding the player's OOC name colour.
pub const NAME_COLOR_FIELD: &str = "name_color";

/// Collaborators shared by every request, passed explicitly.
#[derive(Debug, Clone)]
pub struct BridgeContext {
    pub store: Arc<dyn IdentityStore>,
    pub client: Arc<IntegrationClient>,
    /// Grantable roles; `None` allows any valid role tag
    pub catalog: Option<Arc<RoleCatalog>>,
}

impl BridgeContext {
    pub fn new(store: Arc<dyn IdentityStore>, client: Arc<IntegrationClient>) -> Self {
        Self {
            store,
            client,
            catalog: None,
        }
    }

    /// Restricts role grants to the roles listed in `catalog`.
    pub fn with_catalog(mut self, catalog: RoleCatalog) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }
}

/// Sequences normalization, the store step and the remote call.
#[derive(Debug, Clone)]
pub struct ActionCoordinator {
    context: BridgeContext,
}

impl ActionCoordinator {
    pub fn new(context: BridgeContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.context
    }

    /// Performs `action` against the player named by `raw_identifier`.
    ///
    /// Exactly one [`ActionResult`] is produced. `Timeout` means the remote
    /// side may still have applied the action.
    pub async fn execute(&self, raw_identifier: &str, action: Action) -> ActionResult {
        debug!(raw = raw_identifier, action = action.kind_name(), "state: received");

        let target = match normalize(raw_identifier) {
            Ok(id) => id,
            Err(e) => {
                debug!(raw = raw_identifier, "state: rejected ({})", e);
                return ActionResult::Rejected(e);
            }
        };
        let request = match ActionRequest::new(target, action).and_then(|r| self.check_catalog(r)) {
            Ok(request) => request,
            Err(e) => {
                debug!("state: rejected ({})", e);
                return ActionResult::Rejected(e);
            }
        };
        debug!(
            identifier = %request.target(),
            key = %request.idempotency_key(),
            "state: normalized"
        );

        if let Err(e) = self.store_step(&request).await {
            warn!("💾 Store step for {} on {} failed: {}", request.action().kind_name(), request.target(), e);
            return ActionResult::StoreFailure(e.to_string());
        }

        debug!(identifier = %request.target(), "state: remote invoke");
        let result = self.context.client.dispatch(&request).await;
        debug!(identifier = %request.target(), outcome = result.kind_label(), "state: done");
        result
    }

    /// [`execute`](Self::execute) preceded by the permission check.
    pub async fn execute_as(
        &self,
        caller: &CallerContext,
        policy: &PermissionPolicy,
        raw_identifier: &str,
        action: Action,
    ) -> ActionResult {
        if !can_perform(caller, &action, policy) {
            warn!(target: "audit", caller = %caller.name, action = action.kind_name(), "⛔ Action denied");
            return ActionResult::Rejected(RejectedError::NotPermitted {
                caller: caller.name.clone(),
                action: action.kind_name().to_string(),
            });
        }
        info!(target: "audit", caller = %caller.name, action = action.kind_name(), target_id = raw_identifier, "action requested");
        self.execute(raw_identifier, action).await
    }

    /// Only grants are checked; revoking an uncatalogued role stays possible.
    fn check_catalog(&self, request: ActionRequest) -> Result<ActionRequest, RejectedError> {
        match (&self.context.catalog, request.action()) {
            (Some(catalog), Action::GrantRole { role }) if !catalog.exists(role) => {
                Err(RejectedError::UnknownRole(role.clone()))
            }
            _ => Ok(request),
        }
    }

    async fn store_step(&self, request: &ActionRequest) -> Result<(), StoreError> {
        let id = request.target();
        match request.action() {
            Action::GrantRole { role } => {
                debug!(identifier = %id, "state: store update");
                self.update_role(id, role, true).await.map(|_| ())
            }
            Action::RevokeRole { role } => {
                debug!(identifier = %id, "state: store update");
                self.update_role(id, role, false).await.map(|_| ())
            }
            Action::Kick { .. } | Action::Broadcast { .. } | Action::Custom { .. } => {
                debug!(identifier = %id, "state: store lookup");
                self.context.store.lookup(id).await.map(|_| ())
            }
        }
    }

    /// Grants or revokes `role`, committing only when the record changes.
    ///
    /// Uses the version check so a concurrent writer cannot slip in between
    /// the presence test and the commit.
    async fn update_role(
        &self,
        id: &Identifier,
        role: &str,
        grant: bool,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        let store = &self.context.store;
        loop {
            let current = store.lookup(id).await?;
            let needs_change = match &current {
                Some(record) => record.has_role(role) != grant,
                None => grant,
            };
            if !needs_change {
                debug!(identifier = %id, role, "role already in requested state");
                return Ok(None);
            }

            let expected = current.as_ref().map(|r| r.version);
            let target = id.clone();
            let tag = role.to_string();
            let mutator: Mutator = Box::new(move |existing: Option<IdentityRecord>| {
                let mut record = existing.unwrap_or_else(|| IdentityRecord::new(target));
                if grant {
                    record.grant_role(&tag);
                } else {
                    record.revoke_role(&tag);
                }
                record
            });

            match store.compare_and_upsert(id, expected, mutator).await {
                Ok(record) => {
                    info!(
                        "💾 {} role '{}' {} {} (version {})",
                        if grant { "Granted" } else { "Revoked" },
                        role,
                        if grant { "to" } else { "from" },
                        id,
                        record.version
                    );
                    return Ok(Some(record));
                }
                Err(StoreError::ConcurrentConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the record for `raw_identifier`, if any.
    pub async fn show(&self, raw_identifier: &str) -> Result<Option<IdentityRecord>, BridgeError> {
        let id = normalize(raw_identifier)?;
        Ok(self.context.store.lookup(&id).await?)
    }

    /// Stores (or with `None`, clears) the player's credential.
    pub async fn set_token(&self, raw_identifier: &str, token: Option<&str>) -> ActionResult {
        let token = token.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
        let detail = match &token {
            Some(_) => "token stored",
            None => "token cleared",
        };
        self.update_record(raw_identifier, detail, move |record| record.token = token)
            .await
    }

    /// Sets the player's name colour. `color` must be `#RRGGBB`.
    pub async fn set_name_color(&self, raw_identifier: &str, color: &str) -> ActionResult {
        let color = match parse_hex_color(color) {
            Ok(color) => color,
            Err(e) => return ActionResult::Rejected(e),
        };
        let detail = format!("name colour set to {color}");
        self.update_record(raw_identifier, &detail, move |record| {
            record.cache_fields.insert(NAME_COLOR_FIELD.to_string(), color);
        })
        .await
    }

    /// Links a chat nickname to the player.
    pub async fn link_alias(&self, raw_identifier: &str, alias: &str) -> ActionResult {
        let alias = alias.trim().to_string();
        if alias.is_empty() {
            return ActionResult::Rejected(RejectedError::InvalidPayload("alias is empty".into()));
        }
        let detail = format!("linked to alias {alias:?}");
        self.update_record(raw_identifier, &detail, move |record| {
            record.cache_fields.insert(ALIAS_FIELD.to_string(), alias);
        })
        .await
    }

    /// Finds the player linked to the chat nickname `alias`.
    pub async fn lookup_alias(&self, alias: &str) -> Result<Option<IdentityRecord>, BridgeError> {
        if alias.trim().is_empty() {
            return Err(RejectedError::InvalidPayload("alias is empty".into()).into());
        }
        Ok(self.context.store.find_by_cache_field(ALIAS_FIELD, alias).await?)
    }

    /// Removes `role` from every stored record. Returns how many changed.
    pub async fn revoke_role_everywhere(&self, role: &str) -> Result<usize, BridgeError> {
        let role = normalize(role)
            .map_err(|e| RejectedError::InvalidPayload(format!("role tag: {e}")))?;
        Ok(self.context.store.remove_role_everywhere(role.as_str()).await?)
    }

    /// Deletes the player's record, recording `reason` in the audit log.
    pub async fn forget(&self, raw_identifier: &str, reason: &str) -> Result<IdentityRecord, BridgeError> {
        let id = normalize(raw_identifier)?;
        Ok(self.context.store.remove(&id, reason).await?)
    }

    async fn update_record<F>(&self, raw_identifier: &str, detail: &str, change: F) -> ActionResult
    where
        F: FnOnce(&mut IdentityRecord) + Send + 'static,
    {
        let id = match normalize(raw_identifier) {
            Ok(id) => id,
            Err(e) => return ActionResult::Rejected(e),
        };
        let target = id.clone();
        let mutator: Mutator = Box::new(move |existing: Option<IdentityRecord>| {
            let mut record = existing.unwrap_or_else(|| IdentityRecord::new(target));
            change(&mut record);
            record
        });

        match self.context.store.upsert(&id, mutator).await {
            Ok(record) => {
                info!("💾 Updated {} (version {}): {}", id, record.version, detail);
                ActionResult::Success(format!("{id}: {detail}"))
            }
            Err(e) => ActionResult::StoreFailure(e.to_string()),
        }
    }
}

/// Accepts `#RRGGBB` (case-insensitive) and returns it lower-cased.
fn parse_hex_color(input: &str) -> Result<String, RejectedError> {
    let trimmed = input.trim();
    let valid = trimmed.len() == 7
        && trimmed.starts_with('#')
        && trimmed[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err(RejectedError::InvalidPayload(format!(
            "colour {trimmed:?} is not in #RRGGBB form"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ControlRequest, ControlResponse, ControlTransport};
    use crate::config::ClientConfig;
    use crate::error::{RemoteFailureReason, TransportError};
    use crate::store::{MemoryIdentityStore, Scan};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every frame and answers according to `mode`.
    #[derive(Debug)]
    struct RecordingTransport {
        frames: Mutex<Vec<ControlRequest>>,
        mode: Mode,
    }

    #[derive(Debug, Clone, Copy)]
    enum Mode {
        Accept,
        Refuse,
        Hang,
    }

    impl RecordingTransport {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                mode,
            })
        }

        fn frame_count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ControlTransport for RecordingTransport {
        async fn call(&self, request: &ControlRequest) -> Result<ControlResponse, TransportError> {
            self.frames.lock().unwrap().push(request.clone());
            match self.mode {
                Mode::Accept => Ok(ControlResponse::success(request.correlation.clone(), "applied")),
                Mode::Refuse => Ok(ControlResponse::refused(request.correlation.clone(), "denied", "not today")),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(TransportError::Io("unreachable".into()))
                }
            }
        }
    }

    /// Store whose every operation fails with an I/O error.
    #[derive(Debug, Default)]
    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityStore for BrokenStore {
        async fn get(&self, _id: &Identifier) -> Result<IdentityRecord, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into())
        }
        async fn upsert(&self, _id: &Identifier, _m: Mutator) -> Result<IdentityRecord, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into())
        }
        async fn compare_and_upsert(
            &self,
            _id: &Identifier,
            _expected: Option<u64>,
            _m: Mutator,
        ) -> Result<IdentityRecord, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into())
        }
        async fn remove(&self, _id: &Identifier, _reason: &str) -> Result<IdentityRecord, StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into())
        }
        async fn scan(&self) -> Result<Scan, StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire").into())
        }
    }

    fn client_config() -> ClientConfig {
        ClientConfig {
            call_timeout_ms: 200,
            max_retries: 0,
            ..ClientConfig::default()
        }
    }

    fn coordinator(store: Arc<dyn IdentityStore>, transport: Arc<RecordingTransport>) -> ActionCoordinator {
        let client = Arc::new(IntegrationClient::new(transport, &client_config()));
        ActionCoordinator::new(BridgeContext::new(store, client))
    }

    #[tokio::test]
    async fn test_grant_updates_store_then_remote() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Accept);
        let coordinator = coordinator(store.clone(), transport.clone());

        let result = coordinator
            .execute(" SomeCkey99 ", Action::GrantRole { role: "admin".into() })
            .await;
        assert!(result.is_success(), "{result:?}");

        let id = normalize("someckey99").unwrap();
        let record = store.get(&id).await.unwrap();
        assert!(record.has_role("admin"));
        assert_eq!(record.version, 1);

        let frames = transport.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload["ckey"], "someckey99");
    }

    #[tokio::test]
    async fn test_invalid_identifier_touches_nothing() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Accept);
        let coordinator = coordinator(store.clone(), transport.clone());

        let result = coordinator
            .execute("bad name!", Action::GrantRole { role: "admin".into() })
            .await;
        assert!(matches!(result, ActionResult::Rejected(RejectedError::InvalidCharacters { .. })));
        assert_eq!(store.len().await, 0);
        assert_eq!(transport.frame_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_skips_remote_call() {
        let store = Arc::new(BrokenStore::default());
        let transport = RecordingTransport::new(Mode::Accept);
        let coordinator = coordinator(store.clone(), transport.clone());

        let result = coordinator.execute("player", Action::Kick { reason: None }).await;
        assert!(matches!(result, ActionResult::StoreFailure(ref reason) if reason.contains("disk on fire")));
        assert_eq!(transport.frame_count(), 0);
        assert!(store.calls.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_store_change() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Refuse);
        let coordinator = coordinator(store.clone(), transport.clone());

        let result = coordinator
            .execute("player", Action::GrantRole { role: "sponsor".into() })
            .await;
        assert!(matches!(
            result,
            ActionResult::RemoteFailure(RemoteFailureReason::Refused { .. })
        ));
        let record = store.get(&normalize("player").unwrap()).await.unwrap();
        assert!(record.has_role("sponsor"));
    }

    #[tokio::test]
    async fn test_timeout_is_surfaced_not_retried() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Hang);
        let coordinator = coordinator(store, transport.clone());

        let result = coordinator
            .execute("player", Action::Broadcast { message: "server restarting".into() })
            .await;
        assert_eq!(result, ActionResult::Timeout);
        assert_eq!(transport.frame_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_grant_does_not_bump_version() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Accept);
        let coordinator = coordinator(store.clone(), transport);
        let id = normalize("player").unwrap();

        coordinator.execute("player", Action::GrantRole { role: "mentor".into() }).await;
        coordinator.execute("PLAYER", Action::GrantRole { role: "Mentor".into() }).await;
        assert_eq!(store.get(&id).await.unwrap().version, 1);

        coordinator.execute("player", Action::RevokeRole { role: "mentor".into() }).await;
        let record = store.get(&id).await.unwrap();
        assert!(!record.has_role("mentor"));
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_regrant_after_revoke_keeps_remote_in_step() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Accept);
        let coordinator = coordinator(store.clone(), transport.clone());

        for action in [
            Action::GrantRole { role: "admin".into() },
            Action::RevokeRole { role: "admin".into() },
            Action::GrantRole { role: "admin".into() },
        ] {
            let result = coordinator.execute("player", action).await;
            assert!(result.is_success(), "{result:?}");
        }

        let frames = transport.frames.lock().unwrap().clone();
        let ops: Vec<&str> = frames.iter().map(|f| f.op.as_str()).collect();
        assert_eq!(ops, vec!["set_role", "remove_role", "set_role"]);

        let mut remote_has_admin = false;
        for frame in &frames {
            remote_has_admin = frame.op.as_str() == "set_role";
        }
        let record = store.get(&normalize("player").unwrap()).await.unwrap();
        assert_eq!(record.has_role("admin"), remote_has_admin);
        assert_eq!(record.version, 3);
    }

    #[tokio::test]
    async fn test_role_catalog_limits_grants() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Accept);
        let client = Arc::new(IntegrationClient::new(transport.clone(), &client_config()));
        let catalog = RoleCatalog::parse("sponsor|Sponsor|Supports the server\n");
        let coordinator = ActionCoordinator::new(BridgeContext::new(store.clone(), client).with_catalog(catalog));

        let unknown = coordinator
            .execute("player", Action::GrantRole { role: "admin".into() })
            .await;
        assert_eq!(unknown, ActionResult::Rejected(RejectedError::UnknownRole("admin".into())));
        assert_eq!(store.len().await, 0);
        assert_eq!(transport.frame_count(), 0);

        let listed = coordinator
            .execute("player", Action::GrantRole { role: " Sponsor ".into() })
            .await;
        assert!(listed.is_success(), "{listed:?}");

        // Removing a role that left the catalog is still allowed.
        let revoke = coordinator
            .execute("player", Action::RevokeRole { role: "admin".into() })
            .await;
        assert!(revoke.is_success(), "{revoke:?}");
        assert_eq!(transport.frame_count(), 2);
    }

    #[tokio::test]
    async fn test_revoke_without_record_still_reaches_remote() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Accept);
        let coordinator = coordinator(store.clone(), transport.clone());

        let result = coordinator
            .execute("stranger", Action::RevokeRole { role: "admin".into() })
            .await;
        assert!(result.is_success());
        assert_eq!(store.len().await, 0);
        assert_eq!(transport.frame_count(), 1);
    }

    #[tokio::test]
    async fn test_permission_check_precedes_everything() {
        let store = Arc::new(MemoryIdentityStore::new());
        let transport = RecordingTransport::new(Mode::Accept);
        let coordinator = coordinator(store.clone(), transport.clone());
        let policy = PermissionPolicy::default();
        let moderator = CallerContext::new("mod", ["moderator"]);

        let denied = coordinator
            .execute_as(&moderator, &policy, "player", Action::GrantRole { role: "admin".into() })
            .await;
        assert!(matches!(denied, ActionResult::Rejected(RejectedError::NotPermitted { .. })));
        assert_eq!(transport.frame_count(), 0);

        let allowed = coordinator
            .execute_as(&moderator, &policy, "player", Action::Kick { reason: Some("afk".into()) })
            .await;
        assert!(allowed.is_success());
    }

    #[tokio::test]
    async fn test_store_only_operations() {
        let store = Arc::new(MemoryIdentityStore::new());
        let coordinator = coordinator(store.clone(), RecordingTransport::new(Mode::Accept));

        assert!(coordinator.set_name_color("player", "#A1B2C3").await.is_success());
        assert!(matches!(
            coordinator.set_name_color("player", "red").await,
            ActionResult::Rejected(RejectedError::InvalidPayload(_))
        ));
        assert!(coordinator.link_alias("player", " Nick#1234 ").await.is_success());
        assert!(coordinator.set_token("player", Some("tok-1")).await.is_success());

        let record = coordinator.show("Player").await.unwrap().unwrap();
        assert_eq!(record.cache_field(NAME_COLOR_FIELD), Some("#a1b2c3"));
        assert_eq!(record.token.as_deref(), Some("tok-1"));
        assert_eq!(record.version, 3);

        let found = coordinator.lookup_alias("Nick#1234").await.unwrap().unwrap();
        assert_eq!(found.identifier.as_str(), "player");
        assert!(coordinator.lookup_alias("nobody").await.unwrap().is_none());

        assert!(coordinator.set_token("player", None).await.is_success());
        assert_eq!(coordinator.show("player").await.unwrap().unwrap().token, None);

        coordinator.forget("player", "requested by player").await.unwrap();
        assert!(coordinator.show("player").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_role_everywhere() {
        let store = Arc::new(MemoryIdentityStore::new());
        let coordinator = coordinator(store.clone(), RecordingTransport::new(Mode::Accept));
        for name in ["a", "b", "c"] {
            coordinator.execute(name, Action::GrantRole { role: "beta".into() }).await;
        }
        coordinator.execute("d", Action::GrantRole { role: "other".into() }).await;

        assert_eq!(coordinator.revoke_role_everywhere("BETA").await.unwrap(), 3);
        assert_eq!(coordinator.revoke_role_everywhere("beta").await.unwrap(), 0);
        assert!(matches!(
            coordinator.revoke_role_everywhere("not valid").await,
            Err(BridgeError::Rejected(_))
        ));
    }

    #[test]
    fn test_hex_color_parsing() {
        assert_eq!(parse_hex_color(" #FFaa00 ").unwrap(), "#ffaa00");
        assert!(parse_hex_color("#ffaa0").is_err());
        assert!(parse_hex_color("ffaa00").is_err());
        assert!(parse_hex_color("#ggaa00").is_err());
        assert!(parse_hex_color("#ffaa00ff").is_err());
    }
}
