//! Main application logic.
//!
//! This module contains the `Application` struct that wires the core
//! together from configuration, runs one command and renders its outcome.

use crate::cli::{BridgeCommand, CliArgs};
use crate::config::AppConfig;
use bridge_core::{
    create_context, Action, ActionCoordinator, ActionResult, BridgeError, CallerContext, IdentityRecord,
    RejectedError,
};
use std::fmt;
use tracing::{error, info};

/// Process exit codes, one per outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    Failure = 1,
    Rejected = 2,
    Store = 3,
    Remote = 4,
    Timeout = 5,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&ActionResult> for ExitStatus {
    fn from(result: &ActionResult) -> Self {
        match result {
            ActionResult::Success(_) => ExitStatus::Success,
            ActionResult::Rejected(_) => ExitStatus::Rejected,
            ActionResult::StoreFailure(_) => ExitStatus::Store,
            ActionResult::RemoteFailure(_) => ExitStatus::Remote,
            ActionResult::Timeout => ExitStatus::Timeout,
        }
    }
}

impl From<&BridgeError> for ExitStatus {
    fn from(error: &BridgeError) -> Self {
        match error {
            BridgeError::Rejected(_) => ExitStatus::Rejected,
            BridgeError::Store(_) => ExitStatus::Store,
        }
    }
}

/// Text printed to stdout plus the exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: ExitStatus,
    pub output: String,
}

impl Outcome {
    fn new(status: ExitStatus, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }
}

impl From<ActionResult> for Outcome {
    fn from(result: ActionResult) -> Self {
        Outcome::new(ExitStatus::from(&result), result.to_string())
    }
}

impl From<BridgeError> for Outcome {
    fn from(error: BridgeError) -> Self {
        Outcome::new(ExitStatus::from(&error), format!("error: {error}"))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.output)
    }
}

/// One invocation of the bridge tool.
///
/// Holds the merged configuration, the caller identity and the command,
/// and builds the coordinator on [`run`](Self::run).
pub struct Application {
    /// Loaded application configuration, CLI overrides applied
    config: AppConfig,
    /// Caller identity checked against the permission policy
    caller: CallerContext,
    /// Requested command
    command: BridgeCommand,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides and validates the result.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` ready to run, or an error if the
    /// configuration could not be loaded or is invalid.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let config = AppConfig::load_from_file(&args.config_path).await?;
        Self::with_config(config, args)
    }

    /// Like [`new`](Self::new), with an already loaded configuration.
    pub fn with_config(mut config: AppConfig, args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        // Apply CLI overrides
        if let Some(store_path) = args.store_path {
            config.store.path = store_path;
        }
        if let Some(remote_address) = args.remote_address {
            config.remote.address = remote_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        Ok(Self {
            caller: CallerContext::new(args.caller, args.caller_roles),
            command: args.command,
            config,
        })
    }

    /// Runs the command and returns what to print and how to exit.
    ///
    /// Failing to open the identity store maps to the store exit status; all
    /// other failures are already values inside the outcome.
    pub async fn run(self) -> Outcome {
        let context = match create_context(&self.config.to_core_config()).await {
            Ok(context) => context,
            Err(e) => {
                error!("❌ Failed to open identity store {}: {}", self.config.store.path.display(), e);
                return Outcome::new(ExitStatus::Store, format!("identity store error: {e}"));
            }
        };
        let coordinator = ActionCoordinator::new(context);

        let outcome = self.dispatch(&coordinator).await;
        let stats = coordinator.context().client.stats();
        info!(
            "📊 Remote calls: {} issued, {} attempts, {} deduplicated, {} cached",
            stats.calls_issued, stats.attempts, stats.deduplicated, stats.cache_hits
        );
        outcome
    }

    async fn dispatch(&self, coordinator: &ActionCoordinator) -> Outcome {
        match &self.command {
            BridgeCommand::Grant { ckey, role } => {
                self.remote(coordinator, ckey, Action::GrantRole { role: role.clone() }).await
            }
            BridgeCommand::Revoke { ckey, role } => {
                self.remote(coordinator, ckey, Action::RevokeRole { role: role.clone() }).await
            }
            BridgeCommand::Kick { ckey, reason } => {
                self.remote(coordinator, ckey, Action::Kick { reason: reason.clone() }).await
            }
            BridgeCommand::Broadcast { ckey, message } => {
                self.remote(coordinator, ckey, Action::Broadcast { message: message.clone() }).await
            }
            BridgeCommand::Custom { ckey, op, payload, idempotent } => {
                let payload = match payload.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose() {
                    Ok(value) => value.unwrap_or(serde_json::Value::Null),
                    Err(e) => {
                        return ActionResult::Rejected(RejectedError::InvalidPayload(format!(
                            "payload is not valid JSON: {e}"
                        )))
                        .into()
                    }
                };
                let action = Action::Custom {
                    op: op.clone(),
                    payload,
                    idempotent: *idempotent,
                };
                self.remote(coordinator, ckey, action).await
            }
            BridgeCommand::Show { ckey } => match coordinator.show(ckey).await {
                Ok(Some(record)) => Outcome::new(ExitStatus::Success, render_record(&record)),
                Ok(None) => Outcome::new(ExitStatus::Success, format!("no record for {}", ckey.trim())),
                Err(e) => e.into(),
            },
            BridgeCommand::Scan => self.scan(coordinator).await,
            BridgeCommand::Color { ckey, color } => coordinator.set_name_color(ckey, color).await.into(),
            BridgeCommand::Alias { ckey, alias } => coordinator.link_alias(ckey, alias).await.into(),
            BridgeCommand::Whois { alias } => match coordinator.lookup_alias(alias).await {
                Ok(Some(record)) => Outcome::new(ExitStatus::Success, record.identifier.to_string()),
                Ok(None) => Outcome::new(ExitStatus::Success, format!("nobody is linked to {alias:?}")),
                Err(e) => e.into(),
            },
            BridgeCommand::Token { ckey, token } => coordinator.set_token(ckey, token.as_deref()).await.into(),
            BridgeCommand::SweepRole { role } => match coordinator.revoke_role_everywhere(role).await {
                Ok(count) => Outcome::new(ExitStatus::Success, format!("removed {role:?} from {count} players")),
                Err(e) => e.into(),
            },
            BridgeCommand::Roles => match &coordinator.context().catalog {
                Some(catalog) if !catalog.is_empty() => {
                    let lines: Vec<String> = catalog
                        .iter()
                        .map(|role| format!("{} - {}: {}", role.id, role.title, role.description))
                        .collect();
                    Outcome::new(ExitStatus::Success, lines.join("\n"))
                }
                Some(_) => Outcome::new(ExitStatus::Success, "role catalog is empty; no role can be granted"),
                None => Outcome::new(ExitStatus::Success, "no role catalog configured; any valid role tag may be granted"),
            },
            BridgeCommand::Forget { ckey, reason } => {
                info!(target: "audit", caller = %self.caller.name, ckey = %ckey, "forget requested");
                match coordinator.forget(ckey, reason).await {
                    Ok(record) => Outcome::new(ExitStatus::Success, format!("deleted record for {}", record.identifier)),
                    Err(e) => e.into(),
                }
            }
        }
    }

    async fn remote(&self, coordinator: &ActionCoordinator, ckey: &str, action: Action) -> Outcome {
        let result = coordinator
            .execute_as(&self.caller, &self.config.policy, ckey, action)
            .await;
        if result.is_success() {
            info!("✅ {}", result);
        } else {
            error!("❌ {} ({})", result, result.kind_label());
        }
        result.into()
    }

    async fn scan(&self, coordinator: &ActionCoordinator) -> Outcome {
        let mut scan = match coordinator.context().store.scan().await {
            Ok(scan) => scan,
            Err(e) => return BridgeError::from(e).into(),
        };
        let mut lines: Vec<String> = scan.by_ref().map(|record| render_record(&record)).collect();
        if scan.skipped() > 0 {
            lines.push(format!("({} corrupt entries skipped)", scan.skipped()));
        }
        if lines.is_empty() {
            lines.push("store is empty".to_string());
        }
        Outcome::new(ExitStatus::Success, lines.join("\n"))
    }
}

/// One-line human rendering of a record.
fn render_record(record: &IdentityRecord) -> String {
    let roles = if record.roles.is_empty() {
        "-".to_string()
    } else {
        record.roles.iter().cloned().collect::<Vec<_>>().join(",")
    };
    let fields = record
        .cache_fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{} roles={} token={} v{} {}",
        record.identifier,
        roles,
        if record.token.is_some() { "set" } else { "none" },
        record.version,
        fields
    )
    .trim_end()
    .to_string()
}
