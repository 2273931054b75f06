//! Command-line interface handling for the bridge tool.
//!
//! This module provides command-line argument parsing using the `clap`
//! builder API. Global options override configuration file settings; the
//! subcommand names the single action to perform.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// The action requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Grant a role tag to a player
    Grant { ckey: String, role: String },
    /// Revoke a role tag from a player
    Revoke { ckey: String, role: String },
    /// Kick a player, optionally with a reason
    Kick { ckey: String, reason: Option<String> },
    /// Broadcast a message attributed to a player
    Broadcast { ckey: String, message: String },
    /// Send an arbitrary control operation
    Custom {
        ckey: String,
        op: String,
        payload: Option<String>,
        idempotent: bool,
    },
    /// Print a player's stored record
    Show { ckey: String },
    /// Print every stored record
    Scan,
    /// Set a player's name colour (`#RRGGBB`)
    Color { ckey: String, color: String },
    /// Link a chat nickname to a player
    Alias { ckey: String, alias: String },
    /// Find the player linked to a chat nickname
    Whois { alias: String },
    /// Store or clear a player's token
    Token { ckey: String, token: Option<String> },
    /// Remove a role tag from every stored player
    SweepRole { role: String },
    /// Delete a player's record
    Forget { ckey: String, reason: String },
    /// List the roles in the configured role catalog
    Roles,
}

/// Command line arguments parsed from user input.
///
/// This structure holds the command-line options that override
/// configuration file settings plus the requested command.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the identity store file
    pub store_path: Option<PathBuf>,
    /// Optional override for the control interface address
    pub remote_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Name recorded in the audit log for this invocation
    pub caller: String,
    /// Roles the caller acts with, checked against the permission policy
    pub caller_roles: Vec<String>,
    /// What to do
    pub command: BridgeCommand,
}

fn ckey_arg() -> Arg {
    Arg::new("ckey")
        .value_name("CKEY")
        .help("Player identifier")
        .required(true)
}

/// Free text that may span several shell words.
fn trailing_text(name: &'static str, value_name: &'static str, help: &'static str, required: bool) -> Arg {
    Arg::new(name)
        .value_name(value_name)
        .help(help)
        .num_args(1..)
        .required(required)
}

/// Builds the clap command tree.
pub fn command() -> Command {
    Command::new("bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Game server administration bridge: role, kick and broadcast commands backed by a durable identity store")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("bridge.toml")
                .global(true),
        )
        .arg(
            Arg::new("store")
                .short('s')
                .long("store")
                .value_name("PATH")
                .help("Identity store file")
                .global(true),
        )
        .arg(
            Arg::new("remote")
                .short('r')
                .long("remote")
                .value_name("HOST:PORT")
                .help("Game server control interface address")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .global(true),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("as")
                .long("as")
                .value_name("NAME")
                .help("Caller name recorded in the audit log")
                .default_value("console")
                .global(true),
        )
        .arg(
            Arg::new("caller-role")
                .long("caller-role")
                .value_name("ROLE")
                .help("Role the caller acts with (repeatable)")
                .action(ArgAction::Append)
                .global(true),
        )
        .subcommand(
            Command::new("grant")
                .about("Grant a role to a player")
                .arg(ckey_arg())
                .arg(Arg::new("role").value_name("ROLE").required(true)),
        )
        .subcommand(
            Command::new("revoke")
                .about("Revoke a role from a player")
                .arg(ckey_arg())
                .arg(Arg::new("role").value_name("ROLE").required(true)),
        )
        .subcommand(
            Command::new("kick")
                .about("Disconnect a player")
                .arg(ckey_arg())
                .arg(trailing_text("reason", "REASON", "Reason shown to the player", false)),
        )
        .subcommand(
            Command::new("broadcast")
                .about("Announce a message server-wide")
                .arg(ckey_arg())
                .arg(trailing_text("message", "MESSAGE", "Message text", true)),
        )
        .subcommand(
            Command::new("custom")
                .about("Send a custom control operation")
                .arg(ckey_arg())
                .arg(Arg::new("op").value_name("OPCODE").required(true))
                .arg(Arg::new("payload").value_name("JSON").help("JSON payload"))
                .arg(
                    Arg::new("idempotent")
                        .long("idempotent")
                        .help("Mark the operation as safe to retry")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("show").about("Show a player's record").arg(ckey_arg()))
        .subcommand(Command::new("scan").about("List every stored record"))
        .subcommand(
            Command::new("color")
                .about("Set a player's name colour")
                .arg(ckey_arg())
                .arg(Arg::new("color").value_name("#RRGGBB").required(true)),
        )
        .subcommand(
            Command::new("alias")
                .about("Link a chat nickname to a player")
                .arg(ckey_arg())
                .arg(trailing_text("alias", "ALIAS", "Chat nickname", true)),
        )
        .subcommand(
            Command::new("whois")
                .about("Find the player linked to a chat nickname")
                .arg(trailing_text("alias", "ALIAS", "Chat nickname", true)),
        )
        .subcommand(
            Command::new("token")
                .about("Store a player's token, or clear it when omitted")
                .arg(ckey_arg())
                .arg(Arg::new("token").value_name("TOKEN")),
        )
        .subcommand(
            Command::new("sweep-role")
                .about("Remove a role from every stored player")
                .arg(Arg::new("role").value_name("ROLE").required(true)),
        )
        .subcommand(
            Command::new("forget")
                .about("Delete a player's record")
                .arg(ckey_arg())
                .arg(trailing_text("reason", "REASON", "Reason recorded in the audit log", true)),
        )
        .subcommand(Command::new("roles").about("List the grantable roles from the role catalog"))
}

fn one(matches: &ArgMatches, name: &str) -> String {
    matches.get_one::<String>(name).cloned().unwrap_or_default()
}

fn optional(matches: &ArgMatches, name: &str) -> Option<String> {
    matches.get_one::<String>(name).cloned()
}

fn joined(matches: &ArgMatches, name: &str) -> Option<String> {
    matches
        .get_many::<String>(name)
        .map(|words| words.cloned().collect::<Vec<_>>().join(" "))
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let command = match matches.subcommand() {
            Some(("grant", sub)) => BridgeCommand::Grant { ckey: one(sub, "ckey"), role: one(sub, "role") },
            Some(("revoke", sub)) => BridgeCommand::Revoke { ckey: one(sub, "ckey"), role: one(sub, "role") },
            Some(("kick", sub)) => BridgeCommand::Kick { ckey: one(sub, "ckey"), reason: joined(sub, "reason") },
            Some(("broadcast", sub)) => BridgeCommand::Broadcast {
                ckey: one(sub, "ckey"),
                message: joined(sub, "message").unwrap_or_default(),
            },
            Some(("custom", sub)) => BridgeCommand::Custom {
                ckey: one(sub, "ckey"),
                op: one(sub, "op"),
                payload: optional(sub, "payload"),
                idempotent: sub.get_flag("idempotent"),
            },
            Some(("show", sub)) => BridgeCommand::Show { ckey: one(sub, "ckey") },
            Some(("color", sub)) => BridgeCommand::Color { ckey: one(sub, "ckey"), color: one(sub, "color") },
            Some(("alias", sub)) => BridgeCommand::Alias {
                ckey: one(sub, "ckey"),
                alias: joined(sub, "alias").unwrap_or_default(),
            },
            Some(("whois", sub)) => BridgeCommand::Whois { alias: joined(sub, "alias").unwrap_or_default() },
            Some(("token", sub)) => BridgeCommand::Token { ckey: one(sub, "ckey"), token: optional(sub, "token") },
            Some(("sweep-role", sub)) => BridgeCommand::SweepRole { role: one(sub, "role") },
            Some(("forget", sub)) => BridgeCommand::Forget {
                ckey: one(sub, "ckey"),
                reason: joined(sub, "reason").unwrap_or_default(),
            },
            Some(("roles", _)) => BridgeCommand::Roles,
            _ => BridgeCommand::Scan,
        };

        let caller_roles = matches
            .get_many::<String>("caller-role")
            .map(|roles| roles.cloned().collect())
            .unwrap_or_else(|| vec!["admin".to_string()]);

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or("bridge.toml"),
            ),
            store_path: matches.get_one::<String>("store").map(PathBuf::from),
            remote_address: optional(matches, "remote"),
            log_level: optional(matches, "log-level"),
            json_logs: matches.get_flag("json-logs"),
            caller: matches
                .get_one::<String>("as")
                .cloned()
                .unwrap_or_else(|| "console".to_string()),
            caller_roles,
            command,
        }
    }
}
