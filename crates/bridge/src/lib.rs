//! # Bridge - Game Server Administration Tool
//!
//! Command-line front end for the integration core. One invocation performs
//! one command (grant, revoke, kick, broadcast, ...) and exits with a code
//! that identifies the outcome.
//!
//! ## Architecture
//!
//! * **CLI** ([`cli`]) - Argument parsing and subcommands
//! * **Configuration** ([`config`]) - TOML loading, defaults and validation
//! * **Logging** ([`logging`]) - tracing-subscriber setup
//! * **Application** ([`app`]) - Builds the coordinator and renders outcomes
//!
//! ## Exit Codes
//!
//! * **0**: Success
//! * **1**: Startup or configuration error
//! * **2**: Rejected input or permission denied
//! * **3**: Identity store failure
//! * **4**: Game server failure or refusal
//! * **5**: Timed out or interrupted; the action may still have been applied

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::{Application, ExitStatus};
use cli::CliArgs;
use config::AppConfig;

/// Runs the tool and returns the process exit code.
///
/// Handles the complete invocation:
/// 1. Command-line argument parsing
/// 2. Configuration loading (to get logging settings)
/// 3. Logging system initialization
/// 4. Application creation and execution
/// 5. Rendering the outcome to stdout
pub async fn init() -> i32 {
    // Parse CLI arguments first
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        return ExitStatus::Failure.code();
    }

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Failed to start: {e}");
            eprintln!("{e}");
            return ExitStatus::Failure.code();
        }
    };

    tokio::select! {
        outcome = app.run() => {
            println!("{outcome}");
            outcome.status.code()
        }
        Ok(()) = signals::wait_for_interrupt() => {
            println!("interrupted; the action may still have been applied");
            ExitStatus::Timeout.code()
        }
    }
}

// Re-export main types for potential library usage
pub use config::LoggingSettings;
