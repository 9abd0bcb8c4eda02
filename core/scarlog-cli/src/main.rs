//! scarlog: command-line surface for the scarlog session core.
//!
//! Hooks and shell scripts call this binary from short-lived processes, so every
//! subcommand works from disk: the active session is recovered from the
//! registry and its snapshot rather than held in memory.
//!
//! ## Subcommands
//!
//! - `start` / `close`: session lifecycle (registers on behalf of the parent process)
//! - `recall` / `confirm`: record surfaced scars and confirmations
//! - `check`: compliance warning for a tool, as JSON
//! - `scars`: surfaced scars of the recovered session, as JSON
//! - `sessions list|prune`: registry inspection and stale pruning
//! - `lock status|release|run`: advisory locks over named resources

mod lock_cmd;
mod logging;
mod session_cmd;

use clap::{Parser, Subcommand};
use scarlog_core::{ScarError, StorageConfig};

#[derive(Parser)]
#[command(name = "scarlog")]
#[command(about = "Session registry, advisory locks, and scar compliance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or resume) a session
    Start {
        /// Agent identifier (e.g. cli, desktop)
        #[arg(long, default_value = "cli")]
        agent: String,

        #[arg(long)]
        project: Option<String>,

        /// Use this session id instead of generating one
        #[arg(long)]
        session_id: Option<String>,

        /// Process that owns the session (defaults to the parent process)
        #[arg(long)]
        pid: Option<u32>,

        /// Replace any session already active for this host
        #[arg(long)]
        force: bool,
    },

    /// Close a session (the most recent local one unless --session-id is given)
    Close {
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Record a recall and the scars it surfaced
    Recall {
        /// Surfaced scars as ID=TITLE
        #[arg(value_name = "SCAR")]
        scars: Vec<String>,

        /// Record the scars as session-start defaults instead of recall results
        #[arg(long)]
        defaults: bool,
    },

    /// Confirm a surfaced scar
    Confirm {
        scar_id: String,

        /// APPLYING, N_A, or REFUTED
        decision: String,

        /// Why the decision holds
        #[arg(default_value = "")]
        evidence: String,
    },

    /// Print the compliance warning for a tool invocation
    Check {
        /// Tool name or alias
        tool: String,
    },

    /// Print surfaced scars for the active session
    Scars,

    /// Inspect the session registry
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Advisory lock operations on named resources
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List registered sessions
    List,
    /// Remove stale sessions
    Prune,
}

#[derive(Subcommand)]
enum LockCommand {
    /// Show the current holder of a lock
    Status { name: String },

    /// Delete a lock record unconditionally
    Release { name: String },

    /// Run a command while holding a lock (refreshed until the command exits)
    Run {
        name: String,

        /// Maximum wait for the lock (defaults to config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(last = true, required = true, value_name = "CMD")]
        command: Vec<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ScarError),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

fn main() {
    let storage = StorageConfig::from_env();
    let _logging_guard = logging::init(storage.as_ref().ok());
    let cli = Cli::parse();

    let storage = match storage {
        Ok(storage) => storage,
        Err(err) => {
            tracing::error!(error = %err, "Cannot resolve storage root");
            eprintln!("scarlog: {err}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start {
            agent,
            project,
            session_id,
            pid,
            force,
        } => session_cmd::start(&storage, agent, project, session_id, pid, force),
        Commands::Close { session_id } => session_cmd::close(&storage, session_id.as_deref()),
        Commands::Recall { scars, defaults } => session_cmd::recall(&storage, &scars, defaults),
        Commands::Confirm {
            scar_id,
            decision,
            evidence,
        } => session_cmd::confirm(&storage, scar_id, &decision, evidence),
        Commands::Check { tool } => session_cmd::check(&storage, &tool),
        Commands::Scars => session_cmd::scars(&storage),
        Commands::Sessions { command } => match command {
            SessionsCommand::List => session_cmd::list(&storage),
            SessionsCommand::Prune => session_cmd::prune(&storage),
        },
        Commands::Lock { command } => match command {
            LockCommand::Status { name } => lock_cmd::status(&storage, &name),
            LockCommand::Release { name } => lock_cmd::release(&storage, &name),
            LockCommand::Run {
                name,
                timeout_ms,
                command,
            } => match lock_cmd::run(&storage, &name, timeout_ms, &command) {
                Ok(code) => std::process::exit(code),
                Err(err) => Err(err),
            },
        },
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "scarlog command failed");
        eprintln!("scarlog: {err}");
        std::process::exit(1);
    }
}
