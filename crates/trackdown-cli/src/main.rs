//! trackdown - File-based ticket tracker
//!
//! No daemon, no database - just Markdown documents under tickets/

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "trackdown")]
#[command(about = "File-based ticket tracker with GitHub sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new trackdown project
    Init {
        /// Directory holding the ticket folders
        #[arg(long, default_value = "tickets")]
        tickets_dir: String,

        /// Serialize counter updates with a lock file
        #[arg(long)]
        lock_counters: bool,

        /// GitHub repository to sync with (owner/name)
        #[arg(long)]
        repository: Option<String>,
    },

    /// Create a new ticket
    Create {
        /// Ticket kind (epic, issue, task, pr, project)
        kind: String,

        /// Ticket title
        title: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Priority (low, medium, high, critical)
        #[arg(short, long, default_value = "medium")]
        priority: String,

        /// Parent epic
        #[arg(long)]
        epic: Option<String>,

        /// Parent issue
        #[arg(long)]
        issue: Option<String>,

        /// Assignee
        #[arg(short, long)]
        assignee: Option<String>,

        /// Tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Source branch (pull requests)
        #[arg(long)]
        branch: Option<String>,

        /// Estimated tokens
        #[arg(long, default_value = "0")]
        estimate: u64,
    },

    /// List tickets matching all given filters
    #[command(alias = "search")]
    List {
        /// Filter by kind
        #[arg(short, long)]
        kind: Option<String>,

        /// Filter by legacy status
        #[arg(long)]
        status: Option<String>,

        /// Filter by effective state
        #[arg(long)]
        state: Option<String>,

        /// Filter by priority
        #[arg(short, long)]
        priority: Option<String>,

        /// Filter by assignee
        #[arg(short, long)]
        assignee: Option<String>,

        /// Require tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Case-insensitive text match over title, description and body
        text: Option<String>,
    },

    /// Show a ticket with its hierarchy
    Show {
        /// Ticket ID
        id: String,
    },

    /// Show dependencies and dependents of a ticket
    Related {
        /// Ticket ID
        id: String,
    },

    /// Move a ticket to a new state
    Transition {
        /// Ticket ID
        id: String,

        /// Target state
        state: String,

        /// Who performs the transition
        #[arg(long, env = "TRACKDOWN_ACTOR", default_value = "cli")]
        actor: String,

        /// Role of the actor (developer, qa, devops, manager, automation)
        #[arg(long)]
        role: Option<String>,

        /// Reason for the transition
        #[arg(short, long)]
        reason: Option<String>,

        /// Reviewer
        #[arg(long)]
        reviewer: Option<String>,
    },

    /// List states a ticket can move to
    Transitions {
        /// Ticket ID
        id: String,
    },

    /// Attach unified states to legacy tickets
    Migrate {
        /// Preview migration without making changes
        #[arg(long)]
        dry_run: bool,

        /// Show what rolling back the last migration would do
        #[arg(long, conflicts_with = "dry_run")]
        rollback_plan: bool,

        /// Roll back the last migration
        #[arg(long, conflicts_with_all = ["dry_run", "rollback_plan"])]
        rollback: bool,

        /// Who performs the migration
        #[arg(long, env = "TRACKDOWN_ACTOR", default_value = "migration")]
        actor: String,
    },

    /// Synchronize with the remote tracker
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Manage ID counters
    Counters {
        #[command(subcommand)]
        command: Option<CounterCommands>,
    },

    /// Report parse failures, dangling references and dependency cycles
    Check,

    /// Show ticket counts
    Stats,
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Show sync status and health
    Status,
    /// Verify remote credentials
    Test,
    /// Push local changes
    Push,
    /// Pull remote changes
    Pull,
    /// Full bidirectional pass
    Run,
    /// Settle a held conflict by keeping one side
    Resolve {
        /// Ticket ID
        id: String,

        /// Side to keep (local, remote)
        #[arg(long)]
        keep: String,
    },
}

#[derive(Subcommand)]
enum CounterCommands {
    /// Show next ids
    Show,
    /// Recompute counters from existing documents
    Detect,
    /// Set the next number for a kind
    Set {
        /// Ticket kind
        kind: String,
        /// Next number to allocate
        next: u64,
    },
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            tickets_dir,
            lock_counters,
            repository,
        } => commands::init(&tickets_dir, lock_counters, repository, cli.json),
        Commands::Create {
            kind,
            title,
            description,
            priority,
            epic,
            issue,
            assignee,
            tags,
            branch,
            estimate,
        } => commands::create(
            commands::CreateArgs {
                kind,
                title,
                description,
                priority,
                epic,
                issue,
                assignee,
                tags,
                branch,
                estimate,
            },
            cli.json,
        ),
        Commands::List {
            kind,
            status,
            state,
            priority,
            assignee,
            tags,
            text,
        } => commands::list(
            commands::ListArgs {
                kind,
                status,
                state,
                priority,
                assignee,
                tags,
                text,
            },
            cli.json,
        ),
        Commands::Show { id } => commands::show(&id, cli.json),
        Commands::Related { id } => commands::related(&id, cli.json),
        Commands::Transition {
            id,
            state,
            actor,
            role,
            reason,
            reviewer,
        } => commands::transition(&id, &state, &actor, role, reason, reviewer, cli.json),
        Commands::Transitions { id } => commands::transitions(&id, cli.json),
        Commands::Migrate {
            dry_run,
            rollback_plan,
            rollback,
            actor,
        } => {
            if dry_run {
                commands::migrate_preview(cli.json)
            } else if rollback_plan {
                commands::migrate_rollback_plan(cli.json)
            } else if rollback {
                commands::migrate_rollback(cli.json)
            } else {
                commands::migrate(&actor, cli.json)
            }
        }
        Commands::Sync { command } => match command {
            SyncCommands::Status => commands::sync_status(cli.json),
            SyncCommands::Test => commands::sync_test(cli.json),
            SyncCommands::Push => commands::sync_run(commands::SyncMode::Push, cli.json),
            SyncCommands::Pull => commands::sync_run(commands::SyncMode::Pull, cli.json),
            SyncCommands::Run => commands::sync_run(commands::SyncMode::Both, cli.json),
            SyncCommands::Resolve { id, keep } => commands::sync_resolve(&id, &keep, cli.json),
        },
        Commands::Counters { command } => match command {
            Some(CounterCommands::Show) | None => commands::counters_show(cli.json),
            Some(CounterCommands::Detect) => commands::counters_detect(cli.json),
            Some(CounterCommands::Set { kind, next }) => commands::counters_set(&kind, next),
        },
        Commands::Check => commands::check(cli.json),
        Commands::Stats => commands::stats(cli.json),
    }
}
