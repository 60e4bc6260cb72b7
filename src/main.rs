//! # KnowFlow CLI (`kf`)
//!
//! ## Usage
//!
//! ```bash
//! kf --config ./config/kf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kf kb list` | List knowledge bases |
//! | `kf kb create <name>` | Create a knowledge base |
//! | `kf kb delete <id>...` | Delete one or more knowledge bases |
//! | `kf kb docs <kb-id>` | List the documents of a knowledge base |
//! | `kf doc parse <id>...` | Start (or `--cancel`) parsing, `--watch` to follow |
//! | `kf doc watch <id>...` | Poll parse progress until done |
//! | `kf doc rename <id> <name>` | Rename a document |
//! | `kf doc rm <id>...` | Delete documents |
//! | `kf doc upload <kb-id> <path>...` | Upload files and directories in batches |
//! | `kf chunking get <doc-id>` | Show a document's chunking config |
//! | `kf chunking set <doc-id>` | Validate and save a chunking config |
//! | `kf users list\|create\|edit\|rm\|reset-password` | Manage users |
//! | `kf teams list\|rm\|members\|add-member\|remove-member` | Manage teams and members |
//! | `kf files list\|upload\|download\|rm` | Manage stored files |
//! | `kf serve` | Start the local status server |
//!
//! Set `RUST_LOG=knowflow=debug` to see per-tick poll logs.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use knowflow::chunking::ChunkingDraft;
use knowflow::commands::{self, Session};
use knowflow::config;
use knowflow::models::{NewKnowledgeBase, NewUser, UserUpdate};
use knowflow::progress::ProgressMode;

/// KnowFlow CLI: knowledge bases, documents, chunking and parse progress.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kf.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "kf", about = "KnowFlow knowledge-base client", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kf.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage knowledge bases.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Parse, watch, rename, delete and upload documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Show or change a document's chunking config.
    Chunking {
        #[command(subcommand)]
        action: ChunkingAction,
    },

    /// Manage users.
    Users {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage teams and their members.
    Teams {
        #[command(subcommand)]
        action: TeamAction,
    },

    /// Manage stored files.
    Files {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Start the local status server.
    ///
    /// Binds to `[server].bind` and serves the progress board as JSON.
    Serve,
}

#[derive(Subcommand)]
enum KbAction {
    List {
        /// Filter by name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        size: u32,
    },
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "Chinese")]
        language: String,
        /// `me` or `team`.
        #[arg(long, default_value = "me")]
        permission: String,
    },
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Docs {
        kb_id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        size: u32,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Dispatch parse jobs, routed by each document's parser.
    Parse {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Cancel instead of start.
        #[arg(long, conflicts_with = "watch")]
        cancel: bool,
        /// Poll accepted KnowFlow jobs until they finish.
        #[arg(long)]
        watch: bool,
    },
    /// Poll parse progress for documents concurrently.
    Watch {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Rename { id: String, name: String },
    Rm {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Upload files; directories are walked recursively.
    Upload {
        kb_id: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ChunkingAction {
    Get {
        doc_id: String,
    },
    /// Missing options keep the document's current values.
    Set {
        doc_id: String,
        /// basic, smart, advanced or strict_regex.
        #[arg(long)]
        strategy: String,
        /// Target chunk size in tokens, 50..=2048.
        #[arg(long)]
        chunk_tokens: Option<i64>,
        /// Minimum chunk size in tokens, 10..=500.
        #[arg(long)]
        min_tokens: Option<i64>,
        /// Split pattern, required for strict_regex.
        #[arg(long)]
        regex: Option<String>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    List {
        /// Filter by username.
        #[arg(long)]
        username: Option<String>,
        /// Filter by email.
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        size: u32,
    },
    Create {
        username: String,
        #[arg(long)]
        email: String,
        /// Initial password; read from KF_PASSWORD when omitted.
        #[arg(long, env = "KF_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Change a user's username or email.
    Edit {
        id: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    Rm {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    ResetPassword {
        id: String,
        /// New password; read from KF_PASSWORD when omitted.
        #[arg(long, env = "KF_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Subcommand)]
enum TeamAction {
    List {
        /// Filter by team name.
        #[arg(long)]
        name: Option<String>,
        /// Filter by owner name.
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        size: u32,
    },
    Rm {
        id: String,
    },
    /// List the members of a team.
    Members {
        team_id: String,
    },
    /// Add a user to a team by email.
    AddMember {
        team_id: String,
        email: String,
    },
    RemoveMember {
        team_id: String,
        user_id: String,
    },
}

#[derive(Subcommand)]
enum FileAction {
    List {
        /// Filter by file name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        size: u32,
    },
    /// Store files; directories are walked recursively.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    Download {
        id: String,
        /// Destination file.
        output: PathBuf,
    },
    Rm {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let session = Session::new(cfg, Arc::from(mode.reporter()))?;

    match cli.command {
        Commands::Kb { action } => match action {
            KbAction::List { name, page, size } => {
                commands::run_kb_list(&session, name.as_deref(), page, size).await?;
            }
            KbAction::Create {
                name,
                description,
                language,
                permission,
            } => {
                let kb = NewKnowledgeBase {
                    name,
                    description,
                    language,
                    permission,
                };
                commands::run_kb_create(&session, kb).await?;
            }
            KbAction::Delete { ids } => {
                commands::run_kb_delete(&session, &ids).await?;
            }
            KbAction::Docs { kb_id, page, size } => {
                commands::run_kb_docs(&session, &kb_id, page, size).await?;
            }
        },
        Commands::Doc { action } => match action {
            DocAction::Parse { ids, cancel, watch } => {
                commands::run_parse(&session, &ids, cancel, watch).await?;
            }
            DocAction::Watch { ids } => {
                commands::run_watch(&session, &ids).await?;
            }
            DocAction::Rename { id, name } => {
                commands::run_rename(&session, &id, &name).await?;
            }
            DocAction::Rm { ids } => {
                commands::run_remove(&session, &ids).await?;
            }
            DocAction::Upload { kb_id, paths } => {
                commands::run_upload(&session, &kb_id, &paths).await?;
            }
        },
        Commands::Chunking { action } => match action {
            ChunkingAction::Get { doc_id } => {
                commands::run_chunking_get(&session, &doc_id).await?;
            }
            ChunkingAction::Set {
                doc_id,
                strategy,
                chunk_tokens,
                min_tokens,
                regex,
            } => {
                let draft = ChunkingDraft {
                    strategy: Some(strategy),
                    chunk_token_num: chunk_tokens,
                    min_chunk_tokens: min_tokens,
                    regex_pattern: regex,
                };
                commands::run_chunking_set(&session, &doc_id, draft).await?;
            }
        },
        Commands::Users { action } => match action {
            UserAction::List {
                username,
                email,
                page,
                size,
            } => {
                commands::run_user_list(
                    &session,
                    username.as_deref(),
                    email.as_deref(),
                    page,
                    size,
                )
                .await?;
            }
            UserAction::Create {
                username,
                email,
                password,
            } => {
                let user = NewUser {
                    username,
                    email,
                    password,
                };
                commands::run_user_create(&session, user).await?;
            }
            UserAction::Edit {
                id,
                username,
                email,
            } => {
                commands::run_user_edit(&session, &id, UserUpdate { username, email }).await?;
            }
            UserAction::Rm { ids } => {
                commands::run_user_delete(&session, &ids).await?;
            }
            UserAction::ResetPassword { id, password } => {
                commands::run_reset_password(&session, &id, &password).await?;
            }
        },
        Commands::Teams { action } => match action {
            TeamAction::List {
                name,
                owner,
                page,
                size,
            } => {
                commands::run_team_list(
                    &session,
                    name.as_deref(),
                    owner.as_deref(),
                    page,
                    size,
                )
                .await?;
            }
            TeamAction::Rm { id } => {
                commands::run_team_delete(&session, &id).await?;
            }
            TeamAction::Members { team_id } => {
                commands::run_team_members(&session, &team_id).await?;
            }
            TeamAction::AddMember { team_id, email } => {
                commands::run_team_add_member(&session, &team_id, &email).await?;
            }
            TeamAction::RemoveMember { team_id, user_id } => {
                commands::run_team_remove_member(&session, &team_id, &user_id).await?;
            }
        },
        Commands::Files { action } => match action {
            FileAction::List { name, page, size } => {
                commands::run_files(&session, name.as_deref(), page, size).await?;
            }
            FileAction::Upload { paths } => {
                commands::run_file_upload(&session, &paths).await?;
            }
            FileAction::Download { id, output } => {
                commands::run_file_download(&session, &id, &output).await?;
            }
            FileAction::Rm { ids } => {
                commands::run_file_delete(&session, &ids).await?;
            }
        },
        Commands::Serve => {
            commands::run_serve(&session).await?;
        }
    }

    Ok(())
}
