use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::info;

use grapevine::config::Config;
use grapevine::db::models::{Node, OutboxState};
use grapevine::db::Database;
use grapevine::federation::ids::normalize_host;
use grapevine::federation::outbox::DRAIN_BATCH;
use grapevine::federation::Federation;
use grapevine::output::terminal;

/// Grapevine: federation core for a small social network.
///
/// Delivers posts, comments, likes and follow requests between nodes and
/// serves the inbox other nodes deliver to.
#[derive(Parser)]
#[command(name = "grapevine", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Serve the peer-facing API and run the outbox worker
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
    },

    /// Manage registered peer nodes
    Node {
        #[command(subcommand)]
        command: NodeCommand,
    },

    /// Promote follow requests the remote side has accepted
    Reconcile {
        /// Local author whose outgoing requests to check
        author: String,
    },

    /// Cache the author listings of every registered node
    Sync,

    /// Show the delivery outbox
    Outbox {
        /// Attempt every due entry now
        #[arg(long)]
        drain: bool,

        /// Move dead entries back to pending
        #[arg(long)]
        requeue: bool,
    },

    /// Show node status (DB stats, peers, outbox backlog)
    Status,
}

#[derive(Subcommand)]
enum NodeCommand {
    /// Register a peer node
    Add {
        /// Base URL of the peer's API, e.g. https://peer.example/api
        #[arg(long)]
        api_url: String,

        /// Username we present when calling the peer
        #[arg(long)]
        node_name: String,

        /// Password we present when calling the peer
        #[arg(long)]
        node_cred: String,

        /// Username the peer presents when calling us
        #[arg(long)]
        inbound_username: String,

        /// Password the peer presents when calling us (stored hashed)
        #[arg(long)]
        inbound_secret: String,
    },

    /// List registered peer nodes
    List,

    /// Remove a peer node by id or host
    Remove { node: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grapevine=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing Grapevine database...");
            let config = Config::load()?;
            let db = grapevine::db::initialize_sqlite(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nGrapevine is ready. Next step: register a peer with");
            println!("  grapevine node add --api-url ... --node-name ... --node-cred ... \\");
            println!("    --inbound-username ... --inbound-secret ...");
        }

        Commands::Serve { port, bind } => {
            let config = Config::load()?;
            config.require_public_url()?;
            config.require_outbox()?;
            let db = grapevine::db::open_sqlite(&config.db_path)?;
            grapevine::web::run_server(config, db, port, &bind).await?;
        }

        Commands::Node { command } => {
            let config = Config::load()?;
            let db = grapevine::db::open_sqlite(&config.db_path)?;
            run_node_command(&db, command).await?;
        }

        Commands::Reconcile { author } => {
            let config = Config::load()?;
            let db = grapevine::db::open_sqlite(&config.db_path)?;
            let federation = Federation::new(db, &config)?;
            let report = federation.reconcile_follows(&author).await?;
            terminal::display_reconcile(&author, &report);
        }

        Commands::Sync => {
            let config = Config::load()?;
            let db = grapevine::db::open_sqlite(&config.db_path)?;
            let federation = Federation::new(db, &config)?;
            let report = federation.sync_all_authors().await?;
            terminal::display_backfill(&report);
        }

        Commands::Outbox { drain, requeue } => {
            let config = Config::load()?;
            config.require_outbox()?;
            let db = grapevine::db::open_sqlite(&config.db_path)?;
            let federation = Federation::new(Arc::clone(&db), &config)?;

            if requeue {
                let moved = federation.outbox.requeue_dead().await?;
                println!("Requeued {moved} dead entr{}", if moved == 1 { "y" } else { "ies" });
            }
            if drain {
                let report = federation.outbox.process_due(DRAIN_BATCH).await?;
                terminal::display_drain(&report);
            }

            let mut entries = db.list_outbox(OutboxState::Dead, DRAIN_BATCH).await?;
            entries.extend(db.list_outbox(OutboxState::Pending, DRAIN_BATCH).await?);
            terminal::display_outbox(&entries);
        }

        Commands::Status => {
            let config = Config::load()?;
            let db = grapevine::db::open_sqlite(&config.db_path)?;
            grapevine::status::show(&db, &config).await?;
        }
    }

    Ok(())
}

async fn run_node_command(db: &Arc<dyn Database>, command: NodeCommand) -> Result<()> {
    match command {
        NodeCommand::Add {
            api_url,
            node_name,
            node_cred,
            inbound_username,
            inbound_secret,
        } => {
            let host = normalize_host(&api_url);
            if host.is_empty() {
                anyhow::bail!("--api-url must include a host, got {api_url:?}");
            }
            let node = Node {
                id: uuid::Uuid::new_v4().to_string(),
                node_name,
                node_cred,
                api_url: api_url.trim_end_matches('/').to_string(),
                host,
                inbound_username,
                inbound_secret_hash: grapevine::web::auth::hash_secret(&inbound_secret),
            };
            db.insert_node(&node).await?;
            println!("Registered node {} ({})", node.host.bold(), node.id.dimmed());
        }
        NodeCommand::List => {
            terminal::display_nodes(&db.list_nodes().await?);
        }
        NodeCommand::Remove { node } => {
            if db.delete_node(&node).await? {
                println!("Removed node {node}");
            } else {
                println!("{}", format!("No node matches {node:?}").yellow());
            }
        }
    }
    Ok(())
}
