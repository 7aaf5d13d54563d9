use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use outreach::config::OutreachConfig;
use outreach::contacts::{ContactResolver, HttpContactResolver};
use outreach::manager::Manager;
use outreach::model::Opportunity;
use outreach::send::SmtpMailer;
use outreach::store::Store;
use outreach::summary;

#[derive(Parser)]
#[command(name = "outreach", version, about = "Automated outreach orchestration")]
struct Cli {
    /// Database path (overrides OUTREACH_DB_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show current pipeline and warm-up status.
    Status,
    /// List queued and approved batches.
    Queue,
    /// Preview the rendered email for a batch.
    Preview { id: i64 },
    /// Approve batches for sending.
    Approve {
        /// Batch ids to approve.
        ids: Vec<i64>,
        /// Approve every queued batch.
        #[arg(long)]
        all: bool,
    },
    /// Close a batch without sending.
    Skip {
        id: i64,
        #[arg(long, short)]
        reason: Option<String>,
    },
    /// Send approved batches.
    Send {
        #[arg(long)]
        dry_run: bool,
    },
    /// Process due follow-ups.
    Followups {
        #[arg(long)]
        dry_run: bool,
    },
    /// Mark a batch as replied.
    Reply {
        id: i64,
        #[arg(long, short)]
        note: Option<String>,
    },
    /// Block (or unblock) an email address.
    Block {
        email: String,
        #[arg(long, short)]
        reason: Option<String>,
        #[arg(long)]
        remove: bool,
    },
    /// Show the blocklist.
    Blocklist,
    /// Show send history.
    History {
        #[arg(long, short, default_value_t = 50)]
        limit: u32,
    },
    /// Show detailed statistics.
    Stats,
    /// Run the full pipeline over a JSON file of opportunity records.
    Process {
        /// Path to a JSON array of opportunity records.
        input: PathBuf,
        #[arg(long)]
        dry_run: bool,
        /// Qualify and batch only; do not send.
        #[arg(long)]
        no_send: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = OutreachConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    match &cli.command {
        Command::Send { dry_run } | Command::Followups { dry_run } | Command::Process { dry_run, .. } => {
            config.dry_run = config.dry_run || *dry_run;
        }
        _ => {}
    }

    for problem in config.validate() {
        eprintln!("Config warning: {problem}");
    }

    let store = Arc::new(
        Store::open(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    let transport = Arc::new(SmtpMailer::new(config.clone()));
    let resolver: Option<Arc<dyn ContactResolver>> =
        HttpContactResolver::from_env().map(|r| Arc::new(r) as Arc<dyn ContactResolver>);
    let manager = Manager::new(config.clone(), Arc::clone(&store), transport, resolver);

    match cli.command {
        Command::Status => {
            let status = manager.status().await?;
            println!("{}", summary::render_status(&status));
        }
        Command::Queue => {
            let pending = store.pending_batches().await?;
            println!("{}", summary::render_queue(&pending));
        }
        Command::Preview { id } => match store.batch(id).await? {
            Some(batch) => println!("{}", summary::render_preview(&batch)),
            None => anyhow::bail!("batch #{id} not found"),
        },
        Command::Approve { ids, all } => {
            if all {
                let count = manager.approve_all().await?;
                println!("Approved {count} batches");
            } else if ids.is_empty() {
                anyhow::bail!("specify batch ids or --all");
            } else {
                for id in ids {
                    if manager.approve(id).await? {
                        println!("Approved batch #{id}");
                    } else {
                        println!("Could not approve batch #{id} (not queued?)");
                    }
                }
            }
        }
        Command::Skip { id, reason } => {
            let reason = reason.unwrap_or_else(|| "skipped via CLI".to_string());
            if manager.skip(id, &reason).await? {
                println!("Skipped batch #{id}");
            } else {
                anyhow::bail!("could not skip batch #{id} (already sent or closed?)");
            }
        }
        Command::Send { .. } => {
            let report = manager.send_pending(None).await?;
            println!("{}", summary::render_send_report(&report, config.dry_run));
        }
        Command::Followups { .. } => {
            let report = manager.process_followups().await?;
            println!("{}", summary::render_followup_report(&report, config.dry_run));
        }
        Command::Reply { id, note } => {
            if manager.mark_replied(id, note.as_deref().unwrap_or("")).await? {
                println!("Marked batch #{id} as replied");
            } else {
                anyhow::bail!("could not mark batch #{id} as replied (not sent?)");
            }
        }
        Command::Block {
            email,
            reason,
            remove,
        } => {
            if remove {
                if store.unblock(&email).await? {
                    println!("Removed {email} from blocklist");
                } else {
                    println!("{email} was not on the blocklist");
                }
            } else {
                store
                    .block(&email, reason.as_deref().unwrap_or("manual"))
                    .await?;
                println!("Added {email} to blocklist");
            }
        }
        Command::Blocklist => {
            let entries = store.blocklist().await?;
            println!("{}", summary::render_blocklist(&entries));
        }
        Command::History { limit } => {
            let batches = store.all_batches(limit).await?;
            println!("{}", summary::render_history(&batches));
        }
        Command::Stats => {
            let stats = store.pipeline_stats().await?;
            let replies = store.recent_replies(5).await?;
            let followups =
                outreach::followup::FollowupScheduler::new(config.clone(), Arc::clone(&store))
                    .due()
                    .await?;
            println!("{}", summary::render_stats(&stats, &replies, &followups));
        }
        Command::Process {
            input, no_send, ..
        } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let opportunities: Vec<Opportunity> =
                serde_json::from_str(&raw).context("parsing opportunity records")?;

            if no_send {
                let report = manager.process_opportunities(&opportunities).await?;
                println!("{}", summary::render_process_report(&report, config.dry_run));
            } else {
                let report = manager.run(&opportunities).await?;
                println!("{}", summary::render_process_report(&report.processing, config.dry_run));
                println!();
                println!("{}", summary::render_send_report(&report.sending, config.dry_run));
                println!();
                println!("{}", summary::render_followup_report(&report.followups, config.dry_run));
            }
        }
    }

    Ok(())
}
