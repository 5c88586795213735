//! Operator CLI: a single binary reading the same database as
//! `bridge-server` (spec §6). Every subcommand exits 0 on success and 1 on
//! any error, printing a JSON `{ok:false, code, message}` envelope on
//! stderr for the latter.

use anyhow::{Context, Result};
use bridge_core::config::Config;
use bridge_core::dispatcher::ops::{FallbackSelector, OperatorOps};
use bridge_core::store::postgres::PostgresStore;
use bridge_core::store::Stores;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bridgectl")]
#[command(about = "Operator control plane for the agent bridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print machine-readable JSON instead of a plain-text summary.
    #[arg(long, global = true)]
    json: bool,

    /// Overrides DATABASE_URL for this invocation.
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a thread's full record.
    InspectThread {
        #[arg(long)]
        thread_id: String,
    },

    /// Move a thread to blocked.
    EscalateThread {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        actor_agent_id: String,
    },

    /// Move a blocked thread back to active.
    UnblockThread {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        actor_agent_id: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Close a thread, bypassing the normal transition rules.
    OverrideCloseThread {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        actor_agent_id: String,
        #[arg(long)]
        reason: String,
    },

    /// Assign a thread's escalation owner (must currently be unset).
    AssignOwner {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        owner_agent_id: String,
        #[arg(long)]
        actor_agent_id: String,
    },

    /// Reassign a thread's escalation owner (must currently be set).
    ReassignOwner {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        owner_agent_id: String,
        #[arg(long)]
        actor_agent_id: String,
    },

    /// Print a thread's current escalation owner, if any.
    GetEscalationOwner {
        #[arg(long)]
        thread_id: String,
    },

    /// List fallback runs currently in flight.
    FallbackList,

    /// Terminate a running fallback process: SIGTERM, wait, then SIGKILL.
    FallbackKill {
        #[arg(long)]
        trigger_id: Option<String>,
        #[arg(long)]
        thread_id: Option<String>,
        #[arg(long)]
        grace_ms: Option<u64>,
    },
}

#[derive(Serialize)]
struct ErrorEnvelope {
    ok: bool,
    code: String,
    message: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        let envelope = ErrorEnvelope { ok: false, code: error_code(&err), message: err.to_string() };
        eprintln!("{}", serde_json::to_string(&envelope).unwrap());
        std::process::exit(1);
    }
}

fn error_code(err: &anyhow::Error) -> String {
    err.downcast_ref::<bridge_core::errors::BridgeError>()
        .map(|e| e.code().to_string())
        .unwrap_or_else(|| "INTERNAL".to_string())
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let database_url = cli.database_url.clone().unwrap_or_else(|| config.database_url.clone());
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    let pg = PostgresStore::new(pool);
    let stores = Stores {
        threads: Arc::new(pg.clone()),
        messages: Arc::new(pg.clone()),
        cursors: Arc::new(pg.clone()),
        sessions: Arc::new(pg.clone()),
        triggers: Arc::new(pg.clone()),
        audit: Arc::new(pg),
    };
    let ops = OperatorOps::new(stores);

    match cli.command {
        Commands::InspectThread { thread_id } => {
            let thread = ops.inspect_thread(&thread_id.clone().into()).await?;
            print_result(cli.json, &thread, || format!("{thread_id}: {}", thread.status.as_str()));
        }
        Commands::EscalateThread { thread_id, actor_agent_id } => {
            let thread = ops.escalate_thread(&thread_id.clone().into(), &actor_agent_id.into()).await?;
            print_result(cli.json, &thread, || format!("{thread_id} -> {}", thread.status.as_str()));
        }
        Commands::UnblockThread { thread_id, actor_agent_id, reason } => {
            let thread = ops.unblock_thread(&thread_id.clone().into(), &actor_agent_id.into(), reason.as_deref()).await?;
            print_result(cli.json, &thread, || format!("{thread_id} -> {}", thread.status.as_str()));
        }
        Commands::OverrideCloseThread { thread_id, actor_agent_id, reason } => {
            let thread = ops.override_close_thread(&thread_id.clone().into(), &actor_agent_id.into(), &reason).await?;
            print_result(cli.json, &thread, || format!("{thread_id} -> {}", thread.status.as_str()));
        }
        Commands::AssignOwner { thread_id, owner_agent_id, actor_agent_id } => {
            let thread = ops.assign_owner(&thread_id.clone().into(), &owner_agent_id.clone().into(), &actor_agent_id.into()).await?;
            print_result(cli.json, &thread, || format!("{thread_id} owner -> {owner_agent_id}"));
        }
        Commands::ReassignOwner { thread_id, owner_agent_id, actor_agent_id } => {
            let thread = ops.reassign_owner(&thread_id.clone().into(), &owner_agent_id.clone().into(), &actor_agent_id.into()).await?;
            print_result(cli.json, &thread, || format!("{thread_id} owner -> {owner_agent_id}"));
        }
        Commands::GetEscalationOwner { thread_id } => {
            let owner = ops.get_escalation_owner(&thread_id.clone().into()).await?;
            let summary = owner.as_ref().map(|a| a.as_str().to_string()).unwrap_or_else(|| "none".to_string());
            print_result(cli.json, &json!({ "owner_agent_id": owner }), || format!("{thread_id} owner: {summary}"));
        }
        Commands::FallbackList => {
            let runs = ops.fallback_list(&config.workspace_id.clone().into()).await?;
            if cli.json {
                println!("{}", serde_json::to_string(&runs).unwrap());
            } else if runs.is_empty() {
                println!("no fallback runs in flight");
            } else {
                for run in &runs {
                    println!("{} pid={} status={:?}", run.trigger_id, run.pid, run.status);
                }
            }
        }
        Commands::FallbackKill { trigger_id, thread_id, grace_ms } => {
            let selector = match (trigger_id, thread_id) {
                (Some(t), _) => FallbackSelector::Trigger(t.into()),
                (None, Some(t)) => FallbackSelector::Thread(t.into()),
                (None, None) => anyhow::bail!("one of --trigger-id or --thread-id is required"),
            };
            let killed = ops.fallback_kill(selector, grace_ms.unwrap_or(config.grace_ms)).await?;
            if cli.json {
                println!("{}", serde_json::to_string(&json!({ "killed": killed })).unwrap());
            } else if killed.is_empty() {
                println!("no running fallback jobs matched");
            } else {
                for id in &killed {
                    println!("killed {id}");
                }
            }
        }
    }

    Ok(())
}

fn print_result<T: Serialize>(as_json: bool, value: &T, summary: impl FnOnce() -> String) {
    if as_json {
        println!("{}", serde_json::to_string(value).unwrap());
    } else {
        println!("{}", summary());
    }
}
