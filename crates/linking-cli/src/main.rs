// ============================================================================
// xlink - Link a wallet account to a Twitter/X account
// ============================================================================
// Usage:
//   xlink link [--no-wait]                        Start a link and wait for the callback
//   xlink complete --code C --state S [--token T] Finish a link in a fresh process
//   xlink lookup <account>                        Show the link held by an account
//   xlink who-owns <twitter_user_id>              Show the account holding a Twitter id
//   xlink sessions [--status STATUS]              List linking sessions
//   xlink stats                                   Show database statistics
//   xlink prune --older-than 30 [--dry-run]       Prune finished sessions
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use linking_core::{
    AccountId, CallbackListener, CallbackParams, IdentityStore, LinkError, LinkedIdentity,
    LinkingConfig, LinkingDb, LinkingFlow, LinkingOrchestrator, LinkingSessionManager,
    SessionStatus, SessionToken, StaticWalletAuthority, TwitterOAuth,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wallet <-> Twitter identity linking
#[derive(Parser)]
#[command(name = "xlink", version, about = "Link a wallet account to a Twitter/X account")]
struct Cli {
    /// Path to the database file (default: ~/.xlink/linking.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a link for LINKING_ACCOUNT_ID
    Link {
        /// Print the authorization URL and exit instead of waiting for the callback
        #[arg(long)]
        no_wait: bool,
    },

    /// Finish a link with the parameters the provider sent to the callback
    Complete {
        #[arg(long)]
        code: String,

        #[arg(long)]
        state: String,

        /// Session token issued by `link` (default: the account's pending session)
        #[arg(long)]
        token: Option<String>,
    },

    /// Show the Twitter account linked to a wallet account
    Lookup { account: String },

    /// Show the wallet account that holds a Twitter user id
    WhoOwns { twitter_user_id: String },

    /// List linking sessions with optional status filter
    Sessions {
        /// Filter by status: pending, verified, expired, failed
        #[arg(long)]
        status: Option<String>,
    },

    /// Show database statistics (session counts, links)
    Stats,

    /// Prune finished and lapsed sessions
    Prune {
        /// Delete sessions finished more than this many days ago
        #[arg(long, default_value = "30", value_parser = clap::value_parser!(i64).range(0..=36_500))]
        older_than: i64,

        /// Show what would be pruned without actually deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_status(s: &str) -> Result<SessionStatus> {
    SessionStatus::from_str(&s.to_lowercase()).ok_or_else(|| {
        anyhow!(
            "Unknown status '{}'. Valid values: pending, verified, expired, failed",
            s
        )
    })
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("linking_core=debug".parse()?)
                .add_directive("xlink=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = LinkingConfig::from_env()?;
    let db_path = cli.db_path.clone().or_else(|| config.db_path.clone());
    let db = Arc::new(LinkingDb::open(db_path.as_deref())?);

    match cli.command {
        Commands::Link { no_wait } => cmd_link(db, &config, no_wait).await,
        Commands::Complete { code, state, token } => {
            cmd_complete(db, &config, code, state, token).await
        }
        Commands::Lookup { account } => cmd_lookup(&db, &account).await,
        Commands::WhoOwns { twitter_user_id } => cmd_who_owns(&db, &twitter_user_id).await,
        Commands::Sessions { status } => cmd_sessions(db, status),
        Commands::Stats => cmd_stats(&db),
        Commands::Prune { older_than, dry_run } => cmd_prune(db, older_than, dry_run),
    }
}

fn session_manager(db: Arc<LinkingDb>, ttl_secs: i64) -> Arc<LinkingSessionManager> {
    Arc::new(LinkingSessionManager::new(db, ttl_secs))
}

fn build_orchestrator(db: Arc<LinkingDb>, config: &LinkingConfig) -> Result<LinkingOrchestrator> {
    let oauth = TwitterOAuth::from_config(config)?;
    let wallet = StaticWalletAuthority::new(config.account_id.clone());
    let sessions = session_manager(db.clone(), config.session_ttl_secs);

    Ok(LinkingOrchestrator::new(
        Arc::new(wallet),
        sessions,
        Arc::new(oauth),
        db,
    ))
}

fn report_failure(error: LinkError) -> anyhow::Error {
    if error.is_retryable_with_fresh_session() {
        eprintln!("Start over with `xlink link`.");
    }
    anyhow!(error)
}

fn print_linked(linked: &LinkedIdentity) {
    println!("Linked {} to {} (id {})", linked.account_id, linked.external_handle, linked.external_user_id);
    println!("Linked at: {}", format_timestamp(linked.linked_at));
}

async fn cmd_link(db: Arc<LinkingDb>, config: &LinkingConfig, no_wait: bool) -> Result<()> {
    let orchestrator = build_orchestrator(db, config)?;

    // Bind before handing out the URL so an early callback is not lost
    let listener = if no_wait {
        None
    } else {
        Some(CallbackListener::bind(config.callback_addr, &config.redirect_uri)?)
    };

    let mut flow = LinkingFlow::new();
    let url = orchestrator.initiate(&mut flow).await.map_err(report_failure)?;
    let token = flow
        .token()
        .ok_or_else(|| anyhow!("Linking flow has no session token"))?
        .clone();

    println!("Open this URL to authorize with Twitter:\n\n  {}\n", url);
    flow.redirected();

    let Some(listener) = listener else {
        println!("Session token: {}", token.as_str());
        println!(
            "After authorizing, run: xlink complete --code <code> --state <state> --token {}",
            token.as_str()
        );
        return Ok(());
    };

    let timeout = Duration::from_secs(config.session_ttl_secs.max(1) as u64);
    info!("Waiting up to {}s for the callback", timeout.as_secs());
    let params = tokio::task::spawn_blocking(move || listener.wait(timeout)).await??;

    let linked = orchestrator
        .complete(&mut flow, &params)
        .await
        .map_err(report_failure)?;
    print_linked(&linked);
    Ok(())
}

async fn cmd_complete(
    db: Arc<LinkingDb>,
    config: &LinkingConfig,
    code: String,
    state: String,
    token: Option<String>,
) -> Result<()> {
    let orchestrator = build_orchestrator(db, config)?;

    let mut flow = orchestrator
        .resume(token.map(SessionToken::from_raw))
        .await
        .map_err(report_failure)?;

    let params = CallbackParams {
        code: Some(code),
        state: Some(state),
        ..CallbackParams::default()
    };
    let linked = orchestrator
        .complete(&mut flow, &params)
        .await
        .map_err(report_failure)?;
    print_linked(&linked);
    Ok(())
}

async fn cmd_lookup(db: &LinkingDb, account: &str) -> Result<()> {
    let account = AccountId::parse(account)?;
    match db.lookup(&account).await? {
        Some(linked) => println!("{}", serde_json::to_string_pretty(&linked)?),
        None => println!("{} has no linked Twitter account.", account),
    }
    Ok(())
}

async fn cmd_who_owns(db: &LinkingDb, twitter_user_id: &str) -> Result<()> {
    match db.lookup_by_external(twitter_user_id).await? {
        Some(linked) => println!("{}", serde_json::to_string_pretty(&linked)?),
        None => println!("Twitter user {} is not linked.", twitter_user_id),
    }
    Ok(())
}

fn cmd_sessions(db: Arc<LinkingDb>, status_filter: Option<String>) -> Result<()> {
    let filter = status_filter.as_deref().map(parse_status).transpose()?;
    let manager = session_manager(db, linking_core::config::DEFAULT_SESSION_TTL_SECS);
    let mut sessions = manager.list(filter)?;
    sessions.sort_by_key(|s| std::cmp::Reverse(s.created_at));

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<10}  {:<24}  {:<10}  {:<22}  {}",
        "TOKEN", "OWNER", "STATUS", "CREATED AT", "EXPIRES AT"
    );
    println!("{}", "-".repeat(96));

    for session in &sessions {
        println!(
            "{:<10}  {:<24}  {:<10}  {:<22}  {}",
            session.token.short(),
            session.owner_account_id.as_str(),
            session.status.as_str(),
            format_timestamp(session.created_at),
            format_timestamp(session.expires_at)
        );
    }

    println!("\nTotal: {} sessions", sessions.len());
    Ok(())
}

fn cmd_stats(db: &LinkingDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== XLink Database Stats ===");
    println!("Database: {}", db.path().display());
    println!();
    println!("Sessions: {} total", stats.total_sessions);
    for (status, count) in &stats.session_counts {
        println!("  {:12} {}", status, count);
    }
    println!("Links:    {}", stats.total_links);

    Ok(())
}

fn cmd_prune(db: Arc<LinkingDb>, older_than: i64, dry_run: bool) -> Result<()> {
    let manager = session_manager(db, linking_core::config::DEFAULT_SESSION_TTL_SECS);

    if dry_run {
        println!("=== DRY RUN - no data will be deleted ===\n");

        let prunable = manager.prunable(older_than)?;
        println!(
            "Would prune {} sessions older than {} days",
            prunable.len(),
            older_than
        );
        for session in &prunable {
            println!(
                "  - {} {} ({}, finished: {})",
                session.token.short(),
                session.owner_account_id,
                session.status.as_str(),
                session
                    .finished_at
                    .map(format_timestamp)
                    .unwrap_or_else(|| "N/A".into())
            );
        }
    } else {
        let pruned = manager.prune_finished(older_than)?;
        println!("Pruned {} sessions (older than {} days)", pruned, older_than);
    }

    Ok(())
}
