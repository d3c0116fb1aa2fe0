use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::application::usecases::CheckWatchUseCase;
use crate::application::{
    AppError, ChangeEngine, Notifier, RepositoryError, Supervisor, WatchRepository, WatchStatus,
};
use crate::domain::WatchId;
use crate::infrastructure::{
    console_notifier::ConsoleNotifier, email_notifier::EmailNotifier, http_fetcher::HttpFetcher,
    multi_notifier::MultiNotifier, sqlite_store::SqliteWatchRepository,
    telegram_notifier::TelegramNotifier, webhook_notifier::WebhookNotifier,
};
use crate::interfaces::config::Config;
use crate::interfaces::http_api::{ApiState, build_router};

pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_STORAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "pagewatch", version, about = "Watch web pages and get notified when they change")]
pub struct Cli {
    /// Path to config.yaml
    #[arg(long, global = true, default_value = "pagewatch.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a watch (inactive until started)
    Add {
        url: String,
        /// Seconds between checks; defaults to the configured interval
        interval_seconds: Option<u64>,
        /// Start monitoring right away
        #[arg(long)]
        start: bool,
    },
    /// Mark a watch active
    Start { id: WatchId },
    /// Mark a watch inactive
    Stop { id: WatchId },
    /// Stop and remove a watch
    Delete { id: WatchId },
    /// Change the interval of a watch
    Interval { id: WatchId, seconds: u64 },
    /// List all watches
    List {
        #[arg(long)]
        json: bool,
    },
    /// Fetch once and compare with the stored digest, without recording anything
    Check { id: WatchId },
    /// Run the monitoring daemon in the foreground
    Run {
        /// Serve the JSON control API on this address
        #[arg(long)]
        listen: Option<String>,
        /// Do not send external notifications (console only)
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error("config: {0:#}")]
    Config(anyhow::Error),
    #[error("http listener: {0}")]
    Listen(std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::App(AppError::Repository(RepositoryError::Io(_))) => EXIT_STORAGE,
            _ => EXIT_USAGE,
        }
    }
}

/// Loads config, executes the command and maps the outcome to an exit
/// code.
pub async fn run(cli: Cli) -> i32 {
    let cfg = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            let err = CliError::Config(e);
            eprintln!("error: {err}");
            return err.exit_code();
        }
    };

    match execute(cli.command, &cfg).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

pub async fn execute(command: Command, cfg: &Config) -> Result<(), CliError> {
    let dry_run = matches!(command, Command::Run { dry_run: true, .. });
    let repo: Arc<dyn WatchRepository> =
        Arc::new(SqliteWatchRepository::new(&cfg.database_url).await.map_err(AppError::from)?);
    let supervisor = Arc::new(build_supervisor(cfg, repo, dry_run)?);

    match command {
        Command::Add {
            url,
            interval_seconds,
            start,
        } => {
            let interval = interval_seconds.unwrap_or(cfg.default_interval_seconds);
            let watch = supervisor.add(&url, interval).await?;
            if start {
                supervisor.activate(watch.id).await?;
            }
            println!(
                "added watch {}: {} every {}s{}",
                watch.id,
                watch.url,
                watch.interval_secs,
                if start { " (active)" } else { "" }
            );
        }
        Command::Start { id } => {
            supervisor.activate(id).await?;
            println!("watch {id} marked active");
        }
        Command::Stop { id } => {
            supervisor.stop(id).await?;
            println!("watch {id} stopped");
        }
        Command::Delete { id } => {
            supervisor.delete(id).await?;
            println!("watch {id} deleted");
        }
        Command::Interval { id, seconds } => {
            supervisor.set_interval(id, seconds).await?;
            println!("watch {id} now checked every {seconds}s");
        }
        Command::List { json } => {
            let watches = supervisor.list().await?;
            if json {
                match serde_json::to_string_pretty(&watches) {
                    Ok(s) => println!("{s}"),
                    Err(e) => warn!(error = %e, "failed to encode watch list"),
                }
            } else {
                print_table(&watches);
            }
        }
        Command::Check { id } => {
            let status = supervisor.get(id).await?;
            let probe = supervisor
                .engine()
                .check()
                .probe(&status.watch)
                .await
                .map_err(AppError::from)?;
            let verdict = match probe.changed {
                None => "no baseline yet",
                Some(true) => "changed since last check",
                Some(false) => "unchanged",
            };
            println!("{}\n  digest: {}\n  {}", probe.final_url, probe.digest, verdict);
        }
        Command::Run { listen, .. } => {
            run_daemon(supervisor, cfg, listen.or_else(|| cfg.http.listen.clone())).await?;
        }
    }
    Ok(())
}

pub fn build_supervisor(
    cfg: &Config,
    repo: Arc<dyn WatchRepository>,
    dry_run: bool,
) -> Result<Supervisor, CliError> {
    let fetcher =
        HttpFetcher::new(&cfg.user_agent, cfg.max_redirects).map_err(AppError::from)?;
    let check = CheckWatchUseCase {
        fetcher: Arc::new(fetcher),
        notifier: Arc::new(build_notifier(cfg, dry_run)),
        repo: repo.clone(),
        fetch_timeout: cfg.fetch_timeout(),
        notify_timeout: cfg.notify_timeout(),
    };
    let engine = Arc::new(ChangeEngine::new(check));
    Ok(Supervisor::new(repo, engine, cfg.supervisor_config()))
}

fn build_notifier(cfg: &Config, dry_run: bool) -> MultiNotifier {
    let mut notifiers: Vec<Box<dyn Notifier>> = vec![];
    if cfg.notifiers.console || dry_run {
        notifiers.push(Box::new(ConsoleNotifier::new()));
    }
    if dry_run {
        warn!("--dry-run enabled: only console output");
        return MultiNotifier::new(notifiers);
    }

    let timeout = cfg.notify_timeout();
    if let Some(hook) = &cfg.notifiers.webhook {
        match WebhookNotifier::new(hook.url.clone(), timeout) {
            Ok(n) => notifiers.push(Box::new(n)),
            Err(e) => error!(error = %e, "webhook notifier misconfigured, disabled"),
        }
    }
    match &cfg.notifiers.telegram {
        Some(tg) => match TelegramNotifier::new(tg.token.clone(), tg.chat_id.clone(), timeout) {
            Ok(n) => notifiers.push(Box::new(n)),
            Err(e) => error!(error = %e, "telegram notifier misconfigured, disabled"),
        },
        None => info!("telegram not configured, TelegramNotifier disabled"),
    }
    match &cfg.notifiers.email {
        Some(email) => match EmailNotifier::new(&email.to_settings()) {
            Ok(n) => notifiers.push(Box::new(n)),
            Err(e) => error!(error = %e, "email notifier misconfigured, disabled"),
        },
        None => info!("email not configured, EmailNotifier disabled"),
    }
    MultiNotifier::new(notifiers)
}

async fn run_daemon(
    supervisor: Arc<Supervisor>,
    cfg: &Config,
    listen: Option<String>,
) -> Result<(), CliError> {
    let shutdown = supervisor.shutdown_token();

    let server = match listen {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(CliError::Listen)?;
            info!(addr = %addr, "control api listening");
            let router = build_router(ApiState {
                supervisor: supervisor.clone(),
                api_token: cfg.http.api_token.clone(),
            });
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await;
                if let Err(e) = served {
                    error!(error = %e, "control api failed");
                }
            }))
        }
        None => None,
    };

    let resumed = supervisor.resume_all().await?;
    info!(resumed, reconcile_secs = cfg.reconcile_interval_seconds, "monitoring started");

    let mut reconcile = tokio::time::interval(cfg.reconcile_interval());
    reconcile.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = shutdown.cancelled() => break,
            _ = reconcile.tick() => {
                if let Err(e) = supervisor.reconcile().await {
                    warn!(error = %e, "reconcile failed");
                }
            }
        }
    }

    supervisor.shutdown().await;
    if let Some(server) = server {
        let _ = server.await;
    }
    Ok(())
}

fn print_table(watches: &[WatchStatus]) {
    if watches.is_empty() {
        println!("no watches");
        return;
    }
    println!("ID\tACTIVE\tPHASE\tINTERVAL\tFAILURES\tLAST CHECKED\tLAST CHANGED\tURL");
    for s in watches {
        let w = &s.watch;
        println!(
            "{}\t{}\t{:?}\t{}s\t{}\t{}\t{}\t{}",
            w.id,
            if w.active { "yes" } else { "no" },
            s.phase,
            w.interval_secs,
            w.consecutive_failures,
            fmt_time(w.last_checked_at),
            fmt_time(w.last_changed_at),
            w.url
        );
    }
}

fn fmt_time(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
