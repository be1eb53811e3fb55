mod api;
mod applied_log;
mod apply;
mod browser;
mod captcha;
mod config;
mod control;
mod discovery;
mod models;
mod notify;
mod worker;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use applied_log::AppliedLog;
use browser::WebDriverLauncher;
use config::Config;
use control::WorkerManager;
use models::ApplicationStatus;
use notify::PushbulletNotifier;
use worker::Worker;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "autoapply")]
#[command(about = "Unattended Easy Apply agent with an authenticated control API")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control API and the worker loop
    Serve {
        /// Wait for POST /start instead of starting the worker immediately
        #[arg(long)]
        no_autostart: bool,
    },

    /// Show the applied log
    Log {
        /// Filter by status (applied, prepared, filled_no_submit, skipped_long_form, no_easy_apply, notified, error)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Remove a posting from the applied log so it is attempted again
    Forget {
        /// Posting URL as recorded in the log
        url: String,
    },

    /// Print the control API token
    Token,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoapply=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Serve { no_autostart } => serve(config, no_autostart).await?,

        Commands::Log { status } => {
            let filter = match status.as_deref() {
                Some(s) => Some(ApplicationStatus::parse(s).ok_or_else(|| {
                    let valid: Vec<_> = ApplicationStatus::ALL.iter().map(|s| s.as_str()).collect();
                    anyhow!("Unknown status '{}'. Use one of: {}", s, valid.join(", "))
                })?),
                None => None,
            };

            let log = AppliedLog::load(&config.runtime.applied_log_path);
            let entries: Vec<_> = log
                .entries()
                .iter()
                .filter(|e| filter.is_none_or(|f| e.status == f))
                .collect();

            if entries.is_empty() {
                println!("No entries found.");
            } else {
                println!(
                    "{:<20} {:<18} {:<30} {:<20} {}",
                    "TIME", "STATUS", "TITLE", "COMPANY", "URL"
                );
                println!("{}", "-".repeat(120));
                for entry in &entries {
                    println!(
                        "{:<20} {:<18} {:<30} {:<20} {}",
                        truncate(&entry.timestamp, 19),
                        entry.status.as_str(),
                        truncate(&entry.title, 28),
                        truncate(&entry.company, 18),
                        entry.url
                    );
                }
                println!("\n{} of {} entries", entries.len(), log.len());
            }
        }

        Commands::Forget { url } => {
            let mut log = AppliedLog::load(&config.runtime.applied_log_path);
            let key = discovery::canonicalize(&url).unwrap_or(url);
            let removed = log.remove(&key);
            if removed == 0 {
                println!("No entry for {}", key);
            } else {
                log.save()?;
                println!("Removed {} entr{} for {}", removed, if removed == 1 { "y" } else { "ies" }, key);
            }
        }

        Commands::Token => {
            println!("{}", config.server.api_token);
        }
    }

    Ok(())
}

async fn serve(config: Config, no_autostart: bool) -> Result<()> {
    let config = Arc::new(config);
    let launcher = Arc::new(WebDriverLauncher::new(
        config.runtime.webdriver_url.clone(),
        config.runtime.headless,
    ));
    let notifier = Arc::new(PushbulletNotifier::new(
        config.notifications.pushbullet_api_key.clone(),
    ));
    let worker = Arc::new(Worker::new(Arc::clone(&config), launcher, notifier));
    let manager = Arc::new(WorkerManager::new(worker));

    let app = api::create_router(AppState {
        manager: Arc::clone(&manager),
        token: Arc::from(config.server.api_token.as_str()),
    });

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control API on {}", addr))?;
    tracing::info!("Control API listening on {}", addr);

    if !no_autostart {
        manager.start();
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("Control API server failed")?;

    manager.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
