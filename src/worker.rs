//! Worker control loop
//!
//! One run owns a single browsing session and works serially:
//! bootstrap the session, then repeat cycles until stopped. A cycle is an
//! Easy Apply pass (apply to every new posting) followed by a normal pass
//! (alert the operator about postings that need a manual application), then
//! an idle sleep that notices a stop request within a second.
//!
//! Stop is checked between keywords, between postings and during the idle
//! sleep. A posting's apply flow, and any CAPTCHA wait inside it, always runs
//! to completion once started.

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::applied_log::AppliedLog;
use crate::apply::{Applicator, Vocabulary, find_apply_trigger};
use crate::browser::{Launcher, Locator, Page, SessionCookie};
use crate::captcha::CaptchaGate;
use crate::config::Config;
use crate::discovery::{self, SITE_ROOT, SearchQuery, absolute_url};
use crate::models::{AppliedLogEntry, ApplicationStatus, JobPosting, Outcome};
use crate::notify::Notifier;

const LOGIN_PATH: &str = "/login";
const FEED_PATH: &str = "/feed";
const LOGIN_USERNAME: &str = "input#username";
const LOGIN_PASSWORD: &str = "input#password";
const LOGIN_SUBMIT: &str = "button[type='submit']";

const PAGE_SETTLE: Duration = Duration::from_secs(1);
const EASY_APPLY_PAUSE: Duration = Duration::from_secs(2);
const NOTIFY_PAUSE: Duration = Duration::from_secs(1);

pub struct Worker {
    config: Arc<Config>,
    launcher: Arc<dyn Launcher>,
    notifier: Arc<dyn Notifier>,
    gate: CaptchaGate,
    vocab: Vocabulary,
}

impl Worker {
    pub fn new(config: Arc<Config>, launcher: Arc<dyn Launcher>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            launcher,
            notifier,
            gate: CaptchaGate::default(),
            vocab: Vocabulary::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs until `stop` is cancelled. Only a failure to open the browser is
    /// returned as an error; everything after that is logged and survived.
    pub async fn run(&self, stop: CancellationToken) -> Result<()> {
        info!("Worker started - monitoring job listings");

        let page = self
            .launcher
            .launch()
            .await
            .context("Failed to launch browser")?;
        let mut log = AppliedLog::load(&self.config.runtime.applied_log_path);
        info!(entries = log.len(), path = %log.path().display(), "Loaded applied log");

        if let Err(e) = self.bootstrap_session(page.as_ref()).await {
            warn!("Session bootstrap failed, continuing without login: {:#}", e);
        }

        while !stop.is_cancelled() {
            if let Err(e) = self.run_cycle(page.as_ref(), &mut log, &stop).await {
                error!("Cycle aborted: {:#}", e);
            }
            if stop.is_cancelled() {
                break;
            }

            info!(
                minutes = self.config.runtime.refresh_interval_minutes,
                "Sleeping before next check"
            );
            idle(&stop, self.config.refresh_interval()).await;
        }

        if let Err(e) = save_session(page.as_ref(), &self.config.runtime.session_path).await {
            warn!("Failed to save browser session: {:#}", e);
        }
        if let Err(e) = page.close().await {
            debug!("Failed to close browser: {:#}", e);
        }

        info!("Worker stopped");
        Ok(())
    }

    /// One Easy Apply pass then one normal pass over every keyword.
    pub async fn run_cycle(
        &self,
        page: &dyn Page,
        log: &mut AppliedLog,
        stop: &CancellationToken,
    ) -> Result<()> {
        self.easy_apply_pass(page, log, stop).await?;
        self.normal_pass(page, log, stop).await
    }

    async fn easy_apply_pass(
        &self,
        page: &dyn Page,
        log: &mut AppliedLog,
        stop: &CancellationToken,
    ) -> Result<()> {
        let applicator = Applicator::new(page, &self.gate, &self.vocab, &self.config);

        for keyword in &self.config.job_search.keywords {
            if stop.is_cancelled() {
                break;
            }
            let Some(jobs) = self.search(page, keyword, true).await else {
                continue;
            };
            info!(keyword = %keyword, count = jobs.len(), "Found Easy Apply jobs");

            for job in jobs {
                if log.contains(&job.url) {
                    continue;
                }
                info!(title = %job.title, company = %job.company, "Attempting Easy Apply");
                let outcome = applicator.apply(&job).await;
                if outcome.status == ApplicationStatus::Error {
                    warn!(url = %job.url, "Easy Apply failed: {}", outcome.notes);
                } else {
                    info!(url = %job.url, status = %outcome.status, "Easy Apply finished");
                }
                log.append(AppliedLogEntry::record(&job, outcome))?;

                if stop.is_cancelled() {
                    break;
                }
                page.sleep(EASY_APPLY_PAUSE).await;
            }
        }
        Ok(())
    }

    async fn normal_pass(
        &self,
        page: &dyn Page,
        log: &mut AppliedLog,
        stop: &CancellationToken,
    ) -> Result<()> {
        for keyword in &self.config.job_search.keywords {
            if stop.is_cancelled() {
                break;
            }
            let Some(jobs) = self.search(page, keyword, false).await else {
                continue;
            };
            info!(keyword = %keyword, count = jobs.len(), "Found jobs (normal pass)");

            for job in jobs {
                if log.contains(&job.url) {
                    continue;
                }

                if let Err(e) = page.navigate(&absolute_url(&job.url)).await {
                    warn!(url = %job.url, "Failed to open posting: {:#}", e);
                    continue;
                }
                page.sleep(PAGE_SETTLE).await;
                self.gate.await_clear(page).await;

                // Easy Apply postings are left for the next cycle's first pass
                if find_apply_trigger(page, &self.vocab).await.is_some() {
                    debug!(url = %job.url, "Posting has Easy Apply, leaving it for the apply pass");
                    continue;
                }

                info!(title = %job.title, company = %job.company, "NOTIFY (normal apply)");
                self.alert(&job).await;
                log.append(AppliedLogEntry::record(
                    &job,
                    Outcome::new(ApplicationStatus::Notified, "normal_apply"),
                ))?;

                if stop.is_cancelled() {
                    break;
                }
                page.sleep(NOTIFY_PAUSE).await;
            }
        }
        Ok(())
    }

    async fn search(&self, page: &dyn Page, keyword: &str, easy_apply_only: bool) -> Option<Vec<JobPosting>> {
        let query = SearchQuery {
            keyword,
            location: &self.config.job_search.location,
            remote_only: self.config.job_search.remote_only,
            easy_apply_only,
        };
        match discovery::discover(page, &self.gate, &query).await {
            Ok(jobs) => Some(jobs),
            Err(e) => {
                warn!(keyword, "Search failed: {:#}", e);
                None
            }
        }
    }

    async fn alert(&self, job: &JobPosting) {
        if !self.config.notifications.notify_for_normal_apply {
            return;
        }
        let link = absolute_url(&job.url);
        let title = format!("Job Alert: {} @ {}", job.title, job.company);
        let body = format!(
            "{} at {} - {}\n{}",
            job.title, job.company, self.config.job_search.location, link
        );
        if !self.notifier.notify(&title, &body, Some(&link)).await {
            debug!(url = %job.url, "Notification not delivered");
        }
    }

    /// Reuses saved cookies when they still hold a session, otherwise logs in.
    async fn bootstrap_session(&self, page: &dyn Page) -> Result<()> {
        let session_path = &self.config.runtime.session_path;

        page.navigate(SITE_ROOT).await?;
        if let Some(cookies) = load_session(session_path) {
            page.import_session(&cookies).await?;
        }

        page.navigate(&format!("{}{}", SITE_ROOT, FEED_PATH)).await?;
        page.sleep(PAGE_SETTLE).await;
        if !page.current_url().await?.contains("login") {
            info!("Reusing saved browser session");
            return Ok(());
        }

        info!("Logging in");
        page.navigate(&format!("{}{}", SITE_ROOT, LOGIN_PATH)).await?;
        page.sleep(PAGE_SETTLE).await;

        let login = &self.config.login;
        let (Some(username), Some(password)) = (
            page.query(&Locator::css(LOGIN_USERNAME)).await?,
            page.query(&Locator::css(LOGIN_PASSWORD)).await?,
        ) else {
            bail!("login form not found");
        };
        username.fill(&login.email).await?;
        password.fill(&login.password).await?;
        match page.query(&Locator::css(LOGIN_SUBMIT)).await? {
            Some(submit) => submit.click().await?,
            None => bail!("login submit button not found"),
        }
        self.gate.await_clear(page).await;

        save_session(page, session_path).await?;
        Ok(())
    }
}

/// Sleeps for `total` in one-second steps, returning as soon as `stop` fires.
pub async fn idle(stop: &CancellationToken, total: Duration) {
    for _ in 0..total.as_secs() {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

fn load_session(path: &Path) -> Option<Vec<SessionCookie>> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(cookies) => Some(cookies),
        Err(e) => {
            warn!(path = %path.display(), "Ignoring unreadable session file: {}", e);
            None
        }
    }
}

async fn save_session(page: &dyn Page, path: &Path) -> Result<()> {
    let cookies = page.export_session().await?;
    if cookies.is_empty() {
        return Ok(());
    }
    let json = serde_json::to_string_pretty(&cookies)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write session to {}", path.display()))?;
    Ok(())
}
