//! Easy Apply state machine
//!
//! Drives one posting from its page to a terminal [`Outcome`]:
//! navigate, locate the apply trigger, open the form, estimate its length,
//! skip it if too long, fill what we know, then advance/submit.
//!
//! Control discovery is plain data ([`Vocabulary`]) so selectors and button
//! words can be tuned without touching the flow.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::{Element, Locator, Page};
use crate::captcha::CaptchaGate;
use crate::config::Config;
use crate::discovery::absolute_url;
use crate::models::{ApplicationStatus, JobPosting, Outcome};

const PAGE_SETTLE: Duration = Duration::from_millis(1000);
const UPLOAD_SETTLE: Duration = Duration::from_millis(600);
const ADVANCE_SETTLE: Duration = Duration::from_millis(900);
const MAX_ADVANCES: usize = 2;

#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Tried in order, first hit wins
    pub apply_triggers: Vec<Locator>,
    pub form_container: Locator,
    pub form_controls: Locator,
    /// Control text that signals another form page
    pub step_hints: Vec<&'static str>,
    pub dismiss_control: Locator,
    pub phone_fields: Vec<Locator>,
    pub file_input: Locator,
    pub submit_words: Vec<&'static str>,
    pub advance_words: Vec<&'static str>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            apply_triggers: vec![
                Locator::css("button.jobs-apply-button"),
                Locator::text("button", "Easy Apply"),
                Locator::css("button[data-control-name='apply_open']"),
            ],
            form_container: Locator::css(
                "div.jobs-easy-apply-modal, div.jobs-modal__content, div.jobs-easy-apply-form",
            ),
            form_controls: Locator::css("button, input[type='button']"),
            step_hints: vec!["next", "continue", "review", "forward"],
            dismiss_control: Locator::css(
                "button[aria-label='Dismiss'], button[aria-label='Close']",
            ),
            phone_fields: vec![
                Locator::css("input[name*='phone']"),
                Locator::css("input[placeholder*='Phone']"),
                Locator::css("input[aria-label*='phone']"),
            ],
            file_input: Locator::css("input[type='file']"),
            submit_words: vec!["submit application", "submit", "apply now", "send", "finish"],
            advance_words: vec!["next", "continue", "review"],
        }
    }
}

pub struct Applicator<'a> {
    page: &'a dyn Page,
    gate: &'a CaptchaGate,
    vocab: &'a Vocabulary,
    config: &'a Config,
}

impl<'a> Applicator<'a> {
    pub fn new(
        page: &'a dyn Page,
        gate: &'a CaptchaGate,
        vocab: &'a Vocabulary,
        config: &'a Config,
    ) -> Self {
        Self {
            page,
            gate,
            vocab,
            config,
        }
    }

    /// Always yields exactly one terminal outcome; failures become
    /// [`ApplicationStatus::Error`] with the cause in the notes.
    pub async fn apply(&self, posting: &JobPosting) -> Outcome {
        match self.run(posting).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::new(ApplicationStatus::Error, format!("{:#}", e)),
        }
    }

    async fn run(&self, posting: &JobPosting) -> Result<Outcome> {
        self.page
            .navigate(&absolute_url(&posting.url))
            .await
            .context("Failed to open posting")?;
        self.page.sleep(PAGE_SETTLE).await;
        self.gate.await_clear(self.page).await;

        let Some(trigger) = find_apply_trigger(self.page, self.vocab).await else {
            return Ok(Outcome::new(ApplicationStatus::NoEasyApply, "no Easy Apply"));
        };
        trigger
            .click()
            .await
            .context("Failed to open application form")?;
        self.page.sleep(PAGE_SETTLE).await;
        self.gate.await_clear(self.page).await;

        let steps = self.estimate_steps().await;
        let policy = &self.config.application;
        if policy.skip_long_forms && steps > policy.max_form_steps {
            info!(steps, url = %posting.url, "Skipping long application form");
            self.dismiss_form().await;
            return Ok(Outcome::new(
                ApplicationStatus::SkippedLongForm,
                format!("{} steps", steps),
            ));
        }

        self.fill_phone().await;
        self.attach_resume(&posting.title).await;

        let submitted = self.advance_and_submit().await;
        let outcome = match (submitted, policy.submit_without_review) {
            (true, true) => Outcome::new(ApplicationStatus::Applied, "submitted"),
            (true, false) => {
                Outcome::new(ApplicationStatus::Prepared, "filled but auto-submit disabled")
            }
            (false, _) => Outcome::new(
                ApplicationStatus::FilledNoSubmit,
                "could not find final submit",
            ),
        };
        Ok(outcome)
    }

    /// Forward-navigation controls in the open form, plus one. Never below 1.
    async fn estimate_steps(&self) -> u32 {
        let Ok(Some(form)) = self.page.query(&self.vocab.form_container).await else {
            return 1;
        };

        let controls = form
            .query_all(&self.vocab.form_controls)
            .await
            .unwrap_or_default();
        let mut forward = 0;
        for control in &controls {
            let label = control_label(control.as_ref()).await.to_lowercase();
            if self.vocab.step_hints.iter().any(|hint| label.contains(hint)) {
                forward += 1;
            }
        }
        (forward + 1).max(1)
    }

    async fn dismiss_form(&self) {
        match self.page.query(&self.vocab.dismiss_control).await {
            Ok(Some(close)) => {
                if let Err(e) = close.click().await {
                    debug!("Close control failed, sending Escape: {:#}", e);
                    if let Err(e) = self.page.press_escape().await {
                        debug!("Failed to dismiss form: {:#}", e);
                    }
                }
            }
            _ => {
                if let Err(e) = self.page.press_escape().await {
                    debug!("Failed to dismiss form: {:#}", e);
                }
            }
        }
    }

    async fn fill_phone(&self) {
        let phone = self.config.application.phone_number.trim();
        if phone.is_empty() {
            return;
        }
        for locator in &self.vocab.phone_fields {
            if let Ok(Some(field)) = self.page.query(locator).await {
                match field.fill(phone).await {
                    Ok(()) => return,
                    Err(e) => debug!(field = %locator, "Phone field rejected input: {:#}", e),
                }
            }
        }
    }

    async fn attach_resume(&self, title: &str) {
        let Some(resume) = self.config.application.resumes.for_title(title) else {
            return;
        };
        if !resume.exists() {
            debug!(path = %resume.display(), "Resume file not found, skipping upload");
            return;
        }
        if let Ok(Some(input)) = self.page.query(&self.vocab.file_input).await {
            match input.set_file(&resume).await {
                Ok(()) => self.page.sleep(UPLOAD_SETTLE).await,
                Err(e) => debug!("Resume upload failed: {:#}", e),
            }
        }
    }

    /// Returns whether a submit-labelled control was actuated.
    async fn advance_and_submit(&self) -> bool {
        if self.click_by_text(&self.vocab.submit_words).await {
            self.page.sleep(PAGE_SETTLE).await;
            return true;
        }

        for _ in 0..MAX_ADVANCES {
            if !self.click_by_text(&self.vocab.advance_words).await {
                break;
            }
            self.page.sleep(ADVANCE_SETTLE).await;
            self.gate.await_clear(self.page).await;
        }

        if self.click_by_text(&self.vocab.submit_words).await {
            self.page.sleep(PAGE_SETTLE).await;
            return true;
        }
        false
    }

    async fn click_by_text(&self, words: &[&str]) -> bool {
        for word in words {
            if let Ok(Some(button)) = self.page.query(&Locator::text("button", word)).await {
                if button.click().await.is_ok() {
                    return true;
                }
            }
        }
        false
    }
}

/// First apply trigger present on the current page, if any.
pub async fn find_apply_trigger(page: &dyn Page, vocab: &Vocabulary) -> Option<Box<dyn Element>> {
    for locator in &vocab.apply_triggers {
        if let Ok(Some(trigger)) = page.query(locator).await {
            return Some(trigger);
        }
    }
    None
}

async fn control_label(control: &dyn Element) -> String {
    match control.text().await {
        Ok(text) if !text.trim().is_empty() => text,
        _ => control
            .attribute("value")
            .await
            .ok()
            .flatten()
            .unwrap_or_default(),
    }
}
