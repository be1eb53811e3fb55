//! CAPTCHA gate
//!
//! Detects an automated-traffic challenge and blocks until a human solves it
//! in the browser window. There is deliberately no timeout: an unresolved
//! challenge stalls the whole worker.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{Locator, Page};

const VERIFICATION_MARKER: &str = "captcha";
const CHALLENGE_FRAME: &str = "iframe[src*='recaptcha']";

const FLASH_SCRIPT: &str = "document.body.style.backgroundColor = \
     document.body.style.backgroundColor === 'red' ? 'white' : 'red';";
const RESET_SCRIPT: &str = "document.body.style.backgroundColor = '';";

#[derive(Debug, Clone)]
pub struct CaptchaGate {
    pub poll_interval: Duration,
    /// Cue toggled on every poll while the challenge is up
    pub flash_script: String,
    pub reset_script: String,
    challenge_frame: Locator,
}

impl Default for CaptchaGate {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            flash_script: FLASH_SCRIPT.to_string(),
            reset_script: RESET_SCRIPT.to_string(),
            challenge_frame: Locator::css(CHALLENGE_FRAME),
        }
    }
}

impl CaptchaGate {
    /// Returns immediately when no challenge is showing.
    pub async fn await_clear(&self, page: &dyn Page) {
        if !self.challenge_present(page).await {
            return;
        }

        warn!("CAPTCHA detected - please solve it in the opened browser. Waiting until cleared...");

        loop {
            if !self.challenge_present(page).await {
                if let Err(e) = page.evaluate(&self.reset_script).await {
                    debug!("Failed to reset CAPTCHA cue: {:#}", e);
                }
                info!("CAPTCHA cleared - resuming");
                return;
            }

            if let Err(e) = page.evaluate(&self.flash_script).await {
                debug!("Failed to flash CAPTCHA cue: {:#}", e);
            }
            page.sleep(self.poll_interval).await;
        }
    }

    async fn challenge_present(&self, page: &dyn Page) -> bool {
        // An unreadable page counts as "no marker"; the frame check still runs
        let content = page.content().await.unwrap_or_default().to_lowercase();
        if content.contains(VERIFICATION_MARKER) {
            return true;
        }
        matches!(page.query(&self.challenge_frame).await, Ok(Some(_)))
    }
}
