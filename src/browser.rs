//! Page automation capability set
//!
//! The worker only talks to the browser through [`Page`] and [`Element`].
//! Every lookup returns `Ok(None)` / an empty list when nothing matches;
//! `Err` is reserved for transport failures (dead session, timeouts).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thirtyfour::ChromiumLikeCapabilities;
use thirtyfour::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    /// `tag` element whose normalized text contains `text` (case-insensitive)
    Text { tag: String, text: String },
}

impl Locator {
    pub fn css(selector: &str) -> Self {
        Locator::Css(selector.to_string())
    }

    pub fn text(tag: &str, text: &str) -> Self {
        Locator::Text {
            tag: tag.to_string(),
            text: text.to_lowercase(),
        }
    }

    fn to_xpath(tag: &str, text: &str) -> String {
        format!(
            ".//{}[contains(translate(normalize-space(.),'ABCDEFGHIJKLMNOPQRSTUVWXYZ','abcdefghijklmnopqrstuvwxyz'), '{}')]",
            tag,
            text.replace('\'', "")
        )
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "{}", selector),
            Locator::Text { tag, text } => write!(f, "{}:text({})", tag, text),
        }
    }
}

/// Browser cookie as persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
}

#[async_trait]
pub trait Element: Send + Sync {
    async fn click(&self) -> Result<()>;
    async fn fill(&self, value: &str) -> Result<()>;
    async fn text(&self) -> Result<String>;
    async fn attribute(&self, name: &str) -> Result<Option<String>>;
    async fn set_file(&self, path: &Path) -> Result<()>;
    async fn query(&self, locator: &Locator) -> Result<Option<Box<dyn Element>>>;
    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn Element>>>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn content(&self) -> Result<String>;
    async fn query(&self, locator: &Locator) -> Result<Option<Box<dyn Element>>>;
    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn Element>>>;
    async fn evaluate(&self, script: &str) -> Result<()>;
    async fn scroll(&self, dx: i64, dy: i64) -> Result<()>;

    /// Sends Escape to whatever has focus (closes most modals).
    async fn press_escape(&self) -> Result<()>;

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn export_session(&self) -> Result<Vec<SessionCookie>> {
        Ok(Vec::new())
    }

    async fn import_session(&self, _cookies: &[SessionCookie]) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens a fresh browsing session for one worker run.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Page>>;
}

pub struct WebDriverLauncher {
    server_url: String,
    headless: bool,
}

impl WebDriverLauncher {
    pub fn new(server_url: String, headless: bool) -> Self {
        Self {
            server_url,
            headless,
        }
    }
}

#[async_trait]
impl Launcher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn Page>> {
        let page = WebDriverPage::connect(&self.server_url, self.headless).await?;
        Ok(Box::new(page))
    }
}

/// [`Page`] backed by a chromedriver session.
pub struct WebDriverPage {
    driver: WebDriver,
}

impl WebDriverPage {
    pub async fn connect(server_url: &str, headless: bool) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        if headless {
            caps.set_headless()?;
        }
        caps.add_arg("--disable-blink-features=AutomationControlled")?;

        let driver = WebDriver::new(server_url, caps).await.context(
            "Failed to start browser session. Make sure chromedriver is running at the configured webdriver_url.",
        )?;

        Ok(Self { driver })
    }
}

enum Scope<'a> {
    Root(&'a WebDriver),
    Within(&'a WebElement),
}

async fn find_all_in(scope: Scope<'_>, locator: &Locator) -> Result<Vec<Box<dyn Element>>> {
    let xpath = match locator {
        Locator::Css(_) => String::new(),
        Locator::Text { tag, text } => Locator::to_xpath(tag, text),
    };
    let by = match locator {
        Locator::Css(selector) => By::Css(selector.as_str()),
        Locator::Text { .. } => By::XPath(xpath.as_str()),
    };

    let found = match scope {
        Scope::Root(driver) => driver.find_all(by).await,
        Scope::Within(element) => element.find_all(by).await,
    }
    .with_context(|| format!("Failed to query {}", locator))?;

    Ok(found
        .into_iter()
        .map(|el| Box::new(WebDriverElement(el)) as Box<dyn Element>)
        .collect())
}

#[async_trait]
impl Page for WebDriverPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        tracing::debug!(url, "navigating");
        self.driver
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {}", url))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.driver.current_url().await?.to_string())
    }

    async fn content(&self) -> Result<String> {
        self.driver
            .source()
            .await
            .context("Failed to read page source")
    }

    async fn query(&self, locator: &Locator) -> Result<Option<Box<dyn Element>>> {
        Ok(self.query_all(locator).await?.into_iter().next())
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn Element>>> {
        find_all_in(Scope::Root(&self.driver), locator).await
    }

    async fn evaluate(&self, script: &str) -> Result<()> {
        self.driver
            .execute(script, Vec::new())
            .await
            .context("Failed to evaluate script")?;
        Ok(())
    }

    async fn scroll(&self, dx: i64, dy: i64) -> Result<()> {
        self.evaluate(&format!("window.scrollBy({}, {});", dx, dy))
            .await
    }

    async fn press_escape(&self) -> Result<()> {
        self.evaluate(
            "(document.activeElement || document.body).dispatchEvent(\
             new KeyboardEvent('keydown', {key: 'Escape', code: 'Escape', keyCode: 27, bubbles: true}));",
        )
        .await
    }

    async fn export_session(&self) -> Result<Vec<SessionCookie>> {
        let cookies = self
            .driver
            .get_all_cookies()
            .await
            .context("Failed to read browser cookies")?;
        cookies
            .iter()
            .map(|cookie| Ok(serde_json::from_value(serde_json::to_value(cookie)?)?))
            .collect()
    }

    async fn import_session(&self, cookies: &[SessionCookie]) -> Result<()> {
        for stored in cookies {
            let cookie: Cookie = serde_json::from_value(serde_json::to_value(stored)?)?;
            if let Err(e) = self.driver.add_cookie(cookie).await {
                tracing::debug!(name = %stored.name, "Skipping cookie the browser rejected: {}", e);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.driver
            .clone()
            .quit()
            .await
            .context("Failed to close browser session")
    }
}

struct WebDriverElement(WebElement);

#[async_trait]
impl Element for WebDriverElement {
    async fn click(&self) -> Result<()> {
        self.0.click().await.context("Failed to click element")
    }

    async fn fill(&self, value: &str) -> Result<()> {
        self.0.clear().await.context("Failed to clear input")?;
        self.0
            .send_keys(value)
            .await
            .context("Failed to type into input")
    }

    async fn text(&self) -> Result<String> {
        Ok(self.0.text().await?)
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.0.attr(name).await?)
    }

    async fn set_file(&self, path: &Path) -> Result<()> {
        self.0
            .send_keys(path.display().to_string())
            .await
            .with_context(|| format!("Failed to attach {}", path.display()))
    }

    async fn query(&self, locator: &Locator) -> Result<Option<Box<dyn Element>>> {
        Ok(self.query_all(locator).await?.into_iter().next())
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn Element>>> {
        find_all_in(Scope::Within(&self.0), locator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_locator_lowercases_and_builds_xpath() {
        let locator = Locator::text("button", "Easy Apply");
        assert_eq!(
            locator,
            Locator::Text {
                tag: "button".to_string(),
                text: "easy apply".to_string()
            }
        );

        let xpath = Locator::to_xpath("button", "easy apply");
        assert!(xpath.starts_with(".//button[contains(translate("));
        assert!(xpath.ends_with("'easy apply')]"));
    }

    #[test]
    fn test_session_cookie_uses_webdriver_field_names() {
        let cookie = SessionCookie {
            name: "li_at".to_string(),
            value: "abc".to_string(),
            domain: Some(".linkedin.com".to_string()),
            path: Some("/".to_string()),
            secure: Some(true),
            http_only: Some(true),
            expiry: None,
        };
        let json = serde_json::to_value(&cookie).unwrap();
        assert_eq!(json["httpOnly"], serde_json::json!(true));
        assert!(json.get("expiry").is_none());
    }

    #[tokio::test]
    #[ignore] // Needs a running chromedriver
    async fn test_webdriver_page_reads_content() {
        let page = WebDriverPage::connect("http://localhost:9515", true)
            .await
            .expect("Failed to connect to chromedriver");
        page.navigate("https://example.com").await.unwrap();
        let content = page.content().await.unwrap();
        assert!(content.to_lowercase().contains("example"));
        page.close().await.unwrap();
    }
}
