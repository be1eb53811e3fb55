//! Scripted in-memory [`Page`] for exercising the worker without a browser.
//!
//! A page is a set of scenes keyed by URL fragment. Navigating to a URL that
//! contains a scene's key makes that scene current. CSS locators match the
//! selectors an element was registered under; text locators match on tag plus
//! case-insensitive substring of the element text, like the real XPath.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{Element, Launcher, Locator, Page, SessionCookie};
use crate::notify::Notifier;

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub tag: String,
    pub text: String,
    pub selectors: Vec<String>,
    pub attrs: HashMap<String, String>,
    pub children: Vec<FakeElement>,
    pub broken: bool,
    /// Scene that becomes current when this element is clicked
    pub opens: Option<Box<Scene>>,
}

impl FakeElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn matches(mut self, selector: &str) -> Self {
        self.selectors.push(selector.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, child: FakeElement) -> Self {
        self.children.push(child);
        self
    }

    /// Every action on this element fails, like a stale reference.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    /// Clicking swaps the page to `scene`, like a multi-page form advancing.
    pub fn opens(mut self, scene: Scene) -> Self {
        self.opens = Some(Box::new(scene));
        self
    }

    fn is_match(&self, locator: &Locator) -> bool {
        match locator {
            Locator::Css(selector) => self.selectors.iter().any(|s| s == selector),
            Locator::Text { tag, text } => {
                &self.tag == tag && self.text.to_lowercase().contains(text.as_str())
            }
        }
    }

    fn label(&self) -> String {
        if !self.text.is_empty() {
            self.text.clone()
        } else if let Some(first) = self.selectors.first() {
            first.clone()
        } else {
            self.tag.clone()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub content: String,
    pub elements: Vec<FakeElement>,
    pub redirect_to: Option<String>,
    pub captcha_polls: usize,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn element(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn redirect_to(mut self, url: &str) -> Self {
        self.redirect_to = Some(url.to_string());
        self
    }

    /// The first `polls` content reads after this scene appears report a challenge.
    pub fn with_captcha(mut self, polls: usize) -> Self {
        self.captcha_polls = polls;
        self
    }
}

#[derive(Default)]
struct State {
    routes: Vec<(String, Scene)>,
    current: Scene,
    url: String,
    captcha_polls: usize,
    fail_navigation: bool,
    cookies: Vec<SessionCookie>,
    events: Vec<String>,
}

impl State {
    fn show(&mut self, scene: Scene) {
        if scene.captcha_polls > 0 {
            self.captcha_polls = scene.captcha_polls;
        }
        self.current = scene;
    }
}

#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<State>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url_fragment: &str, scene: Scene) -> Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .push((url_fragment.to_string(), scene));
        self
    }

    /// The next `polls` content reads report a challenge.
    pub fn with_captcha(self, polls: usize) -> Self {
        self.state.lock().unwrap().captcha_polls = polls;
        self
    }

    pub fn failing_navigation(self) -> Self {
        self.state.lock().unwrap().fail_navigation = true;
        self
    }

    pub fn with_cookies(self, cookies: Vec<SessionCookie>) -> Self {
        self.state.lock().unwrap().cookies = cookies;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count_events(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn record(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }

    fn handles(&self, elements: Vec<FakeElement>) -> Vec<Box<dyn Element>> {
        elements
            .into_iter()
            .map(|spec| {
                Box::new(FakeHandle {
                    spec,
                    page: self.clone(),
                }) as Box<dyn Element>
            })
            .collect()
    }
}

fn find_matches(elements: &[FakeElement], locator: &Locator, out: &mut Vec<FakeElement>) {
    for element in elements {
        if element.is_match(locator) {
            out.push(element.clone());
        }
        find_matches(&element.children, locator, out);
    }
}

#[async_trait]
impl Page for FakePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("navigate:{}", url));
        if state.fail_navigation {
            bail!("navigation timed out: {}", url);
        }
        let scene = state
            .routes
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, scene)| scene.clone())
            .unwrap_or_default();
        state.url = scene.redirect_to.clone().unwrap_or_else(|| url.to_string());
        state.show(scene);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn content(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.captcha_polls > 0 {
            state.captcha_polls -= 1;
            return Ok("<html>Please complete the CAPTCHA</html>".to_string());
        }
        Ok(state.current.content.clone())
    }

    async fn query(&self, locator: &Locator) -> Result<Option<Box<dyn Element>>> {
        Ok(self.query_all(locator).await?.into_iter().next())
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn Element>>> {
        let mut found = Vec::new();
        {
            let state = self.state.lock().unwrap();
            find_matches(&state.current.elements, locator, &mut found);
        }
        Ok(self.handles(found))
    }

    async fn evaluate(&self, script: &str) -> Result<()> {
        self.record(format!("eval:{}", script));
        Ok(())
    }

    async fn scroll(&self, dx: i64, dy: i64) -> Result<()> {
        self.record(format!("scroll:{},{}", dx, dy));
        Ok(())
    }

    async fn press_escape(&self) -> Result<()> {
        self.record("escape".to_string());
        Ok(())
    }

    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }

    async fn export_session(&self) -> Result<Vec<SessionCookie>> {
        Ok(self.state.lock().unwrap().cookies.clone())
    }

    async fn import_session(&self, cookies: &[SessionCookie]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("import:{}", cookies.len()));
        state.cookies = cookies.to_vec();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close".to_string());
        Ok(())
    }
}

struct FakeHandle {
    spec: FakeElement,
    page: FakePage,
}

impl FakeHandle {
    fn act(&self, action: &str, detail: Option<&str>) -> Result<()> {
        if self.spec.broken {
            bail!("stale element reference: {}", self.spec.label());
        }
        let event = match detail {
            Some(detail) => format!("{}:{}={}", action, self.spec.label(), detail),
            None => format!("{}:{}", action, self.spec.label()),
        };
        self.page.record(event);
        Ok(())
    }
}

#[async_trait]
impl Element for FakeHandle {
    async fn click(&self) -> Result<()> {
        self.act("click", None)?;
        if let Some(scene) = &self.spec.opens {
            self.page.state.lock().unwrap().show(scene.as_ref().clone());
        }
        Ok(())
    }

    async fn fill(&self, value: &str) -> Result<()> {
        self.act("fill", Some(value))
    }

    async fn text(&self) -> Result<String> {
        if self.spec.broken {
            bail!("stale element reference");
        }
        Ok(self.spec.text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.spec.attrs.get(name).cloned())
    }

    async fn set_file(&self, path: &Path) -> Result<()> {
        self.act("file", Some(&path.display().to_string()))
    }

    async fn query(&self, locator: &Locator) -> Result<Option<Box<dyn Element>>> {
        Ok(self.query_all(locator).await?.into_iter().next())
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<Box<dyn Element>>> {
        let mut found = Vec::new();
        find_matches(&self.spec.children, locator, &mut found);
        Ok(self.page.handles(found))
    }
}

/// Hands out clones of one [`FakePage`] so tests can inspect it afterwards.
pub struct FakeLauncher {
    pub page: FakePage,
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn Page>> {
        Ok(Box::new(self.page.clone()))
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str, link: Option<&str>) -> bool {
        self.sent.lock().unwrap().push((
            title.to_string(),
            body.to_string(),
            link.map(str::to_string),
        ));
        true
    }
}
