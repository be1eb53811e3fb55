use anyhow::{Context, Result};
use reqwest::Url;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::{Element, Locator, Page};
use crate::captcha::CaptchaGate;
use crate::models::JobPosting;

pub const SITE_ROOT: &str = "https://www.linkedin.com";
const SEARCH_PATH: &str = "/jobs/search/";

// Lazy-loading is triggered by a fixed number of scrolls, not until exhaustion
const SCROLL_CYCLES: usize = 8;
const SCROLL_STEP: i64 = 800;
const SCROLL_PAUSE: Duration = Duration::from_millis(400);
const SETTLE_PAUSE: Duration = Duration::from_millis(1200);

const RESULT_CARDS: &str = "ul.jobs-search__results-list li";
const CARD_TITLE: &str = "h3";
const CARD_COMPANY: &str = "h4";
const CARD_LINK: &str = "a.job-card-list__title";
const CARD_LINK_FALLBACK: &str = "a";

#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub keyword: &'a str,
    pub location: &'a str,
    pub remote_only: bool,
    pub easy_apply_only: bool,
}

impl SearchQuery<'_> {
    /// `f_E=1` internship level, `f_AL=true` Easy Apply, `f_WT=2` remote.
    pub fn url(&self) -> Result<Url> {
        let mut params = vec![
            ("keywords", self.keyword.trim()),
            ("location", self.location.trim()),
            ("f_E", "1"),
        ];
        if self.easy_apply_only {
            params.push(("f_AL", "true"));
        }
        if self.remote_only {
            params.push(("f_WT", "2"));
        }
        Url::parse_with_params(&format!("{}{}", SITE_ROOT, SEARCH_PATH), &params)
            .context("Failed to build search URL")
    }
}

/// Strips tracking query parameters and fragments from a posting link.
pub fn canonicalize(href: &str) -> Option<String> {
    let href = href.trim();
    let end = href.find(['?', '#']).unwrap_or(href.len());
    let clean = &href[..end];
    if clean.is_empty() {
        None
    } else {
        Some(clean.to_string())
    }
}

/// Makes a site-relative posting URL navigable.
pub fn absolute_url(url: &str) -> String {
    if url.starts_with('/') {
        format!("{}{}", SITE_ROOT, url)
    } else {
        url.to_string()
    }
}

/// Runs one search and returns the postings visible after lazy loading,
/// deduplicated by URL (first occurrence wins).
pub async fn discover(
    page: &dyn Page,
    gate: &CaptchaGate,
    query: &SearchQuery<'_>,
) -> Result<Vec<JobPosting>> {
    info!(
        keyword = query.keyword,
        location = query.location,
        easy_apply = query.easy_apply_only,
        "Searching job listings"
    );

    page.navigate(query.url()?.as_str())
        .await
        .context("Failed to open search results")?;
    page.sleep(SETTLE_PAUSE).await;
    gate.await_clear(page).await;

    for _ in 0..SCROLL_CYCLES {
        if let Err(e) = page.scroll(0, SCROLL_STEP).await {
            debug!("Scroll failed: {:#}", e);
        }
        page.sleep(SCROLL_PAUSE).await;
    }

    let cards = page
        .query_all(&Locator::css(RESULT_CARDS))
        .await
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let mut postings = Vec::new();
    for card in cards {
        let Some(posting) = extract_posting(card.as_ref(), query.easy_apply_only).await else {
            continue;
        };
        if seen.insert(posting.url.clone()) {
            postings.push(posting);
        }
    }

    Ok(postings)
}

async fn extract_posting(card: &dyn Element, easy_apply: bool) -> Option<JobPosting> {
    let link = match card.query(&Locator::css(CARD_LINK)).await {
        Ok(Some(link)) => Some(link),
        _ => card
            .query(&Locator::css(CARD_LINK_FALLBACK))
            .await
            .ok()
            .flatten(),
    }?;

    let href = link.attribute("href").await.ok().flatten()?;
    let url = canonicalize(&href)?;

    Some(JobPosting {
        title: child_text(card, CARD_TITLE).await,
        company: child_text(card, CARD_COMPANY).await,
        url,
        easy_apply,
    })
}

async fn child_text(card: &dyn Element, selector: &str) -> String {
    match card.query(&Locator::css(selector)).await {
        Ok(Some(el)) => el.text().await.map(|t| t.trim().to_string()).unwrap_or_default(),
        _ => String::new(),
    }
}
