use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{error, info, warn};

const PUSHBULLET_URL: &str = "https://api.pushbullet.com/v2/pushes";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget alert to the operator. Returns whether delivery succeeded;
/// callers never treat `false` as an error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str, link: Option<&str>) -> bool;
}

pub struct PushbulletNotifier {
    api_key: String,
    client: reqwest::Client,
}

impl PushbulletNotifier {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { api_key, client }
    }
}

fn push_payload(title: &str, body: &str, link: Option<&str>) -> Value {
    match link {
        Some(url) => json!({"type": "link", "title": title, "body": body, "url": url}),
        None => json!({"type": "note", "title": title, "body": body}),
    }
}

#[async_trait]
impl Notifier for PushbulletNotifier {
    async fn notify(&self, title: &str, body: &str, link: Option<&str>) -> bool {
        if self.api_key.is_empty() {
            info!("Pushbullet API key not configured - skipping notification");
            return false;
        }

        let response = self
            .client
            .post(PUSHBULLET_URL)
            .header("Access-Token", &self.api_key)
            .json(&push_payload(title, body, link))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                info!("Pushbullet: notification sent");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                warn!(%status, "Pushbullet failed: {}", text);
                false
            }
            Err(e) => {
                error!("Pushbullet error: {}", e);
                false
            }
        }
    }
}
