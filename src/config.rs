//! Agent configuration
//!
//! Loaded once from `agent_config.yaml` at startup and shared read-only.
//! The only write-back is the API token, generated on first run when the
//! `server.api_token` key is empty.

use anyhow::{Context, Result, bail};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "agent_config.yaml";

const TOKEN_LEN: usize = 32;

// Title fragments that route an application to the data-science resume
const DATA_SCIENCE_HINTS: [&str; 6] = ["data", "machine", "ml", "ai", "analyst", "scientist"];

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Login {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSearch {
    pub keywords: Vec<String>,
    pub location: String,
    pub remote_only: bool,
}

impl Default for JobSearch {
    fn default() -> Self {
        Self {
            keywords: vec!["Internship".to_string()],
            location: "India".to_string(),
            remote_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Resumes {
    pub data_science: String,
    pub software_engineering: String,
}

impl Resumes {
    /// Picks the resume for a posting title. `None` when the chosen path is unset.
    pub fn for_title(&self, title: &str) -> Option<PathBuf> {
        let lower = title.to_lowercase();
        let path = if DATA_SCIENCE_HINTS.iter().any(|hint| lower.contains(hint)) {
            &self.data_science
        } else {
            &self.software_engineering
        };
        if path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub phone_number: String,
    pub resumes: Resumes,
    pub skip_long_forms: bool,
    pub max_form_steps: u32,
    pub submit_without_review: bool,
}

impl Default for Application {
    fn default() -> Self {
        Self {
            phone_number: String::new(),
            resumes: Resumes::default(),
            skip_long_forms: true,
            max_form_steps: 2,
            submit_without_review: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub pushbullet_api_key: String,
    pub notify_for_normal_apply: bool,
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            pushbullet_api_key: String::new(),
            notify_for_normal_apply: true,
        }
    }
}

impl fmt::Debug for Notifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifications")
            .field("pushbullet_api_key", &redact(&self.pushbullet_api_key))
            .field("notify_for_normal_apply", &self.notify_for_normal_apply)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub api_token: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            api_token: String::new(),
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_token", &redact(&self.api_token))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Runtime {
    pub refresh_interval_minutes: u64,
    pub webdriver_url: String,
    pub headless: bool,
    pub applied_log_path: PathBuf,
    pub session_path: PathBuf,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: 5,
            webdriver_url: "http://localhost:9515".to_string(),
            headless: false,
            applied_log_path: PathBuf::from("applied_log.json"),
            session_path: PathBuf::from("browser_session.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub login: Login,
    pub job_search: JobSearch,
    pub application: Application,
    pub notifications: Notifications,
    pub server: Server,
    pub runtime: Runtime,
}

impl Config {
    /// Resolves the config file location: `./agent_config.yaml` if present,
    /// otherwise the per-user config directory, otherwise the working directory.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return local;
        }
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "autoapply") {
            let candidate = proj_dirs.config_dir().join(DEFAULT_CONFIG_FILE);
            if candidate.exists() {
                return candidate;
            }
        }
        local
    }

    /// Reads, validates and (if needed) token-bootstraps the config at `path`.
    ///
    /// Relative runtime paths are resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!(
                "{} missing - create it first and fill in credentials",
                path.display()
            );
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.server.api_token.trim().is_empty() {
            let token = generate_token();
            persist_token(path, &raw, &token)?;
            config.server.api_token = token;
            tracing::info!(path = %path.display(), "Generated API token and saved it to config (keep it secret)");
        }

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.runtime.applied_log_path = base.join(&config.runtime.applied_log_path);
        config.runtime.session_path = base.join(&config.runtime.session_path);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_search.keywords.iter().all(|k| k.trim().is_empty()) {
            bail!("job_search.keywords must contain at least one keyword");
        }

        if self.runtime.refresh_interval_minutes == 0 {
            bail!("runtime.refresh_interval_minutes must be greater than 0");
        }

        if self.application.max_form_steps == 0 {
            bail!("application.max_form_steps must be greater than 0");
        }

        if !self.runtime.webdriver_url.starts_with("http://")
            && !self.runtime.webdriver_url.starts_with("https://")
        {
            bail!("runtime.webdriver_url must start with http:// or https://");
        }

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.refresh_interval_minutes * 60)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "[redacted]" }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Writes the token into `server.api_token`, keeping every other key of the
/// original document intact.
fn persist_token(path: &Path, raw: &str, token: &str) -> Result<()> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(raw)?;
    if !doc.is_mapping() {
        doc = serde_yaml::Value::Mapping(Default::default());
    }
    let root = doc
        .as_mapping_mut()
        .context("config root is not a mapping")?;
    if !matches!(root.get("server"), Some(section) if section.is_mapping()) {
        root.insert("server".into(), serde_yaml::Value::Mapping(Default::default()));
    }
    if let Some(server) = root.get_mut("server").and_then(|v| v.as_mapping_mut()) {
        server.insert("api_token".into(), token.into());
    }

    let out = serde_yaml::to_string(&doc)?;
    std::fs::write(path, out)
        .with_context(|| format!("Failed to write API token to {}", path.display()))?;
    Ok(())
}
