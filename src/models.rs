use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub company: String,
    pub url: String, // canonical, query string stripped
    pub easy_apply: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Applied,
    Prepared,
    FilledNoSubmit,
    SkippedLongForm,
    NoEasyApply,
    Notified,
    Error,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 7] = [
        ApplicationStatus::Applied,
        ApplicationStatus::Prepared,
        ApplicationStatus::FilledNoSubmit,
        ApplicationStatus::SkippedLongForm,
        ApplicationStatus::NoEasyApply,
        ApplicationStatus::Notified,
        ApplicationStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Prepared => "prepared",
            ApplicationStatus::FilledNoSubmit => "filled_no_submit",
            ApplicationStatus::SkippedLongForm => "skipped_long_form",
            ApplicationStatus::NoEasyApply => "no_easy_apply",
            ApplicationStatus::Notified => "notified",
            ApplicationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one pass through the apply flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: ApplicationStatus,
    pub notes: String,
}

impl Outcome {
    pub fn new(status: ApplicationStatus, notes: impl Into<String>) -> Self {
        Self {
            status,
            notes: notes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedLogEntry {
    pub timestamp: String, // ISO-8601, UTC
    pub title: String,
    pub company: String,
    pub url: String,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub notes: String,
}

impl AppliedLogEntry {
    pub fn record(posting: &JobPosting, outcome: Outcome) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            title: posting.title.clone(),
            company: posting.company.clone(),
            url: posting.url.clone(),
            status: outcome.status,
            notes: outcome.notes,
        }
    }
}
