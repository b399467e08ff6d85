//! Remote tracker abstraction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, StatusCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Open,
    Closed,
}

impl RemoteState {
    pub fn from_category(category: StatusCategory) -> Self {
        match category {
            StatusCategory::Open => RemoteState::Open,
            StatusCategory::Closed | StatusCategory::Archived => RemoteState::Closed,
        }
    }
}

impl std::fmt::Display for RemoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteState::Open => write!(f, "open"),
            RemoteState::Closed => write!(f, "closed"),
        }
    }
}

/// An issue as the remote tracker reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: RemoteState,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written to the remote on create/update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteIssueDraft {
    pub title: String,
    pub body: String,
    pub state: RemoteState,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
}

/// One page of a remote listing
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<RemoteIssue>,
    pub has_next: bool,
}

/// Last rate-limit budget reported by the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

/// A remote issue tracker the sync engine can reconcile against.
///
/// Calls are blocking and made one at a time. Implementations map auth
/// failures to `Error::Authentication`, exhausted budgets to
/// `Error::RateLimited` and transport failures to `Error::Network`; anything
/// the remote rejects for a single item becomes `Error::Remote`.
pub trait RemoteTracker {
    /// Check credentials; returns the authenticated account name
    fn authenticate(&mut self) -> Result<String>;

    /// List issues, 1-based `page`
    fn list_issues(&mut self, page: u32, per_page: u32) -> Result<Page>;

    /// The new issue may come back open whatever `draft.state` says; callers
    /// close it with a follow-up `update_issue`
    fn create_issue(&mut self, draft: &RemoteIssueDraft) -> Result<RemoteIssue>;

    fn update_issue(&mut self, number: u64, draft: &RemoteIssueDraft) -> Result<RemoteIssue>;

    /// Budget observed on the most recent call, if any
    fn rate_limit(&self) -> Option<RateLimit>;
}
