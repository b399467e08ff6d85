//! GitHub Issues over the REST API

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::remote::{Page, RateLimit, RemoteIssue, RemoteIssueDraft, RemoteState, RemoteTracker};
use crate::{Error, Result, SyncConfig};

const USER_AGENT: &str = concat!("trackdown/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: RemoteState,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    assignee: Option<GhUser>,
    #[serde(default)]
    html_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Present when the "issue" is actually a pull request
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<GhIssue> for RemoteIssue {
    fn from(issue: GhIssue) -> Self {
        RemoteIssue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            state: issue.state,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            assignee: issue.assignee.map(|u| u.login),
            url: issue.html_url,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
        }
    }
}

/// GitHub Issues client for one repository
pub struct GitHubTracker {
    agent: ureq::Agent,
    api_url: String,
    repository: String,
    token: String,
    rate_limit: Option<RateLimit>,
}

impl GitHubTracker {
    pub fn new(api_url: &str, repository: &str, token: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(TIMEOUT).build(),
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.to_string(),
            rate_limit: None,
        }
    }

    /// Build a client from `[sync]`, reading the token from `token_env`
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let repository = config
            .repository
            .as_deref()
            .filter(|r| r.contains('/'))
            .ok_or_else(|| Error::Validation("sync.repository must be set to owner/name".into()))?;
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Authentication(format!("{} is not set", config.token_env)))?;
        Ok(Self::new(&config.api_url, repository, &token))
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}{}", self.api_url, path))
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT)
            .set("X-GitHub-Api-Version", API_VERSION)
    }

    /// Record the rate-limit headers and classify failures
    fn finish(&mut self, response: std::result::Result<ureq::Response, ureq::Error>) -> Result<ureq::Response> {
        match response {
            Ok(resp) => {
                self.observe(&resp);
                Ok(resp)
            }
            Err(ureq::Error::Status(code, resp)) => {
                self.observe(&resp);
                let exhausted = resp.header("x-ratelimit-remaining") == Some("0");
                let body = resp.into_string().unwrap_or_default();
                Err(classify_status(code, exhausted, self.rate_limit, body))
            }
            Err(e) => Err(Error::Network(e.to_string())),
        }
    }

    fn observe(&mut self, resp: &ureq::Response) {
        if let Some(limit) = parse_rate_limit(
            resp.header("x-ratelimit-limit"),
            resp.header("x-ratelimit-remaining"),
            resp.header("x-ratelimit-reset"),
        ) {
            self.rate_limit = Some(limit);
        }
    }

    fn issue_from(&self, resp: ureq::Response) -> Result<RemoteIssue> {
        let issue: GhIssue = resp
            .into_json()
            .map_err(|e| Error::Remote(format!("unexpected response: {e}")))?;
        Ok(issue.into())
    }
}

impl RemoteTracker for GitHubTracker {
    fn authenticate(&mut self) -> Result<String> {
        tracing::debug!("GET /user");
        let response = self.request("GET", "/user").call();
        let resp = self.finish(response)?;
        let user: GhUser = resp
            .into_json()
            .map_err(|e| Error::Remote(format!("unexpected response: {e}")))?;
        Ok(user.login)
    }

    fn list_issues(&mut self, page: u32, per_page: u32) -> Result<Page> {
        let path = format!("/repos/{}/issues", self.repository);
        tracing::debug!(%path, page, "listing remote issues");
        let response = self
            .request("GET", &path)
            .query("state", "all")
            .query("per_page", &per_page.to_string())
            .query("page", &page.to_string())
            .call();
        let resp = self.finish(response)?;

        let has_next = resp.header("link").is_some_and(has_next_page);
        let issues: Vec<GhIssue> = resp
            .into_json()
            .map_err(|e| Error::Remote(format!("unexpected response: {e}")))?;
        let items = issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(RemoteIssue::from)
            .collect();
        Ok(Page { items, has_next })
    }

    fn create_issue(&mut self, draft: &RemoteIssueDraft) -> Result<RemoteIssue> {
        let path = format!("/repos/{}/issues", self.repository);
        tracing::debug!(%path, title = %draft.title, "creating remote issue");
        let response = self.request("POST", &path).send_json(json!({
            "title": draft.title,
            "body": draft.body,
            "labels": draft.labels,
            "assignees": draft.assignee.iter().collect::<Vec<_>>(),
        }));
        let resp = self.finish(response)?;
        self.issue_from(resp)
    }

    fn update_issue(&mut self, number: u64, draft: &RemoteIssueDraft) -> Result<RemoteIssue> {
        let path = format!("/repos/{}/issues/{number}", self.repository);
        tracing::debug!(%path, "updating remote issue");
        let response = self.request("PATCH", &path).send_json(json!({
            "title": draft.title,
            "body": draft.body,
            "state": draft.state,
            "labels": draft.labels,
            "assignees": draft.assignee.iter().collect::<Vec<_>>(),
        }));
        let resp = self.finish(response)?;
        self.issue_from(resp)
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }
}

fn classify_status(code: u16, exhausted: bool, limit: Option<RateLimit>, body: String) -> Error {
    match code {
        403 | 429 if exhausted || code == 429 => Error::RateLimited {
            reset_at: limit.and_then(|l| l.reset_at),
        },
        401 | 403 => Error::Authentication(format!("HTTP {code}: {body}")),
        _ => Error::Remote(format!("HTTP {code}: {body}")),
    }
}

fn parse_rate_limit(limit: Option<&str>, remaining: Option<&str>, reset: Option<&str>) -> Option<RateLimit> {
    let limit = limit?.trim().parse().ok()?;
    let remaining = remaining?.trim().parse().ok()?;
    let reset_at = reset
        .and_then(|r| r.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    Some(RateLimit {
        limit,
        remaining,
        reset_at,
    })
}

/// Whether a `Link` header advertises a `rel="next"` page
fn has_next_page(link: &str) -> bool {
    link.split(',')
        .any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\""))
}
