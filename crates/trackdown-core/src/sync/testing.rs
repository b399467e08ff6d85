//! In-memory remote tracker for sync tests

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::remote::{Page, RateLimit, RemoteIssue, RemoteIssueDraft, RemoteState, RemoteTracker};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct MemoryTracker {
    issues: BTreeMap<u64, RemoteIssue>,
    pull_requests: BTreeSet<u64>,
    rejected_titles: Vec<String>,
    offline: bool,
    remaining: Option<u32>,
    list_calls: usize,
    update_calls: usize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, number: u64, title: &str, body: &str, state: RemoteState, updated_at: DateTime<Utc>) {
        self.issues.insert(
            number,
            RemoteIssue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                state,
                labels: Vec::new(),
                assignee: None,
                url: Some(format!("https://example.test/issues/{number}")),
                created_at: updated_at,
                updated_at,
            },
        );
    }

    /// Shares the issue numbering but never shows up in listings
    pub fn insert_pull_request(&mut self, number: u64, updated_at: DateTime<Utc>) {
        self.insert(number, &format!("PR {number}"), "", RemoteState::Open, updated_at);
        self.pull_requests.insert(number);
    }

    pub fn set_labels(&mut self, number: u64, labels: &[&str]) {
        if let Some(issue) = self.issues.get_mut(&number) {
            issue.labels = labels.iter().map(|l| l.to_string()).collect();
        }
    }

    pub fn set_assignee(&mut self, number: u64, assignee: &str) {
        if let Some(issue) = self.issues.get_mut(&number) {
            issue.assignee = Some(assignee.to_string());
        }
    }

    pub fn get(&self, number: u64) -> Option<&RemoteIssue> {
        self.issues.get(&number)
    }

    /// Creates and updates with this title are refused with `Error::Remote`
    pub fn reject_title(&mut self, title: &str) {
        self.rejected_titles.push(title.to_string());
    }

    /// Every call fails with `Error::Network`
    pub fn go_offline(&mut self) {
        self.offline = true;
    }

    pub fn set_remaining(&mut self, remaining: u32) {
        self.remaining = Some(remaining);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls
    }

    fn check(&self, draft: Option<&RemoteIssueDraft>) -> Result<()> {
        if self.offline {
            return Err(Error::Network("connection refused".into()));
        }
        if let Some(draft) = draft
            && self.rejected_titles.contains(&draft.title)
        {
            return Err(Error::Remote(format!("HTTP 422: rejected {}", draft.title)));
        }
        Ok(())
    }

    fn write(&mut self, number: u64, draft: &RemoteIssueDraft) -> RemoteIssue {
        let now = Utc::now();
        let created_at = self.issues.get(&number).map_or(now, |i| i.created_at);
        let issue = RemoteIssue {
            number,
            title: draft.title.clone(),
            body: draft.body.clone(),
            state: draft.state,
            labels: draft.labels.clone(),
            assignee: draft.assignee.clone(),
            url: Some(format!("https://example.test/issues/{number}")),
            created_at,
            updated_at: now,
        };
        self.issues.insert(number, issue.clone());
        issue
    }
}

impl RemoteTracker for MemoryTracker {
    fn authenticate(&mut self) -> Result<String> {
        self.check(None)?;
        Ok("tester".to_string())
    }

    fn list_issues(&mut self, page: u32, per_page: u32) -> Result<Page> {
        self.check(None)?;
        self.list_calls += 1;
        let per_page = per_page.max(1) as usize;
        let start = (page.max(1) as usize - 1) * per_page;
        let items: Vec<RemoteIssue> = self
            .issues
            .values()
            .skip(start)
            .take(per_page)
            .filter(|i| !self.pull_requests.contains(&i.number))
            .cloned()
            .collect();
        Ok(Page {
            has_next: start + per_page < self.issues.len(),
            items,
        })
    }

    fn create_issue(&mut self, draft: &RemoteIssueDraft) -> Result<RemoteIssue> {
        self.check(Some(draft))?;
        let number = self.issues.keys().next_back().map_or(1, |n| n + 1);
        let open = RemoteIssueDraft {
            state: RemoteState::Open,
            ..draft.clone()
        };
        Ok(self.write(number, &open))
    }

    fn update_issue(&mut self, number: u64, draft: &RemoteIssueDraft) -> Result<RemoteIssue> {
        self.check(Some(draft))?;
        if !self.issues.contains_key(&number) {
            return Err(Error::Remote(format!("HTTP 404: issue #{number}")));
        }
        self.update_calls += 1;
        Ok(self.write(number, draft))
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        self.remaining.map(|remaining| RateLimit {
            limit: 5000,
            remaining,
            reset_at: None,
        })
    }
}
