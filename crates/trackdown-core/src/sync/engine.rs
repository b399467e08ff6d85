//! Reconciliation between local tickets and a remote tracker
//!
//! A pass lists every remote page, loads every local ticket of the synced
//! kinds and settles each linked pair. Fatal remote errors (auth, rate limit,
//! network) abort the pass; everything else is recorded per item and the
//! pass continues. The checkpoint only moves when a full pass completes.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::remote::{RemoteIssue, RemoteIssueDraft, RemoteState, RemoteTracker};
use crate::document::{join_trailer, split_trailer};
use crate::store::write_atomic;
use crate::{
    ConflictStrategy, Error, IdAllocator, NewTicket, RemoteLink, Result, Role, State,
    StateEngine, StateMetadata, Status, StatusCategory, SyncStatus, Ticket, TicketKind,
    TicketStore,
};

const REMOTE_SYNC_SOURCE: &str = "remote-sync";

/// Persisted in `.trackdown/sync-state.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub rate_limit_remaining: Option<u32>,
}

impl SyncState {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncHealth {
    Healthy,
    Degraded,
    Failed,
}

impl std::fmt::Display for SyncHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncHealth::Healthy => write!(f, "healthy"),
            SyncHealth::Degraded => write!(f, "degraded"),
            SyncHealth::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusReport {
    pub enabled: bool,
    pub repository: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub rate_limit_remaining: Option<u32>,
    pub sync_health: SyncHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Side::Local),
            "remote" => Ok(Side::Remote),
            _ => Err(Error::Validation(format!("unknown side '{s}', expected local or remote"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictRecord {
    pub id: String,
    pub number: u64,
    pub local_updated: DateTime<Utc>,
    pub remote_updated: DateTime<Utc>,
    /// None under the manual strategy
    pub winner: Option<Side>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    /// Ticket id, remote number or document path
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub created_local: usize,
    pub created_remote: usize,
    pub unchanged: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub failed: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    fn fail(&mut self, item: impl Into<String>, error: &Error) {
        let item = item.into();
        tracing::warn!(%item, %error, "sync item failed");
        self.failed.push(ItemFailure {
            item,
            error: error.to_string(),
        });
    }
}

/// Which way changes may flow in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Push,
    Pull,
    Both,
}

impl Direction {
    fn pushes(self) -> bool {
        matches!(self, Direction::Push | Direction::Both)
    }

    fn pulls(self) -> bool {
        matches!(self, Direction::Pull | Direction::Both)
    }
}

/// True iff both sides changed since the last completed pass
pub fn has_conflict(
    local_updated: DateTime<Utc>,
    remote_updated: DateTime<Utc>,
    last_sync: Option<DateTime<Utc>>,
) -> bool {
    match last_sync {
        Some(last) => local_updated > last && remote_updated > last,
        None => false,
    }
}

fn most_recent(local_updated: DateTime<Utc>, remote_updated: DateTime<Utc>) -> Side {
    if remote_updated > local_updated {
        Side::Remote
    } else {
        Side::Local
    }
}

/// The shared part of a ticket as the remote sees it
pub fn draft_for(ticket: &Ticket) -> RemoteIssueDraft {
    let (shared, _) = split_trailer(&ticket.content);
    RemoteIssueDraft {
        title: ticket.title.clone(),
        body: shared.trim().to_string(),
        state: RemoteState::from_category(ticket.category()),
        labels: ticket.tags.clone(),
        assignee: ticket.assignee.clone(),
    }
}

fn sorted(labels: &[String]) -> Vec<&str> {
    let mut labels: Vec<&str> = labels.iter().map(String::as_str).collect();
    labels.sort_unstable();
    labels
}

fn in_sync(ticket: &Ticket, remote: &RemoteIssue) -> bool {
    let draft = draft_for(ticket);
    draft.title == remote.title
        && draft.body == remote.body.trim()
        && draft.state == remote.state
        && draft.assignee == remote.assignee
        && sorted(&draft.labels) == sorted(&remote.labels)
}

/// Map the remote open/closed state onto the local vocabularies.
///
/// A unified state only moves along an edge the state engine allows; when
/// the remote asks for anything else the ticket is left untouched and a
/// validation error is returned.
pub fn apply_remote_state(ticket: &mut Ticket, remote: RemoteState, number: u64) -> Result<()> {
    let Some(current) = ticket.state else {
        match remote {
            RemoteState::Closed if ticket.status.category() == StatusCategory::Open => {
                ticket.status = Status::Completed;
            }
            RemoteState::Open if ticket.status.category() != StatusCategory::Open => {
                ticket.status = Status::Active;
            }
            _ => {}
        }
        return Ok(());
    };

    let target = match (remote, current.category()) {
        (RemoteState::Closed, StatusCategory::Open) => State::Done,
        (RemoteState::Open, StatusCategory::Closed | StatusCategory::Archived) => State::Active,
        _ => return Ok(()),
    };
    let validation = StateEngine::new().validate_transition(current, target, Some(Role::Automation));
    if !validation.valid {
        return Err(Error::Validation(format!(
            "remote issue #{number} is {remote}: {}",
            validation.errors.join("; ")
        )));
    }

    ticket.state = Some(target);
    ticket.status = target.legacy_status();
    ticket.state_metadata = Some(StateMetadata {
        transitioned_at: Utc::now(),
        transitioned_by: REMOTE_SYNC_SOURCE.to_string(),
        previous_state: Some(current),
        automation_eligible: validation.warnings.is_empty(),
        automation_source: Some(REMOTE_SYNC_SOURCE.to_string()),
        transition_reason: Some(format!("remote issue #{number} is {remote}")),
        reviewer: None,
    });
    Ok(())
}

/// Overwrite the shared fields of `ticket` with the remote issue, keeping the
/// local trailer and local-only metadata. Nothing changes on error.
pub fn apply_remote(ticket: &mut Ticket, remote: &RemoteIssue) -> Result<()> {
    apply_remote_state(ticket, remote.state, remote.number)?;
    let (_, trailer) = split_trailer(&ticket.content);
    let body = join_trailer(remote.body.trim(), trailer);
    ticket.content = format!("\n{body}\n");
    ticket.title = remote.title.clone();
    ticket.tags = remote.labels.clone();
    ticket.assignee = remote.assignee.clone();
    ticket.updated_date = remote.updated_at;
    Ok(())
}

fn link(ticket: &mut Ticket, issue: &RemoteIssue) {
    ticket.sync_status = SyncStatus::Synced;
    ticket.remote = Some(RemoteLink {
        number: issue.number,
        url: issue.url.clone(),
        synced_at: Some(Utc::now()),
    });
}

/// Bidirectional sync between a [`TicketStore`] and a [`RemoteTracker`]
pub struct SyncEngine<R: RemoteTracker> {
    store: TicketStore,
    remote: R,
    state: SyncState,
    delay: Duration,
    last_call: Option<Instant>,
}

impl<R: RemoteTracker> SyncEngine<R> {
    pub fn new(store: TicketStore, remote: R) -> Result<Self> {
        let state = SyncState::load(&store.sync_state_path())?;
        let delay = Duration::from_millis(store.config().sync.request_delay_ms);
        Ok(Self {
            store,
            remote,
            state,
            delay,
            last_call: None,
        })
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_sync_at
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn get_sync_status(&self) -> SyncStatusReport {
        let config = &self.store.config().sync;
        let remaining = self
            .remote
            .rate_limit()
            .map(|l| l.remaining)
            .or(self.state.rate_limit_remaining);
        let sync_health = if self.state.last_error.is_some() {
            SyncHealth::Failed
        } else if remaining.is_some_and(|r| r < config.rate_limit_threshold) {
            SyncHealth::Degraded
        } else {
            SyncHealth::Healthy
        };
        SyncStatusReport {
            enabled: config.enabled,
            repository: config.repository.clone(),
            last_sync_at: self.state.last_sync_at,
            rate_limit_remaining: remaining,
            sync_health,
        }
    }

    /// Verify credentials; returns the remote account name
    pub fn test_connection(&mut self) -> Result<String> {
        let result = self.call(|r| r.authenticate());
        self.persist_state()?;
        result
    }

    /// Push local changes only. The checkpoint is left alone so remote
    /// edits made meanwhile are still seen by the next pull.
    pub fn push_local_changes(&mut self) -> Result<SyncReport> {
        self.run(Direction::Push)
    }

    /// Pull remote changes only; the checkpoint is left alone
    pub fn pull_remote_changes(&mut self) -> Result<SyncReport> {
        self.run(Direction::Pull)
    }

    /// Full pass in both directions; advances the checkpoint on completion
    pub fn bidirectional_sync(&mut self) -> Result<SyncReport> {
        self.run(Direction::Both)
    }

    /// Settle a ticket held in `conflict` by keeping one side
    pub fn resolve_conflict(&mut self, id: &str, keep: Side) -> Result<Ticket> {
        let result = self.resolve(id, keep);
        self.persist_state()?;
        result
    }

    fn resolve(&mut self, id: &str, keep: Side) -> Result<Ticket> {
        let mut ticket = self.store.find(id)?;
        if ticket.sync_status != SyncStatus::Conflict {
            return Err(Error::Validation(format!("{id} has no sync conflict")));
        }
        let Some(number) = ticket.remote.as_ref().map(|l| l.number) else {
            return Err(Error::Validation(format!("{id} is not linked to a remote issue")));
        };

        let issue = match keep {
            Side::Local => {
                let draft = draft_for(&ticket);
                self.call(|r| r.update_issue(number, &draft))?
            }
            Side::Remote => {
                let issue = self
                    .fetch_remote()?
                    .remove(&number)
                    .ok_or_else(|| Error::NotFound(format!("remote issue #{number}")))?;
                apply_remote(&mut ticket, &issue)?;
                issue
            }
        };
        link(&mut ticket, &issue);
        let saved = self.store.save(&ticket)?;
        tracing::info!(%id, number, %keep, "sync conflict resolved");
        Ok(saved)
    }

    fn run(&mut self, direction: Direction) -> Result<SyncReport> {
        let outcome = self.pass(direction);
        if let Ok(report) = &outcome {
            if direction == Direction::Both {
                self.state.last_sync_at = Some(Utc::now());
            }
            tracing::info!(
                pushed = report.pushed,
                pulled = report.pulled,
                created_local = report.created_local,
                created_remote = report.created_remote,
                conflicts = report.conflicts.len(),
                failed = report.failed.len(),
                "sync pass complete"
            );
        }
        self.persist_state()?;
        outcome
    }

    fn persist_state(&mut self) -> Result<()> {
        if let Some(limit) = self.remote.rate_limit() {
            self.state.rate_limit_remaining = Some(limit.remaining);
        }
        self.state.save(&self.store.sync_state_path())
    }

    /// Run one remote call, spaced by the configured delay
    fn call<T>(&mut self, f: impl FnOnce(&mut R) -> Result<T>) -> Result<T> {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        let result = f(&mut self.remote);
        self.last_call = Some(Instant::now());
        self.state.last_error = result.as_ref().err().map(ToString::to_string);
        result
    }

    /// Per-item remote call: fatal errors propagate, the rest are recorded
    fn item_call<T>(
        &mut self,
        report: &mut SyncReport,
        item: &str,
        f: impl FnOnce(&mut R) -> Result<T>,
    ) -> Result<Option<T>> {
        match self.call(f) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_fatal_for_sync() => Err(err),
            Err(err) => {
                report.fail(item, &err);
                Ok(None)
            }
        }
    }

    fn fetch_remote(&mut self) -> Result<BTreeMap<u64, RemoteIssue>> {
        let per_page = self.store.config().sync.per_page.max(1);
        let mut issues = BTreeMap::new();
        let mut page = 1;
        loop {
            let batch = self.call(|r| r.list_issues(page, per_page))?;
            // A page may come back empty after pull requests are filtered out
            let done = !batch.has_next;
            issues.extend(batch.items.into_iter().map(|i| (i.number, i)));
            if done {
                break;
            }
            page += 1;
        }
        tracing::debug!(count = issues.len(), pages = page, "fetched remote issues");
        Ok(issues)
    }

    fn load_local(&self, report: &mut SyncReport) -> Result<Vec<Ticket>> {
        let kinds = &self.store.config().sync.kinds;
        let mut tickets = Vec::new();
        for path in self.store.document_paths()? {
            match self.store.load(&path) {
                Ok(ticket) if kinds.contains(&ticket.kind) => tickets.push(ticket),
                Ok(_) => {}
                Err(err) => report.fail(path.display().to_string(), &err),
            }
        }
        Ok(tickets)
    }

    fn pass(&mut self, direction: Direction) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let remote = self.fetch_remote()?;
        let locals = self.load_local(&mut report)?;
        let mut seen = HashSet::new();

        for ticket in locals {
            match ticket.remote.as_ref().map(|link| link.number) {
                Some(number) => {
                    seen.insert(number);
                    match remote.get(&number) {
                        Some(issue) => self.reconcile(&mut report, direction, ticket, issue)?,
                        None => report.fail(
                            ticket.id.clone(),
                            &Error::NotFound(format!("remote issue #{number}")),
                        ),
                    }
                }
                None if direction.pushes() => self.create_remote(&mut report, ticket)?,
                None => {}
            }
        }

        if direction.pulls() {
            let unseen: Vec<&RemoteIssue> =
                remote.values().filter(|i| !seen.contains(&i.number)).collect();
            if !unseen.is_empty() {
                let mut ids = self.store.allocator()?;
                for issue in unseen {
                    self.create_local(&mut report, &mut ids, issue);
                }
            }
        }

        Ok(report)
    }

    fn reconcile(
        &mut self,
        report: &mut SyncReport,
        direction: Direction,
        mut ticket: Ticket,
        issue: &RemoteIssue,
    ) -> Result<()> {
        if in_sync(&ticket, issue) {
            if ticket.sync_status == SyncStatus::Conflict {
                self.mark_synced(report, ticket, issue);
            }
            report.unchanged += 1;
            return Ok(());
        }

        // Held until resolved by hand, whatever the timestamps say
        if ticket.sync_status == SyncStatus::Conflict {
            report.conflicts.push(ConflictRecord {
                id: ticket.id.clone(),
                number: issue.number,
                local_updated: ticket.updated_date,
                remote_updated: issue.updated_at,
                winner: None,
            });
            return Ok(());
        }

        let last_sync = self.state.last_sync_at;
        let winner = if has_conflict(ticket.updated_date, issue.updated_at, last_sync) {
            let winner = match self.store.config().sync.conflict_resolution {
                ConflictStrategy::MostRecent => Some(most_recent(ticket.updated_date, issue.updated_at)),
                ConflictStrategy::LocalWins => Some(Side::Local),
                ConflictStrategy::RemoteWins => Some(Side::Remote),
                ConflictStrategy::Manual => None,
            };
            tracing::info!(id = %ticket.id, number = issue.number, ?winner, "sync conflict");
            report.conflicts.push(ConflictRecord {
                id: ticket.id.clone(),
                number: issue.number,
                local_updated: ticket.updated_date,
                remote_updated: issue.updated_at,
                winner,
            });
            winner
        } else {
            let local_changed = last_sync.is_none_or(|t| ticket.updated_date > t);
            let remote_changed = last_sync.is_none_or(|t| issue.updated_at > t);
            Some(match (local_changed, remote_changed) {
                (true, false) => Side::Local,
                (false, true) => Side::Remote,
                _ => most_recent(ticket.updated_date, issue.updated_at),
            })
        };

        match winner {
            None => {
                if ticket.sync_status != SyncStatus::Conflict {
                    ticket.sync_status = SyncStatus::Conflict;
                    if let Err(err) = self.store.save(&ticket) {
                        report.fail(ticket.id.clone(), &err);
                    }
                }
            }
            Some(Side::Local) if direction.pushes() => {
                let draft = draft_for(&ticket);
                let number = issue.number;
                if let Some(updated) =
                    self.item_call(report, &ticket.id, |r| r.update_issue(number, &draft))?
                {
                    self.mark_synced(report, ticket, &updated);
                    report.pushed += 1;
                }
            }
            Some(Side::Remote) if direction.pulls() => match apply_remote(&mut ticket, issue) {
                Ok(()) => {
                    self.mark_synced(report, ticket, issue);
                    report.pulled += 1;
                }
                Err(err) => report.fail(ticket.id.clone(), &err),
            },
            Some(_) => {}
        }
        Ok(())
    }

    fn mark_synced(&self, report: &mut SyncReport, mut ticket: Ticket, issue: &RemoteIssue) {
        link(&mut ticket, issue);
        if let Err(err) = self.store.save(&ticket) {
            report.fail(ticket.id.clone(), &err);
        }
    }

    fn create_remote(&mut self, report: &mut SyncReport, ticket: Ticket) -> Result<()> {
        let draft = draft_for(&ticket);
        let Some(mut created) = self.item_call(report, &ticket.id, |r| r.create_issue(&draft))? else {
            return Ok(());
        };
        tracing::debug!(id = %ticket.id, number = created.number, "created remote issue");

        // Trackers open new issues; closing is a separate, spaced call
        if created.state != draft.state {
            let number = created.number;
            if let Some(updated) =
                self.item_call(report, &ticket.id, |r| r.update_issue(number, &draft))?
            {
                created = updated;
            }
        }
        self.mark_synced(report, ticket, &created);
        report.created_remote += 1;
        Ok(())
    }

    fn create_local(&self, report: &mut SyncReport, ids: &mut IdAllocator, issue: &RemoteIssue) {
        let kinds = &self.store.config().sync.kinds;
        let kind = if kinds.contains(&TicketKind::Issue) || kinds.is_empty() {
            TicketKind::Issue
        } else {
            kinds[0]
        };
        let item = format!("#{}", issue.number);

        let mut draft = NewTicket::new(kind, issue.title.clone());
        draft.content = format!("\n{}\n", issue.body.trim());
        let created = match self.store.create(ids, draft) {
            Ok(ticket) => ticket,
            Err(err) => {
                report.fail(item, &err);
                return;
            }
        };

        let mut ticket = created;
        if let Err(err) = apply_remote(&mut ticket, issue) {
            report.fail(item, &err);
            return;
        }
        ticket.created_date = issue.created_at;
        link(&mut ticket, issue);
        match self.store.save(&ticket) {
            Ok(ticket) => {
                tracing::debug!(id = %ticket.id, number = issue.number, "created local ticket");
                report.created_local += 1;
            }
            Err(err) => report.fail(item, &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::MemoryTracker;
    use crate::Config;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn setup(strategy: ConflictStrategy) -> (TempDir, TicketStore) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.sync.enabled = true;
        config.sync.repository = Some("acme/app".into());
        config.sync.request_delay_ms = 0;
        config.sync.per_page = 2;
        config.sync.conflict_resolution = strategy;
        let store = TicketStore::init(dir.path(), Some(config)).unwrap();
        (dir, store)
    }

    fn set_last_sync(store: &TicketStore, last: DateTime<Utc>) {
        SyncState {
            last_sync_at: Some(last),
            ..Default::default()
        }
        .save(&store.sync_state_path())
        .unwrap();
    }

    /// A local issue linked to remote #1, edited locally at `local_at`
    fn linked(store: &TicketStore, title: &str, local_at: DateTime<Utc>) -> Ticket {
        let mut ids = store.allocator().unwrap();
        let mut ticket = store
            .create(&mut ids, NewTicket::new(TicketKind::Issue, title))
            .unwrap();
        ticket.remote = Some(RemoteLink {
            number: 1,
            url: None,
            synced_at: None,
        });
        ticket.sync_status = SyncStatus::Synced;
        ticket.updated_date = local_at;
        store.save(&ticket).unwrap()
    }

    #[test]
    fn test_has_conflict_truth_table() {
        let last = Some(at(10));
        assert!(has_conflict(at(11), at(12), last));
        assert!(!has_conflict(at(11), at(9), last));
        assert!(!has_conflict(at(9), at(11), last));
        assert!(!has_conflict(at(9), at(8), last));
        assert!(!has_conflict(at(10), at(11), last));
        assert!(!has_conflict(at(11), at(12), None));
    }

    #[test]
    fn test_both_sides_edited_remote_later_wins() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));
        let mut local = linked(&store, "Local title", at(11));
        local.content = "\nlocal body\n\n<!-- trackdown:local -->\nscratch notes\n".into();
        let local = store.save(&local).unwrap();

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Remote title", "remote body", RemoteState::Open, at(12));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, Some(Side::Remote));
        assert_eq!(report.pulled, 1);
        assert_eq!(report.pushed, 0);

        let after = store.find(&local.id).unwrap();
        assert_eq!(after.title, "Remote title");
        assert_eq!(after.updated_date, at(12));
        assert!(after.content.contains("remote body"));
        assert!(after.content.contains("scratch notes"));
        assert!(!after.content.contains("local body"));
        assert!(engine.last_sync_at().unwrap() > at(12));
    }

    #[test]
    fn test_both_sides_edited_local_later_wins() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));
        let mut local = linked(&store, "Local title", at(13));
        local.content = "\nlocal body\n\n<!-- trackdown:local -->\nscratch\n".into();
        store.save(&local).unwrap();

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Remote title", "remote body", RemoteState::Open, at(12));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, Some(Side::Local));
        assert_eq!(report.pushed, 1);

        let pushed = engine.remote().get(1).unwrap();
        assert_eq!(pushed.title, "Local title");
        assert_eq!(pushed.body, "local body");
    }

    #[test]
    fn test_manual_strategy_marks_conflict() {
        let (_dir, store) = setup(ConflictStrategy::Manual);
        set_last_sync(&store, at(10));
        let local = linked(&store, "Local title", at(11));

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Remote title", "remote body", RemoteState::Open, at(12));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, None);
        assert_eq!(report.pushed + report.pulled, 0);
        let after = store.find(&local.id).unwrap();
        assert_eq!(after.sync_status, SyncStatus::Conflict);
        assert_eq!(after.title, "Local title");
        assert_eq!(engine.remote().get(1).unwrap().title, "Remote title");
    }

    #[test]
    fn test_manual_conflict_is_held_on_later_passes() {
        let (_dir, store) = setup(ConflictStrategy::Manual);
        set_last_sync(&store, at(10));
        let local = linked(&store, "Local title", at(11));

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Remote title", "remote body", RemoteState::Open, at(12));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        assert_eq!(engine.bidirectional_sync().unwrap().conflicts.len(), 1);

        // The checkpoint has moved past both edits
        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, None);
        assert_eq!(report.pushed + report.pulled, 0);

        let after = store.find(&local.id).unwrap();
        assert_eq!(after.title, "Local title");
        assert_eq!(after.sync_status, SyncStatus::Conflict);
        assert_eq!(engine.remote().get(1).unwrap().title, "Remote title");
    }

    #[test]
    fn test_resolve_conflict_keeps_chosen_side() {
        let (_dir, store) = setup(ConflictStrategy::Manual);
        set_last_sync(&store, at(10));
        let local = linked(&store, "Local title", at(11));

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Remote title", "remote body", RemoteState::Open, at(12));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        engine.bidirectional_sync().unwrap();

        let resolved = engine.resolve_conflict(&local.id, Side::Remote).unwrap();
        assert_eq!(resolved.title, "Remote title");
        assert_eq!(resolved.sync_status, SyncStatus::Synced);
        assert!(matches!(
            engine.resolve_conflict(&local.id, Side::Local),
            Err(Error::Validation(_))
        ));

        let report = engine.bidirectional_sync().unwrap();
        assert!(report.conflicts.is_empty());
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn test_resolve_conflict_keeping_local_pushes() {
        let (_dir, store) = setup(ConflictStrategy::Manual);
        set_last_sync(&store, at(10));
        let local = linked(&store, "Local title", at(11));

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Remote title", "remote body", RemoteState::Open, at(12));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        engine.bidirectional_sync().unwrap();
        engine.resolve_conflict(&local.id, "local".parse().unwrap()).unwrap();

        assert_eq!(engine.remote().get(1).unwrap().title, "Local title");
        assert_eq!(store.find(&local.id).unwrap().sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_local_tag_change_is_pushed() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));
        let mut local = linked(&store, "Title", at(11));
        local.tags = vec!["urgent".into()];
        local.updated_date = at(11);
        store.save(&local).unwrap();

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Title", "# Title", RemoteState::Open, at(9));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.unchanged, 0);
        assert_eq!(engine.remote().get(1).unwrap().labels, vec!["urgent".to_string()]);
    }

    #[test]
    fn test_remote_label_and_assignee_change_is_pulled() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));
        let local = linked(&store, "Title", at(9));

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Title", "# Title", RemoteState::Open, at(11));
        remote.set_labels(1, &["backend"]);
        remote.set_assignee(1, "sam");

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.pulled, 1);

        let after = store.find(&local.id).unwrap();
        assert_eq!(after.tags, vec!["backend".to_string()]);
        assert_eq!(after.assignee.as_deref(), Some("sam"));
    }

    #[test]
    fn test_label_order_does_not_count_as_change() {
        let mut ticket = Ticket::new(TicketKind::Issue, "ISS-0001".into(), "Title".into());
        ticket.content = "\n# Title\n".into();
        ticket.tags = vec!["b".into(), "a".into()];

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Title", "# Title", RemoteState::Open, at(9));
        remote.set_labels(1, &["a", "b"]);
        assert!(in_sync(&ticket, remote.get(1).unwrap()));

        remote.set_assignee(1, "sam");
        assert!(!in_sync(&ticket, remote.get(1).unwrap()));
    }

    #[test]
    fn test_paging_continues_past_filtered_page() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        let mut remote = MemoryTracker::new();
        remote.insert_pull_request(1, at(9));
        remote.insert_pull_request(2, at(9));
        remote.insert(3, "Real issue", "", RemoteState::Open, at(9));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.pull_remote_changes().unwrap();
        assert_eq!(engine.remote().list_calls(), 2);
        assert_eq!(report.created_local, 1);
        assert_eq!(store.find("ISS-0001").unwrap().title, "Real issue");
    }

    #[test]
    fn test_closed_local_ticket_is_created_then_closed() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        let mut ids = store.allocator().unwrap();
        let mut ticket = store
            .create(&mut ids, NewTicket::new(TicketKind::Issue, "Already done"))
            .unwrap();
        ticket.status = Status::Completed;
        let ticket = store.save(&ticket).unwrap();

        let mut engine = SyncEngine::new(store.clone(), MemoryTracker::new()).unwrap();
        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.created_remote, 1);
        assert_eq!(engine.remote().update_calls(), 1);
        assert_eq!(engine.remote().get(1).unwrap().state, RemoteState::Closed);

        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(store.find(&ticket.id).unwrap().remote.unwrap().number, 1);
    }

    #[test]
    fn test_one_sided_change_propagates() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));
        let local = linked(&store, "Renamed", at(11));

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Original", "", RemoteState::Open, at(9));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();
        assert!(report.conflicts.is_empty());
        assert_eq!(report.pushed, 1);
        assert_eq!(engine.remote().get(1).unwrap().title, "Renamed");
        assert_eq!(store.find(&local.id).unwrap().sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_first_sync_creates_both_ways_across_pages() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        let mut ids = store.allocator().unwrap();
        let mut draft = NewTicket::new(TicketKind::Issue, "Local only");
        draft.content = "\nshared\n\n<!-- trackdown:local -->\nprivate\n".into();
        let local = store.create(&mut ids, draft).unwrap();
        store.create(&mut ids, NewTicket::new(TicketKind::Task, "Not synced")).unwrap();

        let mut remote = MemoryTracker::new();
        for n in 1..=5 {
            remote.insert(n, &format!("Remote {n}"), "from remote", RemoteState::Open, at(9));
        }
        remote.insert(6, "Shipped", "done", RemoteState::Closed, at(9));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();

        assert_eq!(report.created_local, 6);
        assert_eq!(report.created_remote, 1);
        assert!(report.failed.is_empty());
        assert_eq!(engine.remote().list_calls(), 3);

        let pushed = engine.remote().get(7).unwrap();
        assert_eq!(pushed.body, "shared");

        let linked = store.find(&local.id).unwrap();
        assert_eq!(linked.remote.as_ref().unwrap().number, 7);

        // ISS-0001 is the local one; remote #6 arrives last
        let shipped = store.find("ISS-0007").unwrap();
        assert_eq!(shipped.title, "Shipped");
        assert_eq!(shipped.status, Status::Completed);
        assert_eq!(shipped.created_date, at(9));

        // A second pass finds nothing to do
        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.created_local + report.created_remote, 0);
        assert_eq!(report.pushed + report.pulled, 0);
        assert_eq!(report.unchanged, 7);
    }

    #[test]
    fn test_remote_close_moves_unified_state() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));
        let mut local = linked(&store, "Title", at(9));
        local.state = Some(State::ReadyForDeployment);
        local.status = Status::Active;
        store.save(&local).unwrap();

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Title", "", RemoteState::Closed, at(11));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.pulled, 1);

        let after = store.find(&local.id).unwrap();
        assert_eq!(after.state, Some(State::Done));
        assert_eq!(after.status, Status::Completed);
        let meta = after.state_metadata.unwrap();
        assert_eq!(meta.automation_source.as_deref(), Some(REMOTE_SYNC_SOURCE));
        assert_eq!(meta.previous_state, Some(State::ReadyForDeployment));
        // ready_for_deployment -> done is a manual gate
        assert!(!meta.automation_eligible);
    }

    #[test]
    fn test_remote_state_change_off_the_table_is_an_item_failure() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));
        let mut local = linked(&store, "Title", at(9));
        local.state = Some(State::ReadyForQa);
        local.status = Status::Active;
        let local = store.save(&local).unwrap();

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Retitled", "", RemoteState::Closed, at(11));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();
        assert_eq!(report.pulled, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item, local.id);
        assert!(report.failed[0].error.contains("ready_for_qa"));

        let after = store.find(&local.id).unwrap();
        assert_eq!(after.state, Some(State::ReadyForQa));
        assert_eq!(after.title, "Title");
    }

    #[test]
    fn test_remote_reopen_respects_transition_table() {
        let mut ticket = Ticket::new(TicketKind::Issue, "ISS-0001".into(), "T".into());
        ticket.state = Some(State::WontDo);
        ticket.status = Status::Completed;
        assert!(matches!(
            apply_remote_state(&mut ticket, RemoteState::Open, 1),
            Err(Error::Validation(_))
        ));
        assert_eq!(ticket.state, Some(State::WontDo));
        assert_eq!(ticket.status, Status::Completed);
    }

    #[test]
    fn test_archived_stays_archived_when_remote_closed() {
        let mut ticket = Ticket::new(TicketKind::Issue, "ISS-0001".into(), "T".into());
        ticket.status = Status::Archived;
        apply_remote_state(&mut ticket, RemoteState::Closed, 1).unwrap();
        assert_eq!(ticket.status, Status::Archived);

        apply_remote_state(&mut ticket, RemoteState::Open, 1).unwrap();
        assert_eq!(ticket.status, Status::Active);

        ticket.status = Status::Planning;
        apply_remote_state(&mut ticket, RemoteState::Open, 1).unwrap();
        assert_eq!(ticket.status, Status::Planning);
    }

    #[test]
    fn test_rejected_item_does_not_stop_the_pass() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        let mut ids = store.allocator().unwrap();
        store.create(&mut ids, NewTicket::new(TicketKind::Issue, "Rejected")).unwrap();
        store.create(&mut ids, NewTicket::new(TicketKind::Issue, "Accepted")).unwrap();
        std::fs::write(store.kind_dir(TicketKind::Issue).join("ISS-0099-bad.md"), "no frontmatter").unwrap();

        let mut remote = MemoryTracker::new();
        remote.reject_title("Rejected");

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.bidirectional_sync().unwrap();

        assert_eq!(report.created_remote, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report.has_failures());
        assert!(engine.last_sync_at().is_some());
    }

    #[test]
    fn test_fatal_error_aborts_without_checkpoint() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        set_last_sync(&store, at(10));

        let mut remote = MemoryTracker::new();
        remote.go_offline();

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let err = engine.bidirectional_sync().unwrap_err();
        assert!(err.is_fatal_for_sync());
        assert_eq!(engine.last_sync_at(), Some(at(10)));

        let persisted = SyncState::load(&store.sync_state_path()).unwrap();
        assert_eq!(persisted.last_sync_at, Some(at(10)));
        assert!(persisted.last_error.is_some());
        assert_eq!(engine.get_sync_status().sync_health, SyncHealth::Failed);
    }

    #[test]
    fn test_health_degrades_under_rate_limit_threshold() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        let mut remote = MemoryTracker::new();
        remote.set_remaining(10);

        let mut engine = SyncEngine::new(store, remote).unwrap();
        assert_eq!(engine.test_connection().unwrap(), "tester");
        let status = engine.get_sync_status();
        assert_eq!(status.sync_health, SyncHealth::Degraded);
        assert_eq!(status.rate_limit_remaining, Some(10));
        assert_eq!(status.repository.as_deref(), Some("acme/app"));
    }

    #[test]
    fn test_push_only_keeps_checkpoint() {
        let (_dir, store) = setup(ConflictStrategy::MostRecent);
        let mut ids = store.allocator().unwrap();
        store.create(&mut ids, NewTicket::new(TicketKind::Issue, "New")).unwrap();

        let mut remote = MemoryTracker::new();
        remote.insert(1, "Remote only", "", RemoteState::Open, at(9));

        let mut engine = SyncEngine::new(store.clone(), remote).unwrap();
        let report = engine.push_local_changes().unwrap();
        assert_eq!(report.created_remote, 1);
        assert_eq!(report.created_local, 0);
        assert!(engine.last_sync_at().is_none());

        let report = engine.pull_remote_changes().unwrap();
        assert_eq!(report.created_local, 1);
        assert_eq!(report.created_remote, 0);
    }
}
