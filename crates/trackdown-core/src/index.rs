//! Relationship index
//!
//! Scans every ticket document and derives the epic → issue → task/PR
//! hierarchy plus the dependency graph. The index is a snapshot: nothing
//! watches the filesystem, so callers `rebuild()` after any mutation.
//!
//! Documents that fail to read, parse or validate never abort a rebuild. They
//! are left out and recorded as [`ParseFailure`]s.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::graph::DependencyGraph;
use crate::{Error, Priority, Result, State, Status, Ticket, TicketKind, TicketStore};

/// A document excluded from the index
#[derive(Debug, Clone, Serialize)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpicHierarchy {
    pub epic: Ticket,
    pub issues: Vec<Ticket>,
    /// Tasks of every issue under the epic
    pub tasks: Vec<Ticket>,
    /// Pull requests of every issue under the epic
    pub prs: Vec<Ticket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueHierarchy {
    pub issue: Ticket,
    pub epic: Option<Ticket>,
    pub tasks: Vec<Ticket>,
    pub prs: Vec<Ticket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskHierarchy {
    pub task: Ticket,
    pub issue: Option<Ticket>,
    pub epic: Option<Ticket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrHierarchy {
    pub pr: Ticket,
    pub issue: Option<Ticket>,
    pub epic: Option<Ticket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedItems {
    pub dependencies: Vec<Ticket>,
    pub dependents: Vec<Ticket>,
    /// Ids referenced by the ticket's own lists that match no document
    pub missing: Vec<String>,
}

/// A parent reference that resolves to no document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub child: String,
    pub field: &'static str,
    pub target: String,
}

/// Search constraints; `None` / empty means "not applied"
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub kind: Option<TicketKind>,
    pub status: Option<Status>,
    /// Compared against the effective state
    pub state: Option<State>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    /// All listed tags must be present
    pub tags: Vec<String>,
    /// Case-insensitive match over title, description and body
    pub text: Option<String>,
}

impl SearchFilters {
    fn matches(&self, ticket: &Ticket) -> bool {
        if self.kind.is_some_and(|k| k != ticket.kind) {
            return false;
        }
        if self.status.is_some_and(|s| s != ticket.status) {
            return false;
        }
        if self.state.is_some_and(|s| s != ticket.effective_state()) {
            return false;
        }
        if self.priority.is_some_and(|p| p != ticket.priority) {
            return false;
        }
        if let Some(assignee) = &self.assignee
            && ticket.assignee.as_deref() != Some(assignee.as_str())
        {
            return false;
        }
        if !self.tags.iter().all(|tag| ticket.has_tag(tag)) {
            return false;
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let haystacks = [&ticket.title, &ticket.description, &ticket.content];
            if !haystacks.iter().any(|h| h.to_lowercase().contains(&needle)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub epics: usize,
    pub issues: usize,
    pub tasks: usize,
    pub prs: usize,
    pub projects: usize,
    pub parse_failures: usize,
}

/// In-memory hierarchy and lookup graph over the ticket documents
pub struct RelationshipIndex {
    store: TicketStore,
    tickets: HashMap<TicketKind, HashMap<String, Ticket>>,
    epic_issues: HashMap<String, Vec<String>>,
    issue_tasks: HashMap<String, Vec<String>>,
    issue_prs: HashMap<String, Vec<String>>,
    graph: DependencyGraph,
    failures: Vec<ParseFailure>,
    built_at: Option<DateTime<Utc>>,
}

impl RelationshipIndex {
    /// An empty index; call `rebuild()` to populate it
    pub fn new(store: TicketStore) -> Self {
        Self {
            store,
            tickets: HashMap::new(),
            epic_issues: HashMap::new(),
            issue_tasks: HashMap::new(),
            issue_prs: HashMap::new(),
            graph: DependencyGraph::from_tickets(std::iter::empty()),
            failures: Vec::new(),
            built_at: None,
        }
    }

    /// Build and populate in one step
    pub fn build(store: TicketStore) -> Result<Self> {
        let mut index = Self::new(store);
        index.rebuild()?;
        Ok(index)
    }

    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    /// Full rescan of the document tree.
    ///
    /// Only failing to list the ticket directories is an error; every
    /// per-document problem becomes a [`ParseFailure`].
    pub fn rebuild(&mut self) -> Result<()> {
        let mut tickets: HashMap<TicketKind, HashMap<String, Ticket>> = HashMap::new();
        let mut failures = Vec::new();

        for path in self.store.document_paths()? {
            let ticket = match self.store.load(&path) {
                Ok(ticket) => ticket,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping document");
                    failures.push(ParseFailure {
                        message: failure_message(err),
                        path,
                    });
                    continue;
                }
            };

            let by_id = tickets.entry(ticket.kind).or_default();
            if let Some(existing) = by_id.get(&ticket.id) {
                let message = format!(
                    "duplicate id {} (already indexed from {})",
                    ticket.id,
                    existing.file_path.display()
                );
                tracing::warn!(path = %path.display(), %message, "skipping document");
                failures.push(ParseFailure { path, message });
                continue;
            }
            by_id.insert(ticket.id.clone(), ticket);
        }

        let mut epic_issues: HashMap<String, Vec<String>> = HashMap::new();
        let mut issue_tasks: HashMap<String, Vec<String>> = HashMap::new();
        let mut issue_prs: HashMap<String, Vec<String>> = HashMap::new();

        for ticket in tickets.values().flat_map(|m| m.values()) {
            match ticket.kind {
                TicketKind::Issue => {
                    if let Some(epic) = &ticket.epic_id {
                        epic_issues.entry(epic.clone()).or_default().push(ticket.id.clone());
                    }
                }
                TicketKind::Task => {
                    if let Some(issue) = &ticket.issue_id {
                        issue_tasks.entry(issue.clone()).or_default().push(ticket.id.clone());
                    }
                }
                TicketKind::PullRequest => {
                    if let Some(issue) = &ticket.issue_id {
                        issue_prs.entry(issue.clone()).or_default().push(ticket.id.clone());
                    }
                }
                TicketKind::Epic | TicketKind::Project => {}
            }
        }

        for children in epic_issues
            .values_mut()
            .chain(issue_tasks.values_mut())
            .chain(issue_prs.values_mut())
        {
            children.sort();
        }

        self.graph = DependencyGraph::from_tickets(tickets.values().flat_map(|m| m.values()));
        self.tickets = tickets;
        self.epic_issues = epic_issues;
        self.issue_tasks = issue_tasks;
        self.issue_prs = issue_prs;
        self.failures = failures;
        self.built_at = Some(Utc::now());

        tracing::debug!(
            tickets = self.len(),
            failures = self.failures.len(),
            "relationship index rebuilt"
        );
        Ok(())
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn parse_failures(&self) -> &[ParseFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.tickets.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a ticket of a known kind
    pub fn get_kind(&self, kind: TicketKind, id: &str) -> Option<&Ticket> {
        self.tickets.get(&kind)?.get(id)
    }

    /// Look up a ticket by id, resolving its kind from the prefix
    pub fn get(&self, id: &str) -> Option<&Ticket> {
        let (prefix, _) = crate::id::parse_id(id)?;
        let kind = self.store.config().kind_for_prefix(prefix)?;
        self.get_kind(kind, id)
    }

    /// Like `get`, but a missing ticket is an error
    pub fn require(&self, id: &str) -> Result<&Ticket> {
        self.get(id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Every indexed ticket, sorted by kind then id
    pub fn all(&self) -> Vec<&Ticket> {
        let mut all: Vec<&Ticket> = self.tickets.values().flat_map(|m| m.values()).collect();
        all.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn of_kind(&self, kind: TicketKind) -> Vec<&Ticket> {
        let mut tickets: Vec<&Ticket> = self
            .tickets
            .get(&kind)
            .map(|m| m.values().collect())
            .unwrap_or_default();
        tickets.sort_by(|a, b| a.id.cmp(&b.id));
        tickets
    }

    fn resolve(&self, kind: TicketKind, ids: Option<&Vec<String>>) -> Vec<Ticket> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.get_kind(kind, id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    fn parent(&self, kind: TicketKind, id: Option<&String>) -> Option<Ticket> {
        id.and_then(|id| self.get_kind(kind, id).cloned())
    }

    pub fn get_epic_hierarchy(&self, id: &str) -> Option<EpicHierarchy> {
        let epic = self.get_kind(TicketKind::Epic, id)?.clone();
        let issues = self.resolve(TicketKind::Issue, self.epic_issues.get(id));

        let mut tasks = Vec::new();
        let mut prs = Vec::new();
        for issue in &issues {
            tasks.extend(self.resolve(TicketKind::Task, self.issue_tasks.get(&issue.id)));
            prs.extend(self.resolve(TicketKind::PullRequest, self.issue_prs.get(&issue.id)));
        }

        Some(EpicHierarchy {
            epic,
            issues,
            tasks,
            prs,
        })
    }

    pub fn get_issue_hierarchy(&self, id: &str) -> Option<IssueHierarchy> {
        let issue = self.get_kind(TicketKind::Issue, id)?.clone();
        Some(IssueHierarchy {
            epic: self.parent(TicketKind::Epic, issue.epic_id.as_ref()),
            tasks: self.resolve(TicketKind::Task, self.issue_tasks.get(id)),
            prs: self.resolve(TicketKind::PullRequest, self.issue_prs.get(id)),
            issue,
        })
    }

    /// A task's parents; the epic comes from the task itself or, failing that, its issue
    pub fn get_task_hierarchy(&self, id: &str) -> Option<TaskHierarchy> {
        let task = self.get_kind(TicketKind::Task, id)?.clone();
        let issue = self.parent(TicketKind::Issue, task.issue_id.as_ref());
        let epic_id = task
            .epic_id
            .as_ref()
            .or_else(|| issue.as_ref().and_then(|i| i.epic_id.as_ref()));
        Some(TaskHierarchy {
            epic: self.parent(TicketKind::Epic, epic_id),
            issue,
            task,
        })
    }

    pub fn get_pr_hierarchy(&self, id: &str) -> Option<PrHierarchy> {
        let pr = self.get_kind(TicketKind::PullRequest, id)?.clone();
        let issue = self.parent(TicketKind::Issue, pr.issue_id.as_ref());
        let epic_id = pr
            .epic_id
            .as_ref()
            .or_else(|| issue.as_ref().and_then(|i| i.epic_id.as_ref()));
        Some(PrHierarchy {
            epic: self.parent(TicketKind::Epic, epic_id),
            issue,
            pr,
        })
    }

    /// Tickets matching every specified filter, sorted by id
    pub fn search(&self, filters: &SearchFilters) -> Vec<&Ticket> {
        let mut found: Vec<&Ticket> = self
            .tickets
            .values()
            .flat_map(|m| m.values())
            .filter(|ticket| filters.matches(ticket))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn get_related_items(&self, id: &str) -> Result<RelatedItems> {
        self.require(id)?;
        let lookup = |ids: Vec<String>| -> Vec<Ticket> {
            ids.iter().filter_map(|id| self.get(id).cloned()).collect()
        };
        Ok(RelatedItems {
            dependencies: lookup(self.graph.dependencies_of(id)),
            dependents: lookup(self.graph.dependents_of(id)),
            missing: self.graph.missing_for(id),
        })
    }

    /// Groups of tickets whose dependencies form a cycle
    pub fn dependency_cycles(&self) -> Vec<Vec<String>> {
        self.graph.find_cycles()
    }

    /// Parent references pointing at no indexed ticket. Tolerated, only reported.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut dangling = Vec::new();
        for ticket in self.all() {
            if let Some(epic) = &ticket.epic_id
                && self.get_kind(TicketKind::Epic, epic).is_none()
            {
                dangling.push(DanglingReference {
                    child: ticket.id.clone(),
                    field: "epic_id",
                    target: epic.clone(),
                });
            }
            if let Some(issue) = &ticket.issue_id
                && self.get_kind(TicketKind::Issue, issue).is_none()
            {
                dangling.push(DanglingReference {
                    child: ticket.id.clone(),
                    field: "issue_id",
                    target: issue.clone(),
                });
            }
        }
        dangling
    }

    pub fn stats(&self) -> IndexStats {
        let count = |kind: TicketKind| self.tickets.get(&kind).map(HashMap::len).unwrap_or(0);
        IndexStats {
            epics: count(TicketKind::Epic),
            issues: count(TicketKind::Issue),
            tasks: count(TicketKind::Task),
            prs: count(TicketKind::PullRequest),
            projects: count(TicketKind::Project),
            parse_failures: self.failures.len(),
        }
    }

    /// Ticket count per effective state
    pub fn state_counts(&self) -> BTreeMap<State, usize> {
        let mut counts = BTreeMap::new();
        for ticket in self.all() {
            *counts.entry(ticket.effective_state()).or_insert(0) += 1;
        }
        counts
    }
}

fn failure_message(err: Error) -> String {
    match err {
        Error::Parse { message, .. } => message,
        other => other.to_string(),
    }
}
