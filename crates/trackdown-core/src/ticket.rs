//! Ticket data model for trackdown
//!
//! One ticket per Markdown document. The metadata block carries an explicit
//! `kind` discriminant; the body is kept in `content`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ticket kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Epic,
    Issue,
    Task,
    #[serde(rename = "pr")]
    PullRequest,
    Project,
}

impl TicketKind {
    pub const ALL: [TicketKind; 5] = [
        TicketKind::Epic,
        TicketKind::Issue,
        TicketKind::Task,
        TicketKind::PullRequest,
        TicketKind::Project,
    ];

    /// Key used for counters and config tables
    pub fn key(&self) -> &'static str {
        match self {
            TicketKind::Epic => "epic",
            TicketKind::Issue => "issue",
            TicketKind::Task => "task",
            TicketKind::PullRequest => "pr",
            TicketKind::Project => "project",
        }
    }
}

impl std::str::FromStr for TicketKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "epic" => Ok(TicketKind::Epic),
            "issue" => Ok(TicketKind::Issue),
            "task" => Ok(TicketKind::Task),
            "pr" | "pull_request" | "pull-request" | "pullrequest" => Ok(TicketKind::PullRequest),
            "project" => Ok(TicketKind::Project),
            _ => Err(crate::Error::InvalidKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Legacy four-value status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Planning,
    Active,
    Completed,
    Archived,
}

impl Status {
    /// Fixed legacy-to-unified mapping used for workflow comparisons
    pub fn to_state(self) -> State {
        match self {
            Status::Planning => State::Planning,
            Status::Active => State::Active,
            Status::Completed => State::Done,
            Status::Archived => State::Archived,
        }
    }

    pub fn category(self) -> StatusCategory {
        self.to_state().category()
    }
}

impl std::str::FromStr for Status {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planning" => Ok(Status::Planning),
            "active" => Ok(Status::Active),
            "completed" => Ok(Status::Completed),
            "archived" => Ok(Status::Archived),
            _ => Err(crate::Error::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Planning => write!(f, "planning"),
            Status::Active => write!(f, "active"),
            Status::Completed => write!(f, "completed"),
            Status::Archived => write!(f, "archived"),
        }
    }
}

/// Unified resolution state (legacy values plus the workflow extensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Planning,
    Active,
    Completed,
    Archived,
    ReadyForEngineering,
    ReadyForQa,
    ReadyForDeployment,
    #[serde(rename = "won_t_do")]
    WontDo,
    Done,
}

impl State {
    pub const ALL: [State; 9] = [
        State::Planning,
        State::Active,
        State::Completed,
        State::Archived,
        State::ReadyForEngineering,
        State::ReadyForQa,
        State::ReadyForDeployment,
        State::WontDo,
        State::Done,
    ];

    /// Projection onto the legacy vocabulary, written alongside `state`
    pub fn legacy_status(self) -> Status {
        match self {
            State::Planning => Status::Planning,
            State::Active
            | State::ReadyForEngineering
            | State::ReadyForQa
            | State::ReadyForDeployment => Status::Active,
            State::Completed | State::Done | State::WontDo => Status::Completed,
            State::Archived => Status::Archived,
        }
    }

    pub fn category(self) -> StatusCategory {
        match self {
            State::Planning
            | State::Active
            | State::ReadyForEngineering
            | State::ReadyForQa
            | State::ReadyForDeployment => StatusCategory::Open,
            State::Completed | State::Done | State::WontDo => StatusCategory::Closed,
            State::Archived => StatusCategory::Archived,
        }
    }
}

impl std::str::FromStr for State {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "planning" => Ok(State::Planning),
            "active" => Ok(State::Active),
            "completed" => Ok(State::Completed),
            "archived" => Ok(State::Archived),
            "ready_for_engineering" => Ok(State::ReadyForEngineering),
            "ready_for_qa" => Ok(State::ReadyForQa),
            "ready_for_deployment" => Ok(State::ReadyForDeployment),
            "won_t_do" | "wont_do" => Ok(State::WontDo),
            "done" => Ok(State::Done),
            _ => Err(crate::Error::InvalidState(s.to_string())),
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Planning => "planning",
            State::Active => "active",
            State::Completed => "completed",
            State::Archived => "archived",
            State::ReadyForEngineering => "ready_for_engineering",
            State::ReadyForQa => "ready_for_qa",
            State::ReadyForDeployment => "ready_for_deployment",
            State::WontDo => "won_t_do",
            State::Done => "done",
        };
        f.write_str(s)
    }
}

/// Grouping of states used for file placement and remote open/closed mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Open,
    Closed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(crate::Error::Validation(format!("invalid priority: {s}"))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Local,
    Synced,
    Conflict,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Local => write!(f, "local"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Conflict => write!(f, "conflict"),
        }
    }
}

/// Provenance of the last state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub transitioned_at: DateTime<Utc>,
    pub transitioned_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<State>,
    #[serde(default)]
    pub automation_eligible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
}

/// Link between a local ticket and its remote counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteLink {
    pub number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

/// A trackable unit: epic, issue, task, pull request or project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub kind: TicketKind,

    /// `<PREFIX>-<NNNN>`
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Legacy status, kept in step with `state` when that is set
    #[serde(default)]
    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_metadata: Option<StateMetadata>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    pub created_date: DateTime<Utc>,

    pub updated_date: DateTime<Utc>,

    #[serde(default)]
    pub estimated_tokens: u64,

    #[serde(default)]
    pub actual_tokens: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,

    /// Parent epic (issues, tasks, pull requests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,

    /// Parent issue (tasks, pull requests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,

    /// Source branch (pull requests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default)]
    pub sync_status: SyncStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteLink>,

    /// Document body
    #[serde(skip)]
    pub content: String,

    /// Where the document was read from (empty for unsaved tickets)
    #[serde(skip)]
    pub file_path: PathBuf,

    /// SHA-256 of the bytes read from disk
    #[serde(skip)]
    pub revision: Option<String>,
}

impl Ticket {
    /// Create a new ticket with minimal required fields
    pub fn new(kind: TicketKind, id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            kind,
            id,
            title,
            description: String::new(),
            status: Status::Planning,
            state: None,
            state_metadata: None,
            priority: Priority::Medium,
            assignee: None,
            created_date: now,
            updated_date: now,
            estimated_tokens: 0,
            actual_tokens: 0,
            tags: Vec::new(),
            dependencies: Vec::new(),
            blocked_by: Vec::new(),
            blocks: Vec::new(),
            epic_id: None,
            issue_id: None,
            branch: None,
            sync_status: SyncStatus::Local,
            remote: None,
            content: String::new(),
            file_path: PathBuf::new(),
            revision: None,
        }
    }

    /// State used for workflow decisions: `state` if set, else mapped `status`
    pub fn effective_state(&self) -> State {
        self.state.unwrap_or_else(|| self.status.to_state())
    }

    pub fn category(&self) -> StatusCategory {
        self.effective_state().category()
    }

    /// Check the invariants a document must satisfy to be indexed
    pub fn validate(&self, prefix: &str) -> crate::Result<()> {
        crate::id::parse_id(&self.id)
            .filter(|(p, _)| *p == prefix)
            .ok_or_else(|| {
                crate::Error::InvalidId(format!(
                    "{} (expected {}-NNNN for kind {})",
                    self.id, prefix, self.kind
                ))
            })?;

        if self.state_metadata.is_some() && self.state.is_none() {
            return Err(crate::Error::Validation(format!(
                "{}: state_metadata present without state",
                self.id
            )));
        }

        match self.kind {
            TicketKind::Epic | TicketKind::Project => {
                if self.epic_id.is_some() || self.issue_id.is_some() {
                    return Err(crate::Error::Validation(format!(
                        "{}: {} cannot have a parent",
                        self.id, self.kind
                    )));
                }
            }
            TicketKind::Issue => {
                if self.issue_id.is_some() {
                    return Err(crate::Error::Validation(format!(
                        "{}: issues cannot have an issue_id",
                        self.id
                    )));
                }
            }
            TicketKind::Task | TicketKind::PullRequest => {}
        }

        Ok(())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Mark as modified now
    pub fn touch(&mut self) {
        self.updated_date = Utc::now();
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] [{}] {} - {}",
            self.id,
            self.kind,
            self.priority,
            self.effective_state(),
            self.title
        )
    }
}
