//! Configuration for trackdown
//!
//! Stored in .trackdown/config.toml

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::TicketKind;

/// trackdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory (relative to the project root) holding all ticket documents
    pub tickets_dir: String,

    /// Directory per ticket kind, inside `tickets_dir`
    pub structure: StructureConfig,

    /// ID prefixes and file naming
    pub naming: NamingConfig,

    /// Identifier counter settings
    pub counters: CounterConfig,

    /// Remote tracker synchronization
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tickets_dir: "tickets".to_string(),
            structure: StructureConfig::default(),
            naming: NamingConfig::default(),
            counters: CounterConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    pub epics: String,
    pub issues: String,
    pub tasks: String,
    pub prs: String,
    pub projects: String,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            epics: "epics".to_string(),
            issues: "issues".to_string(),
            tasks: "tasks".to_string(),
            prs: "prs".to_string(),
            projects: "projects".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub epic_prefix: String,
    pub issue_prefix: String,
    pub task_prefix: String,
    pub pr_prefix: String,
    pub project_prefix: String,

    /// Document extension, including the dot
    pub file_extension: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            epic_prefix: "EP".to_string(),
            issue_prefix: "ISS".to_string(),
            task_prefix: "TSK".to_string(),
            pr_prefix: "PR".to_string(),
            project_prefix: "PROJ".to_string(),
            file_extension: ".md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CounterConfig {
    /// Take a lock file around counter increments (off: concurrent processes may race)
    pub lock: bool,
}

/// How a conflicting local/remote pair is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Later timestamp wins; ties go to the local side
    #[default]
    MostRecent,
    LocalWins,
    RemoteWins,
    /// Record the conflict and leave both sides untouched
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,

    /// `owner/name`
    pub repository: Option<String>,

    pub api_url: String,

    /// Environment variable holding the API token
    pub token_env: String,

    pub conflict_resolution: ConflictStrategy,

    /// Delay between consecutive remote calls
    pub request_delay_ms: u64,

    /// Page size for remote listings
    pub per_page: u32,

    /// Remaining rate-limit budget below which health is reported as degraded
    pub rate_limit_threshold: u32,

    /// Ticket kinds mirrored to the remote tracker
    pub kinds: Vec<TicketKind>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repository: None,
            api_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            conflict_resolution: ConflictStrategy::MostRecent,
            request_delay_ms: 1000,
            per_page: 100,
            rate_limit_threshold: 100,
            kinds: vec![TicketKind::Issue],
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Other(format!("Invalid config: {}", e)))?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Other(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| crate::Error::persistence(path, e))?;
        Ok(())
    }

    pub fn prefix(&self, kind: TicketKind) -> &str {
        match kind {
            TicketKind::Epic => &self.naming.epic_prefix,
            TicketKind::Issue => &self.naming.issue_prefix,
            TicketKind::Task => &self.naming.task_prefix,
            TicketKind::PullRequest => &self.naming.pr_prefix,
            TicketKind::Project => &self.naming.project_prefix,
        }
    }

    pub fn kind_dir(&self, kind: TicketKind) -> &str {
        match kind {
            TicketKind::Epic => &self.structure.epics,
            TicketKind::Issue => &self.structure.issues,
            TicketKind::Task => &self.structure.tasks,
            TicketKind::PullRequest => &self.structure.prs,
            TicketKind::Project => &self.structure.projects,
        }
    }

    /// Kind owning an id prefix, if any
    pub fn kind_for_prefix(&self, prefix: &str) -> Option<TicketKind> {
        TicketKind::ALL
            .into_iter()
            .find(|kind| self.prefix(*kind) == prefix)
    }

    /// Generate a default config file with comments
    pub fn default_with_comments() -> String {
        r#"# trackdown configuration

# Directory holding all ticket documents, relative to the project root
tickets_dir = "tickets"

[structure]
epics = "epics"
issues = "issues"
tasks = "tasks"
prs = "prs"
projects = "projects"

[naming]
epic_prefix = "EP"
issue_prefix = "ISS"
task_prefix = "TSK"
pr_prefix = "PR"
project_prefix = "PROJ"
file_extension = ".md"

[counters]
# Serialize id allocation across processes with a lock file
lock = false

[sync]
enabled = false
# repository = "owner/name"
api_url = "https://api.github.com"
# Environment variable holding the API token
token_env = "GITHUB_TOKEN"
# most_recent, local_wins, remote_wins or manual
conflict_resolution = "most_recent"
# Delay between remote calls (milliseconds)
request_delay_ms = 1000
per_page = 100
# Report degraded health below this many remaining requests
rate_limit_threshold = 100
kinds = ["issue"]
"#
        .to_string()
    }
}
