//! Markdown document store for trackdown tickets
//!
//! No database, no daemon - one document per ticket under `tickets/`.
//! Writes are guarded by the revision read alongside the ticket: if the file
//! changed on disk in between, the write is refused with `Error::Conflict`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::document;
use crate::{Config, Error, IdAllocator, Priority, Result, StatusCategory, Ticket, TicketKind};

pub const TRACKDOWN_DIR: &str = ".trackdown";
const CONFIG_FILE: &str = "config.toml";
const COUNTERS_FILE: &str = "counters.json";
const SYNC_STATE_FILE: &str = "sync-state.json";
const ROLLBACK_PLAN_FILE: &str = "migration-rollback.json";
const ARCHIVE_DIR: &str = "archive";

/// Fields supplied when creating a ticket
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub kind: TicketKind,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub epic_id: Option<String>,
    pub issue_id: Option<String>,
    pub branch: Option<String>,
    pub estimated_tokens: u64,
    /// Body; a heading built from the title when empty
    pub content: String,
}

impl NewTicket {
    pub fn new(kind: TicketKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            priority: Priority::Medium,
            assignee: None,
            tags: Vec::new(),
            epic_id: None,
            issue_id: None,
            branch: None,
            estimated_tokens: 0,
            content: String::new(),
        }
    }
}

/// Document-per-ticket store rooted at a project directory
#[derive(Debug, Clone)]
pub struct TicketStore {
    root: PathBuf,
    config: Config,
}

impl TicketStore {
    /// Find and open the store for the current directory
    pub fn open() -> Result<Self> {
        let root = Self::find_root(&std::env::current_dir()?)?;
        Self::open_at(root)
    }

    /// Open the store rooted at `root` (the directory containing .trackdown)
    pub fn open_at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let dir = root.join(TRACKDOWN_DIR);
        if !dir.is_dir() {
            return Err(Error::NotInitialized);
        }
        let config = Config::load(&dir.join(CONFIG_FILE))?;
        Ok(Self { root, config })
    }

    /// Initialize a new store in `root`
    pub fn init(root: impl Into<PathBuf>, config: Option<Config>) -> Result<Self> {
        let root = root.into();
        let dir = root.join(TRACKDOWN_DIR);
        if dir.exists() {
            return Err(Error::AlreadyInitialized(dir.display().to_string()));
        }
        fs::create_dir_all(&dir).map_err(|e| Error::persistence(&dir, e))?;

        let config_path = dir.join(CONFIG_FILE);
        let config = match config {
            Some(config) => {
                config.save(&config_path)?;
                config
            }
            None => {
                write_atomic(&config_path, Config::default_with_comments().as_bytes())?;
                Config::default()
            }
        };

        let store = Self { root, config };
        for kind in TicketKind::ALL {
            let kind_dir = store.kind_dir(kind);
            fs::create_dir_all(&kind_dir).map_err(|e| Error::persistence(&kind_dir, e))?;
        }
        Ok(store)
    }

    /// Find the project root (directory containing .trackdown)
    pub fn find_root(start: &Path) -> Result<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(TRACKDOWN_DIR).is_dir() {
                return Ok(current);
            }
            if !current.pop() {
                return Err(Error::NotInitialized);
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn trackdown_dir(&self) -> PathBuf {
        self.root.join(TRACKDOWN_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.trackdown_dir().join(CONFIG_FILE)
    }

    pub fn counters_path(&self) -> PathBuf {
        self.trackdown_dir().join(COUNTERS_FILE)
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.trackdown_dir().join(SYNC_STATE_FILE)
    }

    /// Rollback plan written by the last migration
    pub fn rollback_plan_path(&self) -> PathBuf {
        self.trackdown_dir().join(ROLLBACK_PLAN_FILE)
    }

    pub fn tickets_root(&self) -> PathBuf {
        self.root.join(&self.config.tickets_dir)
    }

    pub fn kind_dir(&self, kind: TicketKind) -> PathBuf {
        self.tickets_root().join(self.config.kind_dir(kind))
    }

    /// Open an allocator over this store's counter record
    pub fn allocator(&self) -> Result<IdAllocator> {
        IdAllocator::open(self.counters_path(), self.config.clone())
    }

    /// Where a ticket belongs given its kind, title and status category
    pub fn path_for(&self, ticket: &Ticket) -> PathBuf {
        let mut dir = self.kind_dir(ticket.kind);
        if ticket.category() == StatusCategory::Archived {
            dir.push(ARCHIVE_DIR);
        }
        dir.join(document::file_name(
            &ticket.id,
            &ticket.title,
            &self.config.naming.file_extension,
        ))
    }

    /// Every document path under the kind directories
    pub fn document_paths(&self) -> Result<Vec<PathBuf>> {
        let mut dirs: Vec<PathBuf> = TicketKind::ALL.iter().map(|k| self.kind_dir(*k)).collect();
        dirs.sort();
        dirs.dedup();

        let mut paths = Vec::new();
        for dir in dirs {
            paths.extend(walk_documents(&dir, &self.config.naming.file_extension)?);
        }
        Ok(paths)
    }

    /// Read, parse and validate one document
    pub fn load(&self, path: &Path) -> Result<Ticket> {
        let bytes = fs::read(path).map_err(|e| Error::parse(path, e.to_string()))?;
        let text = std::str::from_utf8(&bytes).map_err(|e| Error::parse(path, e.to_string()))?;

        let (mut ticket, body): (Ticket, String) =
            document::parse(text).map_err(|e| Error::parse(path, e.to_string()))?;
        ticket
            .validate(self.config.prefix(ticket.kind))
            .map_err(|e| Error::parse(path, e.to_string()))?;

        ticket.content = body;
        ticket.file_path = path.to_path_buf();
        ticket.revision = Some(document::revision(&bytes));
        Ok(ticket)
    }

    /// Locate and load a ticket by id
    pub fn find(&self, id: &str) -> Result<Ticket> {
        let ext = &self.config.naming.file_extension;
        let exact = format!("{id}{ext}");
        let prefixed = format!("{id}-");

        let candidates = match crate::id::parse_id(id).and_then(|(p, _)| self.config.kind_for_prefix(p)) {
            Some(kind) => walk_documents(&self.kind_dir(kind), ext)?,
            None => return Err(Error::InvalidId(id.to_string())),
        };

        let mut unreadable = None;
        for path in candidates {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == exact || name.starts_with(&prefixed) {
                match self.load(&path) {
                    Ok(ticket) if ticket.id == id => return Ok(ticket),
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "skipping unreadable candidate");
                        unreadable.get_or_insert(err);
                    }
                }
            }
        }
        // Only surface a parse error when no readable document carries the id
        Err(unreadable.unwrap_or_else(|| Error::NotFound(id.to_string())))
    }

    /// Allocate an id and write a new ticket document
    pub fn create(&self, ids: &mut IdAllocator, draft: NewTicket) -> Result<Ticket> {
        if draft.title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty".into()));
        }
        let parent_allowed = match draft.kind {
            TicketKind::Epic | TicketKind::Project => {
                draft.epic_id.is_none() && draft.issue_id.is_none()
            }
            TicketKind::Issue => draft.issue_id.is_none(),
            TicketKind::Task | TicketKind::PullRequest => true,
        };
        if !parent_allowed {
            return Err(Error::Validation(format!(
                "a {} cannot have the requested parent",
                draft.kind
            )));
        }

        let id = ids.generate_id(draft.kind)?;
        let mut ticket = Ticket::new(draft.kind, id, draft.title);
        ticket.description = draft.description;
        ticket.priority = draft.priority;
        ticket.assignee = draft.assignee;
        ticket.tags = draft.tags;
        ticket.epic_id = draft.epic_id;
        ticket.issue_id = draft.issue_id;
        ticket.branch = draft.branch;
        ticket.estimated_tokens = draft.estimated_tokens;
        ticket.content = if draft.content.is_empty() {
            default_body(&ticket)
        } else {
            draft.content
        };

        self.save(&ticket)
    }

    /// Write a ticket, relocating its file if its name or status category changed.
    ///
    /// Returns the ticket as written, carrying its new path and revision.
    pub fn save(&self, ticket: &Ticket) -> Result<Ticket> {
        ticket.validate(self.config.prefix(ticket.kind))?;
        let target = self.path_for(ticket);

        match &ticket.revision {
            Some(expected) => {
                let on_disk = fs::read(&ticket.file_path).map_err(|_| {
                    Error::Conflict(format!("{} was removed after it was read", ticket.id))
                })?;
                if &document::revision(&on_disk) != expected {
                    return Err(Error::Conflict(format!(
                        "{} changed on disk after it was read",
                        ticket.id
                    )));
                }
            }
            None => {
                if target.exists() {
                    return Err(Error::AlreadyExists(ticket.id.clone()));
                }
            }
        }

        let text = document::stringify(ticket, &ticket.content)?;
        write_atomic(&target, text.as_bytes())?;

        let old = &ticket.file_path;
        if !old.as_os_str().is_empty() && *old != target && old.exists() {
            fs::remove_file(old).map_err(|e| Error::persistence(old, e))?;
            tracing::debug!(id = %ticket.id, from = %old.display(), to = %target.display(), "relocated ticket");
        }

        let mut written = ticket.clone();
        written.file_path = target;
        written.revision = Some(document::revision(text.as_bytes()));
        Ok(written)
    }

    /// Apply an edit to a ticket loaded from disk and write it back
    pub fn update<F>(&self, id: &str, edit: F) -> Result<Ticket>
    where
        F: FnOnce(&mut Ticket),
    {
        let mut ticket = self.find(id)?;
        edit(&mut ticket);
        ticket.touch();
        self.save(&ticket)
    }
}

fn default_body(ticket: &Ticket) -> String {
    if ticket.description.is_empty() {
        format!("\n# {}\n", ticket.title)
    } else {
        format!("\n# {}\n\n{}\n", ticket.title, ticket.description)
    }
}

/// Recursively collect files ending in `extension` under `dir`, sorted.
///
/// A missing directory yields nothing; hidden entries are skipped.
pub fn walk_documents(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if name.ends_with(extension) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Write through a temporary sibling file and rename over the target
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|e| Error::persistence(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::persistence(path, e))?;
    Ok(())
}
