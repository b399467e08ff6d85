//! Identifier allocation for trackdown tickets
//!
//! IDs are `<PREFIX>-<NNNN>`: a per-kind prefix and a zero-padded counter.
//! Counters live in `.trackdown/counters.json`, one integer per kind, holding
//! the next number to hand out.
//!
//! Without a lock two allocators on the same record can hand out the same id.
//! `FileLock` closes that gap when enabled in config.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{walk_documents, write_atomic};
use crate::{Config, Error, Result, TicketKind};

/// Minimum digits in the numeric part of an id
pub const ID_WIDTH: usize = 4;

/// Format an id from prefix and number
pub fn format_id(prefix: &str, number: u64) -> String {
    format!("{}-{:0width$}", prefix, number, width = ID_WIDTH)
}

/// Parse an id into prefix and number
pub fn parse_id(id: &str) -> Option<(&str, u64)> {
    let (prefix, digits) = id.rsplit_once('-')?;
    if prefix.is_empty()
        || digits.len() < ID_WIDTH
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some((prefix, digits.parse().ok()?))
}

/// Number embedded in a document file name (`<PREFIX>-<NNNN>[-slug].<ext>`)
fn number_from_file_name(name: &str, prefix: &str) -> Option<u64> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < ID_WIDTH {
        return None;
    }
    digits.parse().ok()
}

/// Persisted counter record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub epic: u64,
    pub issue: u64,
    pub task: u64,
    pub pr: u64,
    pub project: u64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            epic: 1,
            issue: 1,
            task: 1,
            pr: 1,
            project: 1,
        }
    }
}

impl Counters {
    pub fn get(&self, kind: TicketKind) -> u64 {
        match kind {
            TicketKind::Epic => self.epic,
            TicketKind::Issue => self.issue,
            TicketKind::Task => self.task,
            TicketKind::PullRequest => self.pr,
            TicketKind::Project => self.project,
        }
    }

    fn slot(&mut self, kind: TicketKind) -> &mut u64 {
        match kind {
            TicketKind::Epic => &mut self.epic,
            TicketKind::Issue => &mut self.issue,
            TicketKind::Task => &mut self.task,
            TicketKind::PullRequest => &mut self.pr,
            TicketKind::Project => &mut self.project,
        }
    }
}

/// Held for the duration of one counter update
pub struct CounterGuard {
    path: Option<PathBuf>,
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            std::fs::remove_file(path).ok();
        }
    }
}

/// Mutual exclusion around counter read-modify-write
pub trait CounterLock {
    fn acquire(&self) -> Result<CounterGuard>;

    /// Whether holding the guard excludes other processes
    fn is_exclusive(&self) -> bool;
}

/// No locking: last writer wins
pub struct NoLock;

impl CounterLock for NoLock {
    fn acquire(&self) -> Result<CounterGuard> {
        Ok(CounterGuard { path: None })
    }

    fn is_exclusive(&self) -> bool {
        false
    }
}

/// Lock file created with `create_new`, retried a bounded number of times
pub struct FileLock {
    path: PathBuf,
    attempts: u32,
    wait: Duration,
}

impl FileLock {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            attempts: 50,
            wait: Duration::from_millis(20),
        }
    }
}

impl CounterLock for FileLock {
    fn acquire(&self) -> Result<CounterGuard> {
        for _ in 0..self.attempts {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(_) => {
                    return Ok(CounterGuard {
                        path: Some(self.path.clone()),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(self.wait);
                }
                Err(e) => return Err(Error::persistence(&self.path, e)),
            }
        }
        Err(Error::Conflict(format!(
            "counter lock {} is held by another process; remove it if no trackdown process is running",
            self.path.display()
        )))
    }

    fn is_exclusive(&self) -> bool {
        true
    }
}

/// Hands out ticket ids from the persisted counter record
pub struct IdAllocator {
    path: PathBuf,
    config: Config,
    counters: Counters,
    lock: Box<dyn CounterLock>,
}

impl IdAllocator {
    /// Load the counter record at `path`, choosing the lock from config
    pub fn open(path: PathBuf, config: Config) -> Result<Self> {
        let lock: Box<dyn CounterLock> = if config.counters.lock {
            Box::new(FileLock::new(path.with_extension("lock")))
        } else {
            Box::new(NoLock)
        };
        Self::with_lock(path, config, lock)
    }

    pub fn with_lock(path: PathBuf, config: Config, lock: Box<dyn CounterLock>) -> Result<Self> {
        let counters = load_counters(&path)?;
        Ok(Self {
            path,
            config,
            counters,
            lock,
        })
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Allocate the next id for `kind` and persist the incremented counter
    pub fn generate_id(&mut self, kind: TicketKind) -> Result<String> {
        let _guard = self.lock.acquire()?;
        if self.lock.is_exclusive() {
            let on_disk = load_counters(&self.path)?;
            let slot = self.counters.slot(kind);
            *slot = (*slot).max(on_disk.get(kind));
        }

        let number = self.counters.get(kind);
        *self.counters.slot(kind) = number + 1;
        self.persist()?;

        let id = format_id(self.config.prefix(kind), number);
        tracing::debug!(%id, "allocated id");
        Ok(id)
    }

    /// The id `generate_id` would return next, without allocating it
    pub fn peek_next_id(&self, kind: TicketKind) -> String {
        format_id(self.config.prefix(kind), self.counters.get(kind))
    }

    pub fn set_counter(&mut self, kind: TicketKind, next: u64) -> Result<()> {
        if next == 0 {
            return Err(Error::Validation("counters start at 1".into()));
        }
        let _guard = self.lock.acquire()?;
        *self.counters.slot(kind) = next;
        self.persist()
    }

    /// Set every counter to one past the highest number found in existing file names
    pub fn auto_detect_counters(&mut self, tickets_root: &Path) -> Result<BTreeMap<TicketKind, u64>> {
        let _guard = self.lock.acquire()?;
        let mut detected = BTreeMap::new();

        for kind in TicketKind::ALL {
            let prefix = self.config.prefix(kind).to_string();
            let dir = tickets_root.join(self.config.kind_dir(kind));
            let max = walk_documents(&dir, &self.config.naming.file_extension)?
                .iter()
                .filter_map(|path| path.file_name()?.to_str())
                .filter_map(|name| number_from_file_name(name, &prefix))
                .max()
                .unwrap_or(0);

            *self.counters.slot(kind) = max + 1;
            detected.insert(kind, max + 1);
        }

        self.persist()?;
        Ok(detected)
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.counters)?;
        write_atomic(&self.path, json.as_bytes())
    }
}

fn load_counters(path: &Path) -> Result<Counters> {
    if !path.exists() {
        return Ok(Counters::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
