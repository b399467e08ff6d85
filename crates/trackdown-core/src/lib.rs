//! trackdown-core: Core library for the trackdown ticket tracker
//!
//! Provides the data model, document storage, relationship index, lifecycle
//! state engine and remote sync for a file-based ticket tracker. No daemon,
//! no database - just Markdown documents with YAML metadata.

pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod id;
pub mod index;
pub mod state;
pub mod store;
pub mod sync;
pub mod ticket;

pub use config::{Config, ConflictStrategy, SyncConfig};
pub use error::Error;
pub use graph::DependencyGraph;
pub use id::{CounterLock, FileLock, IdAllocator, NoLock, format_id, parse_id};
pub use index::{
    DanglingReference, EpicHierarchy, IndexStats, IssueHierarchy, ParseFailure, PrHierarchy,
    RelatedItems, RelationshipIndex, SearchFilters, TaskHierarchy,
};
pub use state::{
    MigrationOutcome, MigrationPreview, MigrationReport, Role, RollbackAction, RollbackReport,
    RollbackStep, StateEngine, TransitionOptions, TransitionResult, TransitionValidation,
};
pub use store::{NewTicket, TicketStore, walk_documents, write_atomic};
pub use sync::{
    GitHubTracker, RemoteIssue, RemoteTracker, SyncEngine, SyncHealth, SyncReport, SyncStatusReport,
};
pub use ticket::{
    Priority, RemoteLink, State, StateMetadata, Status, StatusCategory, SyncStatus, Ticket,
    TicketKind,
};

/// Result type for trackdown operations
pub type Result<T> = std::result::Result<T, Error>;
