//! Remote issue tracker synchronization

mod engine;
mod github;
mod remote;
#[cfg(test)]
pub mod testing;

pub use engine::{
    ConflictRecord, ItemFailure, Side, SyncEngine, SyncHealth, SyncReport, SyncState,
    SyncStatusReport, apply_remote, apply_remote_state, draft_for, has_conflict,
};
pub use github::GitHubTracker;
pub use remote::{Page, RateLimit, RemoteIssue, RemoteIssueDraft, RemoteState, RemoteTracker};
