//! Lifecycle state engine
//!
//! Two vocabularies coexist on a ticket: the legacy four-value `status` and
//! the unified nine-value `state`. Workflow decisions always use the
//! effective state (`state` if set, else the mapped `status`).
//!
//! Validation never throws: it returns a [`TransitionValidation`] so batch
//! callers can keep going and report per item.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::store::write_atomic;
use crate::{Error, Result, State, StateMetadata, Status, Ticket, TicketStore};

const MIGRATION_REASON: &str = "Legacy status migration";

/// Who is asking for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Developer,
    Qa,
    Devops,
    Manager,
    /// Unattended tooling; held to manual-only edges
    Automation,
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "developer" | "dev" => Ok(Role::Developer),
            "qa" => Ok(Role::Qa),
            "devops" | "ops" => Ok(Role::Devops),
            "manager" | "pm" => Ok(Role::Manager),
            "automation" | "bot" => Ok(Role::Automation),
            _ => Err(Error::Validation(format!("unknown role: {s}"))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Developer => "developer",
            Role::Qa => "qa",
            Role::Devops => "devops",
            Role::Manager => "manager",
            Role::Automation => "automation",
        };
        f.write_str(s)
    }
}

/// Legal targets from `from`, excluding the universal `won_t_do` escape
pub fn allowed_targets(from: State) -> &'static [State] {
    use State::*;
    match from {
        Planning => &[ReadyForEngineering],
        Active => &[ReadyForEngineering],
        ReadyForEngineering => &[Active, ReadyForQa],
        ReadyForQa => &[Active, ReadyForDeployment, ReadyForEngineering],
        ReadyForDeployment => &[Done, ReadyForQa],
        Done => &[Archived],
        WontDo => &[Archived],
        Completed | Archived => &[],
    }
}

pub fn is_allowed(from: State, to: State) -> bool {
    to == State::WontDo || allowed_targets(from).contains(&to)
}

/// Roles expected on edges that need a human sign-off
fn gated_roles(from: State, to: State) -> Option<&'static [Role]> {
    match (from, to) {
        (State::ReadyForQa, State::ReadyForDeployment) => Some(&[Role::Qa, Role::Manager]),
        (State::ReadyForDeployment, State::Done) => Some(&[Role::Devops, Role::Manager]),
        (_, State::WontDo) | (_, State::Archived) => Some(&[Role::Manager]),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Optional context for a transition
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    pub reason: Option<String>,
    pub reviewer: Option<String>,
    pub role: Option<Role>,
    pub automation_source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionResult {
    /// The transitioned ticket on success, the untouched input otherwise
    pub ticket: Ticket,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Per-ticket migration result
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub id: String,
    pub old_status: Status,
    pub new_state: Option<State>,
    pub success: bool,
    /// False when the ticket was already migrated
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub outcomes: Vec<MigrationOutcome>,
    #[serde(skip)]
    pub tickets: Vec<Ticket>,
    pub total: usize,
    pub migrated: usize,
    pub already_migrated: usize,
    pub failed: usize,
}

impl MigrationReport {
    fn record(&mut self, outcome: MigrationOutcome, ticket: Ticket) {
        self.total += 1;
        match (outcome.success, outcome.changed) {
            (false, _) => self.failed += 1,
            (true, true) => self.migrated += 1,
            (true, false) => self.already_migrated += 1,
        }
        self.outcomes.push(outcome);
        self.tickets.push(ticket);
    }
}

/// Dry-run counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPreview {
    pub total: usize,
    pub needs_migration: usize,
    pub already_migrated: usize,
    /// Tickets migration would refuse
    pub invalid: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackAction {
    /// Drop `state` and `state_metadata`, restore the old status
    RemoveStateFields,
    /// Migration failed part way; put the old status back
    RestoreStatus,
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub id: String,
    pub action: RollbackAction,
    pub status: Status,
}

pub fn save_rollback_plan(path: &Path, plan: &[RollbackStep]) -> Result<()> {
    let json = serde_json::to_string_pretty(plan)?;
    write_atomic(path, json.as_bytes())
}

/// Merge the actionable steps of `plan` into the plan saved at `path`.
///
/// Steps already on file win, so a later run that finds nothing to migrate
/// keeps the earlier plan intact. Returns the number of steps on file.
pub fn record_rollback_plan(path: &Path, plan: &[RollbackStep]) -> Result<usize> {
    let mut merged = if path.exists() {
        load_rollback_plan(path)?
    } else {
        Vec::new()
    };
    let before = merged.len();
    for step in plan.iter().filter(|s| s.action != RollbackAction::NoAction) {
        if !merged.iter().any(|existing| existing.id == step.id) {
            merged.push(step.clone());
        }
    }
    if merged.len() > before {
        save_rollback_plan(path, &merged)?;
    }
    Ok(merged.len())
}

pub fn load_rollback_plan(path: &Path) -> Result<Vec<RollbackStep>> {
    if !path.exists() {
        return Err(Error::NotFound("no migration to roll back".into()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    pub restored: usize,
    pub skipped: usize,
    /// (ticket id, error)
    pub failed: Vec<(String, String)>,
}

/// Validates and performs lifecycle transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct StateEngine;

impl StateEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn effective_state(&self, ticket: &Ticket) -> State {
        ticket.effective_state()
    }

    pub fn validate_transition(&self, from: State, to: State, role: Option<Role>) -> TransitionValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !is_allowed(from, to) {
            let mut allowed: Vec<String> =
                allowed_targets(from).iter().map(ToString::to_string).collect();
            allowed.push(State::WontDo.to_string());
            errors.push(format!(
                "Invalid transition from {from} to {to}. Allowed: {}",
                allowed.join(", ")
            ));
        } else if let (Some(role), Some(expected)) = (role, gated_roles(from, to)) {
            if role == Role::Automation {
                warnings.push(format!(
                    "{from} -> {to} is a manual-only transition; automation should not perform it"
                ));
            } else if !expected.contains(&role) {
                let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
                warnings.push(format!(
                    "{from} -> {to} is normally performed by {}, not {role}",
                    expected.join(" or ")
                ));
            }
        }

        TransitionValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Targets reachable from the ticket's effective state
    pub fn available_transitions(&self, ticket: &Ticket) -> Vec<State> {
        let mut targets = allowed_targets(ticket.effective_state()).to_vec();
        targets.push(State::WontDo);
        targets
    }

    /// Transition without mutating the input.
    ///
    /// On success the returned ticket carries the new state, the mirrored
    /// legacy status and fresh [`StateMetadata`]; `automation_eligible` is
    /// true only when validation raised no warnings.
    pub fn transition_state(
        &self,
        ticket: &Ticket,
        to: State,
        actor: &str,
        options: &TransitionOptions,
    ) -> TransitionResult {
        let from = ticket.effective_state();
        let validation = self.validate_transition(from, to, options.role);

        if !validation.valid {
            return TransitionResult {
                ticket: ticket.clone(),
                success: false,
                errors: validation.errors,
                warnings: validation.warnings,
            };
        }

        let now = Utc::now();
        let mut next = ticket.clone();
        next.state = Some(to);
        next.status = to.legacy_status();
        next.state_metadata = Some(StateMetadata {
            transitioned_at: now,
            transitioned_by: actor.to_string(),
            previous_state: Some(from),
            automation_eligible: validation.warnings.is_empty(),
            automation_source: options.automation_source.clone(),
            transition_reason: options.reason.clone(),
            reviewer: options.reviewer.clone(),
        });
        next.updated_date = now;

        TransitionResult {
            ticket: next,
            success: true,
            errors: validation.errors,
            warnings: validation.warnings,
        }
    }

    /// Whether automation may perform this transition unattended
    pub fn can_automate(&self, ticket: &Ticket, to: State) -> bool {
        let validation = self.validate_transition(ticket.effective_state(), to, Some(Role::Automation));
        validation.valid && validation.warnings.is_empty()
    }

    /// Load a ticket, transition it and write it back on success
    pub fn transition_document(
        &self,
        store: &TicketStore,
        id: &str,
        to: State,
        actor: &str,
        options: &TransitionOptions,
    ) -> Result<TransitionResult> {
        let ticket = store.find(id)?;
        let mut result = self.transition_state(&ticket, to, actor, options);
        if result.success {
            result.ticket = store.save(&result.ticket)?;
            tracing::info!(%id, %to, %actor, "state transition");
        }
        Ok(result)
    }

    /// Attach a unified state to a legacy ticket. Idempotent.
    pub fn migrate_item(&self, ticket: &Ticket, actor: &str) -> (Ticket, MigrationOutcome) {
        let mut outcome = MigrationOutcome {
            id: ticket.id.clone(),
            old_status: ticket.status,
            new_state: ticket.state,
            success: true,
            changed: false,
            error: None,
        };

        match (ticket.state, &ticket.state_metadata) {
            (Some(_), Some(_)) => (ticket.clone(), outcome),
            (None, Some(_)) => {
                outcome.success = false;
                outcome.error = Some("state_metadata present without state".to_string());
                (ticket.clone(), outcome)
            }
            (state, None) => {
                let state = state.unwrap_or_else(|| ticket.status.to_state());
                let mut migrated = ticket.clone();
                migrated.state = Some(state);
                migrated.state_metadata = Some(StateMetadata {
                    transitioned_at: Utc::now(),
                    transitioned_by: actor.to_string(),
                    previous_state: None,
                    automation_eligible: false,
                    automation_source: None,
                    transition_reason: Some(MIGRATION_REASON.to_string()),
                    reviewer: None,
                });
                outcome.new_state = Some(state);
                outcome.changed = true;
                (migrated, outcome)
            }
        }
    }

    pub fn migrate_items(&self, tickets: &[Ticket], actor: &str) -> MigrationReport {
        let mut report = MigrationReport::default();
        for ticket in tickets {
            let (migrated, outcome) = self.migrate_item(ticket, actor);
            report.record(outcome, migrated);
        }
        report
    }

    pub fn preview_migration(&self, tickets: &[Ticket]) -> MigrationPreview {
        let mut preview = MigrationPreview::default();
        for ticket in tickets {
            preview.total += 1;
            match (ticket.state, &ticket.state_metadata) {
                (Some(_), Some(_)) => preview.already_migrated += 1,
                (None, Some(_)) => preview.invalid += 1,
                (_, None) => preview.needs_migration += 1,
            }
        }
        preview
    }

    /// Migrate and write every changed ticket; write failures count against the item
    pub fn migrate_documents(
        &self,
        store: &TicketStore,
        tickets: &[Ticket],
        actor: &str,
    ) -> MigrationReport {
        let planned = self.migrate_items(tickets, actor);
        let mut report = MigrationReport::default();

        for (mut outcome, ticket) in planned.outcomes.into_iter().zip(planned.tickets) {
            if !(outcome.success && outcome.changed) {
                report.record(outcome, ticket);
                continue;
            }
            match store.save(&ticket) {
                Ok(written) => report.record(outcome, written),
                Err(err) => {
                    tracing::warn!(id = %outcome.id, error = %err, "migration write failed");
                    outcome.success = false;
                    outcome.error = Some(err.to_string());
                    report.record(outcome, ticket);
                }
            }
        }
        report
    }

    pub fn rollback_plan(&self, report: &MigrationReport) -> Vec<RollbackStep> {
        report
            .outcomes
            .iter()
            .map(|outcome| RollbackStep {
                id: outcome.id.clone(),
                status: outcome.old_status,
                action: match (outcome.success, outcome.changed) {
                    (true, true) => RollbackAction::RemoveStateFields,
                    (false, _) => RollbackAction::RestoreStatus,
                    (true, false) => RollbackAction::NoAction,
                },
            })
            .collect()
    }

    pub fn apply_rollback(&self, ticket: &Ticket, step: &RollbackStep) -> Ticket {
        let mut restored = ticket.clone();
        match step.action {
            RollbackAction::RemoveStateFields => {
                restored.state = None;
                restored.state_metadata = None;
                restored.status = step.status;
            }
            RollbackAction::RestoreStatus => restored.status = step.status,
            RollbackAction::NoAction => {}
        }
        restored
    }

    /// Apply a rollback plan to the documents on disk
    pub fn rollback_documents(&self, store: &TicketStore, plan: &[RollbackStep]) -> RollbackReport {
        let mut report = RollbackReport::default();
        for step in plan {
            if step.action == RollbackAction::NoAction {
                report.skipped += 1;
                continue;
            }
            let result = store
                .find(&step.id)
                .and_then(|ticket| store.save(&self.apply_rollback(&ticket, step)));
            match result {
                Ok(_) => report.restored += 1,
                Err(err) => {
                    tracing::warn!(id = %step.id, error = %err, "rollback failed");
                    report.failed.push((step.id.clone(), err.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewTicket, TicketKind};
    use tempfile::TempDir;

    fn engine() -> StateEngine {
        StateEngine::new()
    }

    fn issue(status: Status) -> Ticket {
        let mut t = Ticket::new(TicketKind::Issue, "ISS-0001".into(), "Login".into());
        t.status = status;
        t
    }

    const TABLE: &[(State, State)] = &[
        (State::Planning, State::ReadyForEngineering),
        (State::Active, State::ReadyForEngineering),
        (State::ReadyForEngineering, State::Active),
        (State::ReadyForEngineering, State::ReadyForQa),
        (State::ReadyForQa, State::Active),
        (State::ReadyForQa, State::ReadyForDeployment),
        (State::ReadyForQa, State::ReadyForEngineering),
        (State::ReadyForDeployment, State::Done),
        (State::ReadyForDeployment, State::ReadyForQa),
        (State::Done, State::Archived),
        (State::WontDo, State::Archived),
    ];

    #[test]
    fn test_transition_table_is_exact() {
        for from in State::ALL {
            for to in State::ALL {
                let expected = to == State::WontDo || TABLE.contains(&(from, to));
                let result = engine().validate_transition(from, to, None);
                assert_eq!(result.valid, expected, "{from} -> {to}");
                assert_eq!(result.errors.is_empty(), expected);
                assert!(result.warnings.is_empty());
            }
        }
    }

    #[test]
    fn test_roles_only_add_warnings() {
        for &(from, to) in TABLE {
            for role in [Role::Developer, Role::Qa, Role::Devops, Role::Manager, Role::Automation] {
                assert!(engine().validate_transition(from, to, Some(role)).valid);
            }
        }

        let v = engine().validate_transition(State::ReadyForQa, State::ReadyForDeployment, Some(Role::Developer));
        assert!(v.valid);
        assert_eq!(v.warnings.len(), 1);

        let v = engine().validate_transition(State::ReadyForQa, State::ReadyForDeployment, Some(Role::Qa));
        assert!(v.warnings.is_empty());

        let v = engine().validate_transition(State::Planning, State::ReadyForEngineering, Some(Role::Automation));
        assert!(v.warnings.is_empty());

        let v = engine().validate_transition(State::Done, State::Planning, Some(Role::Manager));
        assert!(!v.valid);
    }

    #[test]
    fn test_transition_records_provenance() {
        let ticket = issue(Status::Planning);
        let options = TransitionOptions {
            reason: Some("groomed".into()),
            reviewer: Some("bob".into()),
            ..Default::default()
        };
        let result = engine().transition_state(&ticket, State::ReadyForEngineering, "alice", &options);

        assert!(result.success);
        assert!(ticket.state.is_none(), "input must not be mutated");
        let next = result.ticket;
        assert_eq!(next.state, Some(State::ReadyForEngineering));
        assert_eq!(next.status, Status::Active);
        let meta = next.state_metadata.unwrap();
        assert_eq!(meta.previous_state, Some(State::Planning));
        assert_eq!(meta.transitioned_by, "alice");
        assert!(meta.automation_eligible);
        assert_eq!(meta.transition_reason.as_deref(), Some("groomed"));
        assert_eq!(meta.reviewer.as_deref(), Some("bob"));
        assert!(next.updated_date >= ticket.updated_date);
    }

    #[test]
    fn test_failed_transition_returns_original() {
        let ticket = issue(Status::Completed);
        let result = engine().transition_state(&ticket, State::ReadyForQa, "alice", &TransitionOptions::default());
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.ticket.state.is_none());
        assert_eq!(result.ticket.status, Status::Completed);
    }

    #[test]
    fn test_warnings_clear_automation_eligibility() {
        let mut ticket = issue(Status::Active);
        ticket.state = Some(State::ReadyForDeployment);
        let options = TransitionOptions {
            role: Some(Role::Automation),
            ..Default::default()
        };
        let result = engine().transition_state(&ticket, State::Done, "ci", &options);
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.ticket.state_metadata.unwrap().automation_eligible);

        assert!(!engine().can_automate(&ticket, State::Done));
        assert!(engine().can_automate(&ticket, State::ReadyForQa));
        assert!(!engine().can_automate(&ticket, State::Planning));
    }

    #[test]
    fn test_available_transitions() {
        let mut ticket = issue(Status::Active);
        ticket.state = Some(State::ReadyForQa);
        assert_eq!(
            engine().available_transitions(&ticket),
            vec![
                State::Active,
                State::ReadyForDeployment,
                State::ReadyForEngineering,
                State::WontDo
            ]
        );
    }

    #[test]
    fn test_migrate_item_is_idempotent() {
        let ticket = issue(Status::Completed);
        let (once, outcome) = engine().migrate_item(&ticket, "migrator");
        assert!(outcome.success && outcome.changed);
        assert_eq!(once.state, Some(State::Done));
        let meta = once.state_metadata.clone().unwrap();
        assert!(!meta.automation_eligible);
        assert_eq!(meta.previous_state, None);
        assert_eq!(meta.transition_reason.as_deref(), Some(MIGRATION_REASON));

        let (twice, outcome) = engine().migrate_item(&once, "migrator");
        assert!(outcome.success);
        assert!(!outcome.changed);
        assert_eq!(twice.state, once.state);
        assert_eq!(twice.state_metadata, once.state_metadata);
    }

    #[test]
    fn test_batch_migration_preview_and_rollback() {
        let legacy = issue(Status::Active);
        let (migrated, _) = engine().migrate_item(&issue(Status::Planning), "m");
        let mut broken = issue(Status::Archived);
        broken.state_metadata = migrated.state_metadata.clone();

        let tickets = vec![legacy.clone(), migrated, broken];
        let preview = engine().preview_migration(&tickets);
        assert_eq!(
            preview,
            MigrationPreview {
                total: 3,
                needs_migration: 1,
                already_migrated: 1,
                invalid: 1
            }
        );

        let report = engine().migrate_items(&tickets, "m");
        assert_eq!((report.migrated, report.already_migrated, report.failed), (1, 1, 1));
        assert_eq!(report.outcomes[0].new_state, Some(State::Active));
        assert!(report.outcomes[2].error.is_some());

        let plan = engine().rollback_plan(&report);
        let actions: Vec<RollbackAction> = plan.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![
                RollbackAction::RemoveStateFields,
                RollbackAction::NoAction,
                RollbackAction::RestoreStatus
            ]
        );

        let restored = engine().apply_rollback(&report.tickets[0], &plan[0]);
        assert!(restored.state.is_none() && restored.state_metadata.is_none());
        assert_eq!(restored.status, legacy.status);
    }

    #[test]
    fn test_epic_issue_transition_scenario() {
        let dir = TempDir::new().unwrap();
        let store = TicketStore::init(dir.path(), None).unwrap();
        let mut ids = store.allocator().unwrap();

        let epic = store.create(&mut ids, NewTicket::new(TicketKind::Epic, "Auth")).unwrap();
        assert_eq!(epic.id, "EP-0001");
        let mut draft = NewTicket::new(TicketKind::Issue, "Login");
        draft.epic_id = Some(epic.id.clone());
        let issue = store.create(&mut ids, draft).unwrap();
        assert_eq!(issue.id, "ISS-0001");
        assert_eq!(issue.effective_state(), State::Planning);

        let result = engine()
            .transition_document(&store, "ISS-0001", State::ReadyForEngineering, "alice", &TransitionOptions::default())
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.ticket.state_metadata.as_ref().unwrap().previous_state,
            Some(State::Planning)
        );

        let reloaded = store.find("ISS-0001").unwrap();
        assert_eq!(reloaded.state, Some(State::ReadyForEngineering));
        assert_eq!(reloaded.epic_id.as_deref(), Some("EP-0001"));
    }

    #[test]
    fn test_archiving_relocates_document() {
        let dir = TempDir::new().unwrap();
        let store = TicketStore::init(dir.path(), None).unwrap();
        let mut ids = store.allocator().unwrap();
        let task = store.create(&mut ids, NewTicket::new(TicketKind::Task, "Drop")).unwrap();

        let options = TransitionOptions::default();
        let result = engine()
            .transition_document(&store, &task.id, State::WontDo, "alice", &options)
            .unwrap();
        assert!(result.success);
        let result = engine()
            .transition_document(&store, &task.id, State::Archived, "alice", &options)
            .unwrap();
        assert!(result.success);
        assert!(result.ticket.file_path.ends_with("tasks/archive/TSK-0001-drop.md"));
        assert!(!task.file_path.exists());
    }

    #[test]
    fn test_rollback_plan_round_trip_restores_documents() {
        let dir = TempDir::new().unwrap();
        let store = TicketStore::init(dir.path(), None).unwrap();
        let mut ids = store.allocator().unwrap();
        let a = store.create(&mut ids, NewTicket::new(TicketKind::Issue, "A")).unwrap();

        let report = engine().migrate_documents(&store, &[a.clone()], "m");
        let plan = engine().rollback_plan(&report);
        save_rollback_plan(&store.rollback_plan_path(), &plan).unwrap();

        let loaded = load_rollback_plan(&store.rollback_plan_path()).unwrap();
        assert_eq!(loaded, plan);

        let rolled = engine().rollback_documents(&store, &loaded);
        assert_eq!(rolled.restored, 1);
        assert!(rolled.failed.is_empty());
        let restored = store.find(&a.id).unwrap();
        assert!(restored.state.is_none());
        assert!(restored.state_metadata.is_none());
        assert_eq!(restored.status, Status::Planning);
    }

    #[test]
    fn test_repeat_migration_keeps_recorded_rollback_plan() {
        let dir = TempDir::new().unwrap();
        let store = TicketStore::init(dir.path(), None).unwrap();
        let path = store.rollback_plan_path();
        let mut ids = store.allocator().unwrap();
        let a = store.create(&mut ids, NewTicket::new(TicketKind::Issue, "A")).unwrap();

        let first = engine().migrate_documents(&store, &[a.clone()], "m");
        assert_eq!(record_rollback_plan(&path, &engine().rollback_plan(&first)).unwrap(), 1);

        // Nothing left to migrate; the plan on file must survive
        let again = store.find(&a.id).unwrap();
        let second = engine().migrate_documents(&store, &[again], "m");
        assert_eq!(second.migrated, 0);
        assert_eq!(record_rollback_plan(&path, &engine().rollback_plan(&second)).unwrap(), 1);

        // A ticket added later joins the existing plan
        let b = store.create(&mut ids, NewTicket::new(TicketKind::Issue, "B")).unwrap();
        let third = engine().migrate_documents(&store, &[b.clone()], "m");
        assert_eq!(record_rollback_plan(&path, &engine().rollback_plan(&third)).unwrap(), 2);

        let rolled = engine().rollback_documents(&store, &load_rollback_plan(&path).unwrap());
        assert_eq!(rolled.restored, 2);
        assert!(store.find(&a.id).unwrap().state.is_none());
        assert!(store.find(&b.id).unwrap().state.is_none());
    }

    #[test]
    fn test_no_op_migration_writes_no_plan() {
        let dir = TempDir::new().unwrap();
        let store = TicketStore::init(dir.path(), None).unwrap();
        let report = engine().migrate_documents(&store, &[], "m");
        let recorded = record_rollback_plan(&store.rollback_plan_path(), &engine().rollback_plan(&report));
        assert_eq!(recorded.unwrap(), 0);
        assert!(!store.rollback_plan_path().exists());
    }

    #[test]
    fn test_migrate_documents_writes_changed_tickets() {
        let dir = TempDir::new().unwrap();
        let store = TicketStore::init(dir.path(), None).unwrap();
        let mut ids = store.allocator().unwrap();
        let a = store.create(&mut ids, NewTicket::new(TicketKind::Issue, "A")).unwrap();
        let b = store.create(&mut ids, NewTicket::new(TicketKind::Issue, "B")).unwrap();

        // b changes on disk after being read
        store.update(&b.id, |t| t.title = "B2".into()).unwrap();

        let report = engine().migrate_documents(&store, &[a.clone(), b], "m");
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.find(&a.id).unwrap().state, Some(State::Planning));
    }
}
