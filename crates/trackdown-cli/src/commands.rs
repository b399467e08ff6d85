//! CLI command implementations

use anyhow::{Result, bail};
use colored::{ColoredString, Colorize};
use serde_json::json;
use trackdown_core::state::{load_rollback_plan, record_rollback_plan};
use trackdown_core::sync::Side;
use trackdown_core::{
    Config, GitHubTracker, NewTicket, Priority, RelationshipIndex, Role, SearchFilters, State,
    StateEngine, SyncEngine, SyncHealth, SyncReport, Ticket, TicketKind, TicketStore,
    TransitionOptions,
};

fn state_label(state: State) -> ColoredString {
    let label = state.to_string();
    match state {
        State::Planning => label.white(),
        State::Active | State::ReadyForEngineering => label.yellow(),
        State::ReadyForQa | State::ReadyForDeployment => label.magenta(),
        State::Done | State::Completed => label.green(),
        State::WontDo | State::Archived => label.dimmed(),
    }
}

fn print_line(ticket: &Ticket) {
    println!(
        "{} [{}] [{}] {} - {}",
        ticket.id.cyan(),
        ticket.kind.to_string().blue(),
        ticket.priority,
        state_label(ticket.effective_state()),
        ticket.title
    );
}

fn print_group(heading: &str, tickets: &[Ticket]) {
    if tickets.is_empty() {
        return;
    }
    println!();
    println!("{}", heading.bold());
    for ticket in tickets {
        print!("  ");
        print_line(ticket);
    }
}

fn open_index() -> Result<RelationshipIndex> {
    let store = TicketStore::open()?;
    let index = RelationshipIndex::build(store)?;
    if !index.parse_failures().is_empty() {
        eprintln!(
            "{} {} document(s) could not be parsed; run 'trackdown check'",
            "!".yellow(),
            index.parse_failures().len()
        );
    }
    Ok(index)
}

pub fn init(tickets_dir: &str, lock_counters: bool, repository: Option<String>, json: bool) -> Result<()> {
    let root = std::env::current_dir()?;
    let customized = tickets_dir != "tickets" || lock_counters || repository.is_some();
    let config = customized.then(|| {
        let mut config = Config::default();
        config.tickets_dir = tickets_dir.to_string();
        config.counters.lock = lock_counters;
        config.sync.repository = repository;
        config
    });
    let store = TicketStore::init(&root, config)?;

    if json {
        println!("{}", json!({ "root": store.root(), "config": store.config() }));
    } else {
        println!(
            "{} Initialized trackdown in {}",
            "✓".green(),
            store.trackdown_dir().display()
        );
        println!("  Tickets: {}", store.tickets_root().display());
    }
    Ok(())
}

pub struct CreateArgs {
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub epic: Option<String>,
    pub issue: Option<String>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub branch: Option<String>,
    pub estimate: u64,
}

pub fn create(args: CreateArgs, json: bool) -> Result<()> {
    let store = TicketStore::open()?;
    let kind: TicketKind = args.kind.parse()?;

    let mut draft = NewTicket::new(kind, args.title);
    draft.description = args.description.unwrap_or_default();
    draft.priority = args.priority.parse()?;
    draft.epic_id = args.epic;
    draft.issue_id = args.issue;
    draft.assignee = args.assignee;
    draft.tags = args.tags;
    draft.branch = args.branch;
    draft.estimated_tokens = args.estimate;

    let mut ids = store.allocator()?;
    let ticket = store.create(&mut ids, draft)?;

    if json {
        println!("{}", serde_json::to_string(&ticket)?);
    } else {
        println!("{} Created {}: {}", "✓".green(), ticket.kind, ticket.id);
        println!("  Title: {}", ticket.title);
        println!("  File:  {}", ticket.file_path.display());
    }
    Ok(())
}

pub struct ListArgs {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub state: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub text: Option<String>,
}

pub fn list(args: ListArgs, json: bool) -> Result<()> {
    let filters = SearchFilters {
        kind: args.kind.as_deref().map(str::parse).transpose()?,
        status: args.status.as_deref().map(str::parse).transpose()?,
        state: args.state.as_deref().map(str::parse).transpose()?,
        priority: args.priority.as_deref().map(str::parse::<Priority>).transpose()?,
        assignee: args.assignee,
        tags: args.tags,
        text: args.text,
    };

    let index = open_index()?;
    let tickets = index.search(&filters);

    if json {
        println!("{}", serde_json::to_string(&tickets)?);
    } else if tickets.is_empty() {
        println!("No tickets found");
    } else {
        for ticket in tickets {
            print_line(ticket);
        }
    }
    Ok(())
}

pub fn show(id: &str, json: bool) -> Result<()> {
    let index = open_index()?;
    let ticket = index.require(id)?;

    let hierarchy = match ticket.kind {
        TicketKind::Epic => index.get_epic_hierarchy(id).map(serde_json::to_value).transpose()?,
        TicketKind::Issue => index.get_issue_hierarchy(id).map(serde_json::to_value).transpose()?,
        TicketKind::Task => index.get_task_hierarchy(id).map(serde_json::to_value).transpose()?,
        TicketKind::PullRequest => index.get_pr_hierarchy(id).map(serde_json::to_value).transpose()?,
        TicketKind::Project => None,
    };

    if json {
        let out = json!({
            "ticket": ticket,
            "content": ticket.content,
            "hierarchy": hierarchy,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}", ticket.id.cyan().bold(), ticket.title.bold());
    println!();
    println!("Kind:     {}", ticket.kind);
    println!("State:    {}", state_label(ticket.effective_state()));
    println!("Status:   {}", ticket.status);
    println!("Priority: {}", ticket.priority);
    if let Some(assignee) = &ticket.assignee {
        println!("Assignee: {}", assignee);
    }
    if !ticket.tags.is_empty() {
        println!("Tags:     {}", ticket.tags.join(", "));
    }
    println!("Created:  {}", ticket.created_date.format("%Y-%m-%d %H:%M"));
    println!("Updated:  {}", ticket.updated_date.format("%Y-%m-%d %H:%M"));
    if let Some(remote) = &ticket.remote {
        println!("Remote:   #{} ({})", remote.number, ticket.sync_status);
    }
    if let Some(meta) = &ticket.state_metadata {
        println!(
            "Last transition by {} at {}",
            meta.transitioned_by,
            meta.transitioned_at.format("%Y-%m-%d %H:%M")
        );
    }

    match ticket.kind {
        TicketKind::Epic => {
            if let Some(h) = index.get_epic_hierarchy(id) {
                print_group("Issues:", &h.issues);
                print_group("Tasks:", &h.tasks);
                print_group("Pull requests:", &h.prs);
            }
        }
        TicketKind::Issue => {
            if let Some(h) = index.get_issue_hierarchy(id) {
                print_group("Epic:", h.epic.as_slice());
                print_group("Tasks:", &h.tasks);
                print_group("Pull requests:", &h.prs);
            }
        }
        TicketKind::Task => {
            if let Some(h) = index.get_task_hierarchy(id) {
                print_group("Issue:", h.issue.as_slice());
                print_group("Epic:", h.epic.as_slice());
            }
        }
        TicketKind::PullRequest => {
            if let Some(h) = index.get_pr_hierarchy(id) {
                print_group("Issue:", h.issue.as_slice());
                print_group("Epic:", h.epic.as_slice());
            }
        }
        TicketKind::Project => {}
    }

    let body = ticket.content.trim();
    if !body.is_empty() {
        println!();
        println!("{}", body);
    }
    Ok(())
}

pub fn related(id: &str, json: bool) -> Result<()> {
    let index = open_index()?;
    let related = index.get_related_items(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&related)?);
        return Ok(());
    }

    print_group("Depends on:", &related.dependencies);
    print_group("Depended on by:", &related.dependents);
    if !related.missing.is_empty() {
        println!();
        println!("{} {}", "Missing:".yellow().bold(), related.missing.join(", "));
    }
    if related.dependencies.is_empty() && related.dependents.is_empty() && related.missing.is_empty() {
        println!("{} has no related tickets", id);
    }
    Ok(())
}

pub fn transition(
    id: &str,
    state: &str,
    actor: &str,
    role: Option<String>,
    reason: Option<String>,
    reviewer: Option<String>,
    json: bool,
) -> Result<()> {
    let store = TicketStore::open()?;
    let to: State = state.parse()?;
    let options = TransitionOptions {
        reason,
        reviewer,
        role: role.as_deref().map(str::parse::<Role>).transpose()?,
        automation_source: None,
    };

    let result = StateEngine::new().transition_document(&store, id, to, actor, &options)?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        for warning in &result.warnings {
            eprintln!("{} {}", "!".yellow(), warning);
        }
        if result.success {
            println!("{} {} is now {}", "✓".green(), id, state_label(to));
        }
    }

    if !result.success {
        bail!("{}", result.errors.join("; "));
    }
    Ok(())
}

pub fn transitions(id: &str, json: bool) -> Result<()> {
    let store = TicketStore::open()?;
    let ticket = store.find(id)?;
    let engine = StateEngine::new();
    let targets = engine.available_transitions(&ticket);

    if json {
        let out: Vec<_> = targets
            .iter()
            .map(|to| json!({ "state": to, "automatable": engine.can_automate(&ticket, *to) }))
            .collect();
        println!("{}", serde_json::to_string(&out)?);
    } else {
        println!("{} is {}", id.cyan(), state_label(ticket.effective_state()));
        for to in targets {
            let note = if engine.can_automate(&ticket, to) {
                "".normal()
            } else {
                " (manual)".dimmed()
            };
            println!("  -> {}{}", state_label(to), note);
        }
    }
    Ok(())
}

pub fn migrate_preview(json: bool) -> Result<()> {
    let index = open_index()?;
    let tickets: Vec<Ticket> = index.all().into_iter().cloned().collect();
    let preview = StateEngine::new().preview_migration(&tickets);

    if json {
        println!("{}", serde_json::to_string(&preview)?);
    } else {
        println!("{}", "Migration preview:".bold());
        println!("  Total:            {}", preview.total);
        println!("  Needs migration:  {}", preview.needs_migration);
        println!("  Already migrated: {}", preview.already_migrated);
        println!("  Invalid:          {}", preview.invalid);
    }
    Ok(())
}

pub fn migrate(actor: &str, json: bool) -> Result<()> {
    let index = open_index()?;
    let store = index.store().clone();
    let tickets: Vec<Ticket> = index.all().into_iter().cloned().collect();

    let engine = StateEngine::new();
    let report = engine.migrate_documents(&store, &tickets, actor);
    let plan = engine.rollback_plan(&report);
    record_rollback_plan(&store.rollback_plan_path(), &plan)?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "{} Migrated {} ticket(s), {} already migrated",
            "✓".green(),
            report.migrated,
            report.already_migrated
        );
        for outcome in report.outcomes.iter().filter(|o| !o.success) {
            eprintln!(
                "{} {}: {}",
                "✗".red(),
                outcome.id,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if report.failed > 0 {
        bail!("{} ticket(s) failed to migrate", report.failed);
    }
    Ok(())
}

pub fn migrate_rollback_plan(json: bool) -> Result<()> {
    let store = TicketStore::open()?;
    let plan = load_rollback_plan(&store.rollback_plan_path())?;

    if json {
        println!("{}", serde_json::to_string(&plan)?);
    } else {
        for step in &plan {
            println!("{} {:?} (status {})", step.id.cyan(), step.action, step.status);
        }
    }
    Ok(())
}

pub fn migrate_rollback(json: bool) -> Result<()> {
    let store = TicketStore::open()?;
    let plan_path = store.rollback_plan_path();
    let plan = load_rollback_plan(&plan_path)?;
    let report = StateEngine::new().rollback_documents(&store, &plan);

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "{} Rolled back {} ticket(s), {} unchanged",
            "✓".green(),
            report.restored,
            report.skipped
        );
        for (id, error) in &report.failed {
            eprintln!("{} {}: {}", "✗".red(), id, error);
        }
    }

    if !report.failed.is_empty() {
        bail!("{} ticket(s) failed to roll back", report.failed.len());
    }
    std::fs::remove_file(&plan_path)?;
    Ok(())
}

pub enum SyncMode {
    Push,
    Pull,
    Both,
}

fn sync_engine(require_token: bool) -> Result<SyncEngine<GitHubTracker>> {
    let store = TicketStore::open()?;
    let config = store.config().sync.clone();
    let tracker = if require_token {
        if !config.enabled {
            bail!("Sync is disabled. Set [sync] enabled = true in .trackdown/config.toml");
        }
        GitHubTracker::from_config(&config)?
    } else {
        let token = std::env::var(&config.token_env).unwrap_or_default();
        GitHubTracker::new(&config.api_url, config.repository.as_deref().unwrap_or_default(), &token)
    };
    Ok(SyncEngine::new(store, tracker)?)
}

pub fn sync_status(json: bool) -> Result<()> {
    let status = sync_engine(false)?.get_sync_status();

    if json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    let health = match status.sync_health {
        SyncHealth::Healthy => "healthy".green(),
        SyncHealth::Degraded => "degraded".yellow(),
        SyncHealth::Failed => "failed".red(),
    };
    println!("Enabled:     {}", status.enabled);
    println!(
        "Repository:  {}",
        status.repository.as_deref().unwrap_or("(not set)")
    );
    match status.last_sync_at {
        Some(at) => println!("Last sync:   {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Last sync:   never"),
    }
    if let Some(remaining) = status.rate_limit_remaining {
        println!("Rate limit:  {} remaining", remaining);
    }
    println!("Health:      {}", health);
    Ok(())
}

pub fn sync_test(json: bool) -> Result<()> {
    let mut engine = sync_engine(true)?;
    let login = engine.test_connection()?;
    if json {
        println!("{}", json!({ "authenticated_as": login }));
    } else {
        println!("{} Authenticated as {}", "✓".green(), login);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "{} pushed {}, pulled {}, created {} local / {} remote, {} unchanged",
        "✓".green(),
        report.pushed,
        report.pulled,
        report.created_local,
        report.created_remote,
        report.unchanged
    );
    for conflict in &report.conflicts {
        let resolution = match conflict.winner {
            Some(side) => format!("kept {side}"),
            None => format!("held; run `trackdown sync resolve {} --keep local|remote`", conflict.id),
        };
        println!(
            "  {} {} <-> #{}: {}",
            "conflict".yellow(),
            conflict.id,
            conflict.number,
            resolution
        );
    }
    for failure in &report.failed {
        eprintln!("  {} {}: {}", "✗".red(), failure.item, failure.error);
    }
}

pub fn sync_run(mode: SyncMode, json: bool) -> Result<()> {
    let mut engine = sync_engine(true)?;
    let report = match mode {
        SyncMode::Push => engine.push_local_changes()?,
        SyncMode::Pull => engine.pull_remote_changes()?,
        SyncMode::Both => engine.bidirectional_sync()?,
    };

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }

    if report.has_failures() {
        bail!("{} item(s) failed to sync", report.failed.len());
    }
    Ok(())
}

pub fn sync_resolve(id: &str, keep: &str, json: bool) -> Result<()> {
    let keep: Side = keep.parse()?;
    let mut engine = sync_engine(true)?;
    let ticket = engine.resolve_conflict(id, keep)?;

    if json {
        println!("{}", serde_json::to_string(&ticket)?);
    } else {
        println!("{} {} resolved, kept {} side", "✓".green(), ticket.id, keep);
    }
    Ok(())
}

pub fn counters_show(json: bool) -> Result<()> {
    let store = TicketStore::open()?;
    let ids = store.allocator()?;

    if json {
        println!("{}", serde_json::to_string(ids.counters())?);
    } else {
        println!("{}", "Next ids:".bold());
        for kind in TicketKind::ALL {
            println!("  {:<8} {}", kind.to_string(), ids.peek_next_id(kind));
        }
    }
    Ok(())
}

pub fn counters_detect(json: bool) -> Result<()> {
    let store = TicketStore::open()?;
    let mut ids = store.allocator()?;
    let detected = ids.auto_detect_counters(&store.tickets_root())?;

    if json {
        println!("{}", serde_json::to_string(&detected)?);
    } else {
        println!("{} Counters updated from existing documents", "✓".green());
        for (kind, next) in detected {
            println!("  {:<8} {}", kind.to_string(), ids.peek_next_id(kind));
            tracing::debug!(%kind, next, "detected counter");
        }
    }
    Ok(())
}

pub fn counters_set(kind: &str, next: u64) -> Result<()> {
    let store = TicketStore::open()?;
    let kind: TicketKind = kind.parse()?;
    let mut ids = store.allocator()?;
    ids.set_counter(kind, next)?;
    println!("{} Next {} id: {}", "✓".green(), kind, ids.peek_next_id(kind));
    Ok(())
}

pub fn check(json: bool) -> Result<()> {
    let store = TicketStore::open()?;
    let index = RelationshipIndex::build(store)?;
    let failures = index.parse_failures();
    let dangling = index.dangling_references();
    let cycles = index.dependency_cycles();

    if json {
        let out = json!({
            "parse_failures": failures,
            "dangling_references": dangling,
            "dependency_cycles": cycles,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for failure in failures {
            println!("{} {}: {}", "✗".red(), failure.path.display(), failure.message);
        }
        for reference in &dangling {
            println!(
                "{} {} {} -> {} (no such ticket)",
                "!".yellow(),
                reference.child,
                reference.field,
                reference.target
            );
        }
        for cycle in &cycles {
            println!("{} dependency cycle: {}", "!".yellow(), cycle.join(" -> "));
        }
    }

    let problems = failures.len() + dangling.len() + cycles.len();
    if problems > 0 {
        bail!("{} problem(s) found", problems);
    }
    if !json {
        println!("{} {} ticket(s), no problems found", "✓".green(), index.len());
    }
    Ok(())
}

pub fn stats(json: bool) -> Result<()> {
    let index = open_index()?;
    let stats = index.stats();
    let states = index.state_counts();

    if json {
        println!("{}", json!({ "counts": stats, "states": states }));
        return Ok(());
    }

    println!("{}", "Tickets:".bold());
    println!("  Epics:          {}", stats.epics);
    println!("  Issues:         {}", stats.issues);
    println!("  Tasks:          {}", stats.tasks);
    println!("  Pull requests:  {}", stats.prs);
    println!("  Projects:       {}", stats.projects);
    if stats.parse_failures > 0 {
        println!("  Unparseable:    {}", stats.parse_failures.to_string().red());
    }
    if !states.is_empty() {
        println!();
        println!("{}", "By state:".bold());
        for (state, count) in states {
            println!("  {:<22} {}", state_label(state), count);
        }
    }
    Ok(())
}
