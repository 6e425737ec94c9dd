// Progression façade.
//
// apply_event is pure: current state + event in, next state + deltas out.
// ProgressionEngine wraps it in a load -> compute -> compare-and-swap loop over
// a ProgressStore, so two events racing on one child can't lose an update.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use spacetimedb::Timestamp;

use crate::badges::BadgeEvaluation;
use crate::calendar::{self, DateKey, DateRange};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result, ValidationError};
use crate::journal::{self, DayBucket, IdentityKey, Trend, WeekBucket};
use crate::league::{add_score, League};
use crate::streak::{self, StreakEvent};
use crate::{short_id, ChildProgress, JournalEntry, TaskKind};

// ==================== EVENTS & RESULTS ====================

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Login,
    ActivityComplete(TaskKind),
    JournalSubmitted(JournalEntry),
    AvatarCreated,
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Login => "login",
            ProgressEvent::ActivityComplete(_) => "activity_complete",
            ProgressEvent::JournalSubmitted(_) => "journal_submitted",
            ProgressEvent::AvatarCreated => "avatar_created",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakChange {
    pub event: StreakEvent,
    pub from: u32,
    pub to: u32,
}

/// Exactly what one transition changed, for celebration UI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressDeltas {
    /// Set for every login, including same-day replays
    pub streak: Option<StreakChange>,
    /// Login day fell before the last recorded one; nothing was applied
    pub clock_anomaly: bool,
    pub best_streak_raised_to: Option<u32>,
    pub first_login_bonus: Option<u64>,
    pub first_task_completed: Option<TaskKind>,
    pub new_badges: Vec<String>,
    /// Every bonus of this transition combined
    pub score_gained: u64,
    /// (before, after)
    pub league_change: Option<(League, League)>,
    pub journal_appended: bool,
    /// Entry with this identity was already stored; nothing was applied
    pub journal_duplicate: bool,
    /// False means nothing was (or needs to be) persisted
    pub state_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: ChildProgress,
    pub deltas: ProgressDeltas,
    /// Entry to append atomically with `state`
    pub journal: Option<JournalEntry>,
}

/// Read-only projection; league is derived on every read
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView {
    pub progress: ChildProgress,
    pub league: League,
    pub next_league: Option<(League, u64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklySummary {
    /// Sunday the summary week starts on
    pub week_start: DateKey,
    /// The seven days of that week
    pub days: Vec<DayBucket>,
    /// Across the trailing trend window ending with this week
    pub trend: Trend,
    pub weeks: Vec<WeekBucket>,
    pub active_weeks: u32,
}

// ==================== PURE TRANSITIONS ====================

fn validate_state(state: &ChildProgress) -> Result<()> {
    if state.current_streak > state.best_streak {
        return Err(ValidationError::MalformedState(format!(
            "current streak {} exceeds best streak {}",
            state.current_streak, state.best_streak
        ))
        .into());
    }
    if let Some(day) = state.last_login_day {
        day.to_naive()?;
    }
    Ok(())
}

/// Compute the transition for one event. Never mutates `state`.
pub fn apply_event(
    config: &EngineConfig,
    state: &ChildProgress,
    event: &ProgressEvent,
    occurred_at: DateTime<Utc>,
) -> Result<Transition> {
    validate_state(state)?;
    config.badges.check_known(state)?;

    let mut next = state.clone();
    let mut deltas = ProgressDeltas::default();
    let mut journal = None;

    let run_badges = match event {
        ProgressEvent::Login => apply_login(config, &mut next, &mut deltas, occurred_at)?,
        ProgressEvent::ActivityComplete(kind) => complete_first_task(config, &mut next, &mut deltas, *kind),
        ProgressEvent::AvatarCreated => complete_first_task(config, &mut next, &mut deltas, TaskKind::Avatar),
        ProgressEvent::JournalSubmitted(entry) => {
            entry.validate()?;
            journal = Some(JournalEntry { id: 0, child_id: state.id.clone(), ..entry.clone() });
            next.counters.journal_entries = next.counters.journal_entries.saturating_add(1);
            deltas.journal_appended = true;
            complete_first_task(config, &mut next, &mut deltas, TaskKind::Journal);
            true
        }
    };

    if run_badges {
        let evaluation = config.badges.evaluate(&next)?;
        grant_badges(config, &mut next, &mut deltas, evaluation);
    }
    Ok(finish(config, state, next, deltas, journal))
}

/// Staff grant of one badge, followed by the usual fixed-point pass
pub fn apply_badge_award(config: &EngineConfig, state: &ChildProgress, badge_id: &str) -> Result<Transition> {
    validate_state(state)?;
    let manual = config.badges.grant(state, badge_id)?;

    let mut next = state.clone();
    let mut deltas = ProgressDeltas::default();
    if manual.is_empty() {
        log::debug!("[BADGE] child={} badge={} already held", short_id(&state.id), badge_id);
    } else {
        grant_badges(config, &mut next, &mut deltas, manual);
        let chained = config.badges.evaluate(&next)?;
        grant_badges(config, &mut next, &mut deltas, chained);
    }
    Ok(finish(config, state, next, deltas, None))
}

/// Returns whether the badge pass should run; same-day logins skip it
fn apply_login(
    config: &EngineConfig,
    next: &mut ChildProgress,
    deltas: &mut ProgressDeltas,
    occurred_at: DateTime<Utc>,
) -> Result<bool> {
    let today = calendar::day_key(occurred_at, config.day_boundary);
    let outcome = streak::evaluate_login(next.last_login_day, today, next.current_streak)?;
    deltas.streak = Some(StreakChange { event: outcome.event, from: next.current_streak, to: outcome.new_streak });

    if outcome.clock_anomaly {
        deltas.clock_anomaly = true;
        log::warn!(
            "[LOGIN] clock anomaly child={} last_login={} event_day={} streak={} (ignored)",
            short_id(&next.id),
            next.last_login_day.map(|d| d.to_string()).unwrap_or_default(),
            today,
            next.current_streak
        );
    }
    if outcome.event == StreakEvent::SameDay {
        log::debug!("[LOGIN] same-day child={} streak={}", short_id(&next.id), next.current_streak);
        return Ok(false);
    }

    next.current_streak = outcome.new_streak;
    next.last_login_day = Some(today);
    next.counters.logins = next.counters.logins.saturating_add(1);

    if outcome.event == StreakEvent::FirstLogin && !next.received_first_login_bonus {
        next.received_first_login_bonus = true;
        next.leadership_score = add_score(next.leadership_score, config.bonuses.first_login);
        deltas.first_login_bonus = Some(config.bonuses.first_login);
    }

    if next.current_streak > next.best_streak {
        next.best_streak = next.current_streak;
        // Bonus once per improvement, and only for streak-extending logins
        if outcome.event.extends_streak() {
            next.leadership_score = add_score(next.leadership_score, config.bonuses.best_streak_improvement);
            deltas.best_streak_raised_to = Some(next.best_streak);
        }
    }
    Ok(true)
}

/// Returns whether the flag flipped (replays are no-ops)
fn complete_first_task(
    config: &EngineConfig,
    next: &mut ChildProgress,
    deltas: &mut ProgressDeltas,
    kind: TaskKind,
) -> bool {
    if !next.first_tasks.mark(kind) {
        log::debug!("[TASK] child={} task={} already completed", short_id(&next.id), kind.as_str());
        return false;
    }
    next.leadership_score = add_score(next.leadership_score, config.bonuses.first_task);
    deltas.first_task_completed = Some(kind);
    true
}

fn grant_badges(config: &EngineConfig, next: &mut ChildProgress, deltas: &mut ProgressDeltas, evaluation: BadgeEvaluation) {
    if evaluation.is_empty() {
        return;
    }
    config.badges.apply(next, &evaluation);
    deltas.new_badges.extend(evaluation.newly_granted);
}

fn duplicate_submission(state: &ChildProgress, entry: &JournalEntry) -> Transition {
    log::debug!(
        "[JOURNAL] duplicate submission child={} occurred_on={} (ignored)",
        short_id(&state.id),
        entry.occurred_on
    );
    Transition {
        state: state.clone(),
        deltas: ProgressDeltas { journal_duplicate: true, ..ProgressDeltas::default() },
        journal: None,
    }
}

fn finish(
    config: &EngineConfig,
    before: &ChildProgress,
    next: ChildProgress,
    mut deltas: ProgressDeltas,
    journal: Option<JournalEntry>,
) -> Transition {
    deltas.score_gained = next.leadership_score.saturating_sub(before.leadership_score);
    let league_before = config.league.derive(before.leadership_score);
    let league_after = config.league.derive(next.leadership_score);
    if league_before != league_after {
        deltas.league_change = Some((league_before, league_after));
    }
    deltas.state_changed = next != *before;
    Transition { state: next, deltas, journal }
}

// ==================== PERSISTENCE BOUNDARY ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Stored version moved since load; nothing was written
    Conflict,
}

/// Storage for child progress and the journal append log
pub trait ProgressStore {
    fn load(&self, child_id: &str) -> Result<Option<ChildProgress>>;

    /// Fails with ChildExists if the id is taken
    fn insert(&self, progress: ChildProgress) -> Result<()>;

    /// Atomically replace the record if its stored version is still
    /// `expected_version`, appending `journal` in the same step
    fn commit(
        &self,
        expected_version: u64,
        progress: ChildProgress,
        journal: Option<JournalEntry>,
    ) -> Result<CommitOutcome>;

    /// Entries for one child in submission order
    fn journal(&self, child_id: &str) -> Result<Vec<JournalEntry>>;

    /// Whether the child's journal already holds an entry with this identity
    fn contains_entry(&self, child_id: &str, key: &IdentityKey) -> Result<bool> {
        Ok(self.journal(child_id)?.iter().any(|e| e.identity_key() == *key))
    }

    fn append_journal(&self, entries: Vec<JournalEntry>) -> Result<()>;

    /// Drop the record and its journal; UnknownChild if absent
    fn remove(&self, child_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct JournalLog {
    entries: Vec<JournalEntry>,
    next_id: u64,
}

impl JournalLog {
    fn push(&mut self, entry: JournalEntry) {
        self.next_id += 1;
        self.entries.push(JournalEntry { id: self.next_id, ..entry });
    }
}

/// In-process store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    children: Mutex<HashMap<String, ChildProgress>>,
    journal: Mutex<JournalLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| EngineError::Storage("memory store lock poisoned".to_string()))
}

impl ProgressStore for MemoryStore {
    fn load(&self, child_id: &str) -> Result<Option<ChildProgress>> {
        Ok(lock(&self.children)?.get(child_id).cloned())
    }

    fn insert(&self, progress: ChildProgress) -> Result<()> {
        let mut children = lock(&self.children)?;
        if children.contains_key(&progress.id) {
            return Err(EngineError::ChildExists(progress.id));
        }
        children.insert(progress.id.clone(), progress);
        Ok(())
    }

    fn commit(
        &self,
        expected_version: u64,
        progress: ChildProgress,
        journal: Option<JournalEntry>,
    ) -> Result<CommitOutcome> {
        // Lock order: children, then journal
        let mut children = lock(&self.children)?;
        let current = children
            .get(&progress.id)
            .ok_or_else(|| EngineError::UnknownChild(progress.id.clone()))?;
        if current.version != expected_version {
            return Ok(CommitOutcome::Conflict);
        }

        if let Some(entry) = journal {
            lock(&self.journal)?.push(entry);
        }
        children.insert(progress.id.clone(), progress);
        Ok(CommitOutcome::Committed)
    }

    fn journal(&self, child_id: &str) -> Result<Vec<JournalEntry>> {
        Ok(lock(&self.journal)?
            .entries
            .iter()
            .filter(|e| e.child_id == child_id)
            .cloned()
            .collect())
    }

    fn append_journal(&self, entries: Vec<JournalEntry>) -> Result<()> {
        let mut log = lock(&self.journal)?;
        for entry in entries {
            log.push(entry);
        }
        Ok(())
    }

    fn remove(&self, child_id: &str) -> Result<()> {
        let mut children = lock(&self.children)?;
        if children.remove(child_id).is_none() {
            return Err(EngineError::UnknownChild(child_id.to_string()));
        }
        lock(&self.journal)?.entries.retain(|e| e.child_id != child_id);
        Ok(())
    }
}

// ==================== ENGINE ====================

pub struct ProgressionEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S: ProgressStore> ProgressionEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        ProgressionEngine { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn load_existing(&self, child_id: &str) -> Result<ChildProgress> {
        self.store
            .load(child_id)?
            .ok_or_else(|| EngineError::UnknownChild(child_id.to_string()))
    }

    /// Account creation with all-zero defaults
    pub fn create_child(&self, child_id: &str, created_at: Timestamp) -> Result<ChildProgress> {
        let child_id = child_id.trim();
        if child_id.is_empty() {
            return Err(ValidationError::MalformedPayload("child id is empty".into()).into());
        }
        let progress = ChildProgress::new(child_id, created_at);
        self.store.insert(progress.clone())?;
        log::info!("[CHILD] created child={}", short_id(child_id));
        Ok(progress)
    }

    /// Account deletion; the only way progress ever goes away
    pub fn delete_child(&self, child_id: &str) -> Result<()> {
        self.store.remove(child_id)?;
        log::info!("[CHILD] deleted child={}", short_id(child_id));
        Ok(())
    }

    /// Apply one event for one child, retrying on version conflicts.
    /// A journal submission whose identity is already stored is a no-op.
    pub fn record_event(&self, child_id: &str, event: ProgressEvent, occurred_at: DateTime<Utc>) -> Result<Transition> {
        self.commit_loop(child_id, event.kind(), |state| {
            if let ProgressEvent::JournalSubmitted(entry) = &event {
                entry.validate()?;
                // Checked on every attempt so a resend racing the original sees it after a conflict
                if self.store.contains_entry(child_id, &entry.identity_key())? {
                    return Ok(duplicate_submission(state, entry));
                }
            }
            apply_event(&self.config, state, &event, occurred_at)
        })
    }

    pub fn award_badge(&self, child_id: &str, badge_id: &str) -> Result<Transition> {
        self.commit_loop(child_id, "manual_award", |state| apply_badge_award(&self.config, state, badge_id))
    }

    fn commit_loop<F>(&self, child_id: &str, event_kind: &str, compute: F) -> Result<Transition>
    where
        F: Fn(&ChildProgress) -> Result<Transition>,
    {
        let attempts = self.config.max_commit_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self.load_existing(child_id)?;
            let mut transition = compute(&current)?;
            if !transition.deltas.state_changed {
                return Ok(transition);
            }

            transition.state.version = current.version.wrapping_add(1);
            match self.store.commit(current.version, transition.state.clone(), transition.journal.clone())? {
                CommitOutcome::Committed => {
                    log_transition(event_kind, &transition);
                    return Ok(transition);
                }
                CommitOutcome::Conflict => {
                    log::warn!(
                        "[COMMIT] conflict child={} event={} attempt={}/{}",
                        short_id(child_id), event_kind, attempt, attempts
                    );
                }
            }
        }

        log::error!("[COMMIT] giving up child={} event={} attempts={}", short_id(child_id), event_kind, attempts);
        Err(EngineError::ConcurrencyConflict { child_id: child_id.to_string(), attempts })
    }

    pub fn get_progress(&self, child_id: &str) -> Result<ProgressView> {
        let progress = self.load_existing(child_id)?;
        Ok(ProgressView {
            league: self.config.league.derive(progress.leadership_score),
            next_league: self.config.league.next_threshold(progress.leadership_score),
            progress,
        })
    }

    /// Seven day buckets for the week containing `week_start`, plus the trend
    /// across the trailing window ending with that week
    pub fn get_weekly_summary(&self, child_id: &str, week_start: DateKey) -> Result<WeeklySummary> {
        self.load_existing(child_id)?;

        let start = calendar::week_start(week_start)?;
        let window_weeks = self.config.trend_window_weeks.max(1) as i64;
        let range = DateRange::new(start.add_days(-7 * (window_weeks - 1))?, start.add_days(6)?)?;

        let entries = self.store.journal(child_id)?;
        let weekly = journal::aggregate_weekly(journal::aggregate(&entries, range)?, self.config.trend_epsilon)?;
        let days = weekly
            .weeks
            .iter()
            .find(|w| w.week_start == start)
            .map(|w| w.days.clone())
            .unwrap_or_default();

        Ok(WeeklySummary {
            week_start: start,
            days,
            trend: weekly.trend,
            active_weeks: weekly.active_weeks() as u32,
            weeks: weekly.weeks,
        })
    }

    /// Append already-structured legacy entries; no bonuses, badges or counters
    pub fn import_journal(&self, child_id: &str, entries: Vec<JournalEntry>) -> Result<usize> {
        self.load_existing(child_id)?;
        for entry in &entries {
            entry.validate()?;
        }
        let count = entries.len();
        let entries = entries
            .into_iter()
            .map(|e| JournalEntry { id: 0, child_id: child_id.to_string(), ..e })
            .collect();
        self.store.append_journal(entries)?;
        log::info!("[JOURNAL] imported child={} entries={}", short_id(child_id), count);
        Ok(count)
    }
}

/// One wide event per committed transition
fn log_transition(event_kind: &str, transition: &Transition) {
    let state = &transition.state;
    let deltas = &transition.deltas;
    let child = short_id(&state.id);

    if let Some(streak) = deltas.streak {
        log::info!(
            "[STREAK] child={} event={} streak={}->{} best={}",
            child, streak.event.as_str(), streak.from, streak.to, state.best_streak
        );
    }
    if let Some(kind) = deltas.first_task_completed {
        log::info!("[TASK] first completion child={} task={}", child, kind.as_str());
    }
    for badge in &deltas.new_badges {
        log::info!("[BADGE] granted child={} badge={}", child, badge);
    }
    if let Some((from, to)) = deltas.league_change {
        log::info!("[LEAGUE] child={} from={} to={} score={}", child, from.as_str(), to.as_str(), state.leadership_score);
    }
    log::info!(
        "[COMMIT] child={} event={} version={} score={} gained={} badges={} journal={}",
        child, event_kind, state.version, state.leadership_score, deltas.score_gained,
        state.unlocked_badges.len(), deltas.journal_appended
    );
}
