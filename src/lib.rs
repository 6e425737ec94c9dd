use spacetimedb::{reducer, table, Identity, ReducerContext, SpacetimeType, Table, Timestamp};

pub mod badges;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod journal_text;
pub mod league;
pub mod streak;

// Import bulk restore reducers for disaster recovery
mod restore;

use calendar::DateKey;
use config::EngineConfig;
use engine::{CommitOutcome, ProgressEvent, ProgressStore, ProgressionEngine, Transition};
use error::EngineError;
use journal::{TimeOfDay, Trend};
use league::League;
use streak::StreakEvent;

// ==================== CONSTANTS ====================

/// Singleton row id for the engine_config table
const ENGINE_CONFIG_ID: u8 = 0;

/// Upper bound accepted by set_max_commit_attempts
const MAX_COMMIT_ATTEMPTS_LIMIT: u32 = 20;

// ==================== SHARED TYPES ====================

/// Activities that carry a one-time "first completion" bonus
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Avatar,
    AngerThermometer,
    HiToAnger,
    KnowYourAnger,
    Journal,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Avatar,
        TaskKind::AngerThermometer,
        TaskKind::HiToAnger,
        TaskKind::KnowYourAnger,
        TaskKind::Journal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Avatar => "avatar",
            TaskKind::AngerThermometer => "anger_thermometer",
            TaskKind::HiToAnger => "hi_to_anger",
            TaskKind::KnowYourAnger => "know_your_anger",
            TaskKind::Journal => "journal",
        }
    }
}

/// One flag per task kind; each flips to true exactly once
#[derive(SpacetimeType, Debug, Clone, Default, PartialEq, Eq)]
pub struct FirstTaskFlags {
    pub avatar: bool,
    pub anger_thermometer: bool,
    pub hi_to_anger: bool,
    pub know_your_anger: bool,
    pub journal: bool,
}

impl FirstTaskFlags {
    pub fn get(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::Avatar => self.avatar,
            TaskKind::AngerThermometer => self.anger_thermometer,
            TaskKind::HiToAnger => self.hi_to_anger,
            TaskKind::KnowYourAnger => self.know_your_anger,
            TaskKind::Journal => self.journal,
        }
    }

    /// Set the flag; returns true only if this call flipped it
    pub fn mark(&mut self, kind: TaskKind) -> bool {
        let flag = match kind {
            TaskKind::Avatar => &mut self.avatar,
            TaskKind::AngerThermometer => &mut self.anger_thermometer,
            TaskKind::HiToAnger => &mut self.hi_to_anger,
            TaskKind::KnowYourAnger => &mut self.know_your_anger,
            TaskKind::Journal => &mut self.journal,
        };
        let flipped = !*flag;
        *flag = true;
        flipped
    }

    pub fn all_done(&self) -> bool {
        TaskKind::ALL.iter().all(|kind| self.get(*kind))
    }
}

/// Counters that feed counter-based badge rules
#[derive(SpacetimeType, Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityCounters {
    /// Distinct login days
    pub logins: u32,
    /// Accepted journal submissions
    pub journal_entries: u32,
}

// ==================== TABLES ====================

/// Progression state for one learner
/// PRIVATE: only reducers read and write it; league is derived, never stored
#[table(name = child_progress)]
#[derive(Debug, Clone, PartialEq)]
pub struct ChildProgress {
    #[primary_key]
    pub id: String,

    /// None only before the first login
    pub last_login_day: Option<DateKey>,

    /// Consecutive login days, including today once logged in
    pub current_streak: u32,

    /// High-water mark of current_streak
    pub best_streak: u32,

    /// Only ever increases
    pub leadership_score: u64,

    /// Append-only, no duplicates
    pub unlocked_badges: Vec<String>,

    pub first_tasks: FirstTaskFlags,

    pub received_first_login_bonus: bool,

    pub counters: ActivityCounters,

    /// Optimistic concurrency token, bumped on every committed transition
    pub version: u64,

    pub created_at: Timestamp,
}

impl ChildProgress {
    /// Fresh record with all-zero/false defaults
    pub fn new(id: impl Into<String>, created_at: Timestamp) -> Self {
        ChildProgress {
            id: id.into(),
            last_login_day: None,
            current_streak: 0,
            best_streak: 0,
            leadership_score: 0,
            unlocked_badges: Vec::new(),
            first_tasks: FirstTaskFlags::default(),
            received_first_login_bonus: false,
            counters: ActivityCounters::default(),
            version: 0,
            created_at,
        }
    }

    pub fn has_badge(&self, badge_id: &str) -> bool {
        self.unlocked_badges.iter().any(|b| b == badge_id)
    }
}

/// Journal entries, append-only
/// PRIVATE: free text from children never leaves the module; summaries carry aggregates only
#[table(name = journal_entry)]
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub child_id: String,

    pub occurred_on: DateKey,

    pub time_of_day: TimeOfDay,

    /// Non-empty, in the order the child picked them
    pub emotions: Vec<String>,

    /// 1..=5
    pub intensity: u8,

    pub trigger: String,

    pub coping_description: String,

    pub improvement_note: String,

    /// True creation time when known; None for entries recovered from text blobs
    pub created_at_micros: Option<i64>,
}

/// One row per committed transition, written in the same transaction as the state
/// Client UI subscribes for celebration toasts
#[table(name = progress_delta, public)]
pub struct ProgressDelta {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub child_id: String,

    pub recorded_at: Timestamp,

    /// login | activity_complete | journal_submitted | avatar_created | manual_award
    pub event_kind: String,

    pub streak_event: Option<StreakEvent>,

    pub current_streak: u32,

    pub best_streak: u32,

    pub first_task: Option<TaskKind>,

    pub new_badges: Vec<String>,

    pub score_gained: u64,

    pub leadership_score: u64,

    pub league_before: League,

    pub league_after: League,
}

/// Day rows of the most recently refreshed weekly summary per child (derived, rebuilt on refresh)
#[table(name = weekly_summary_day, public)]
pub struct WeeklySummaryDay {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub child_id: String,

    pub week_start: DateKey,

    pub date: DateKey,

    pub entry_count: u32,

    /// 0 when the day has no entries
    pub average_intensity: f32,

    pub dominant_emotion: Option<String>,
}

/// Trend header of the most recently refreshed weekly summary per child
#[table(name = weekly_summary, public)]
pub struct WeeklySummaryRow {
    #[primary_key]
    pub child_id: String,

    pub week_start: DateKey,

    pub trend: Trend,

    /// Weeks in the trailing trend window that had at least one entry
    pub active_weeks: u32,

    pub refreshed_at: Timestamp,
}

/// Runtime-tunable engine settings (singleton row, id 0)
#[table(name = engine_config)]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    #[primary_key]
    pub id: u8,

    /// Minutes east of UTC where a calendar day starts (0 = UTC midnight)
    pub day_boundary_offset_minutes: i32,

    /// Load-compute-commit attempts before giving up with a conflict
    pub max_commit_attempts: u32,

    pub updated_at: Timestamp,
}

/// Authorized identities that can call reducers (the CRUD gateway and the module owner)
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

// ==================== STORE ====================

/// ProgressStore over the module tables
/// Each reducer runs as one serializable transaction, so the version check
/// here never loses in practice; it still guards the invariant.
pub struct TableStore<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> TableStore<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        TableStore { ctx }
    }
}

impl ProgressStore for TableStore<'_> {
    fn load(&self, child_id: &str) -> error::Result<Option<ChildProgress>> {
        Ok(self.ctx.db.child_progress().id().find(&child_id.to_string()))
    }

    fn insert(&self, progress: ChildProgress) -> error::Result<()> {
        if self.ctx.db.child_progress().id().find(&progress.id).is_some() {
            return Err(EngineError::ChildExists(progress.id));
        }
        self.ctx.db.child_progress().insert(progress);
        Ok(())
    }

    fn commit(
        &self,
        expected_version: u64,
        progress: ChildProgress,
        journal: Option<JournalEntry>,
    ) -> error::Result<CommitOutcome> {
        let current = self.ctx.db.child_progress()
            .id()
            .find(&progress.id)
            .ok_or_else(|| EngineError::UnknownChild(progress.id.clone()))?;
        if current.version != expected_version {
            return Ok(CommitOutcome::Conflict);
        }

        self.ctx.db.child_progress().id().update(progress);
        if let Some(entry) = journal {
            self.ctx.db.journal_entry().insert(JournalEntry { id: 0, ..entry }); // auto_inc
        }
        Ok(CommitOutcome::Committed)
    }

    fn journal(&self, child_id: &str) -> error::Result<Vec<JournalEntry>> {
        // Row ids are auto_inc, so id order is submission order
        let mut entries: Vec<_> = self.ctx.db.journal_entry()
            .child_id()
            .filter(&child_id.to_string())
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    fn append_journal(&self, entries: Vec<JournalEntry>) -> error::Result<()> {
        for entry in entries {
            self.ctx.db.journal_entry().insert(JournalEntry { id: 0, ..entry });
        }
        Ok(())
    }

    fn remove(&self, child_id: &str) -> error::Result<()> {
        let child_id = child_id.to_string();
        if !self.ctx.db.child_progress().id().delete(&child_id) {
            return Err(EngineError::UnknownChild(child_id));
        }

        let entry_ids: Vec<u64> = self.ctx.db.journal_entry()
            .child_id()
            .filter(&child_id)
            .map(|e| e.id)
            .collect();
        for id in entry_ids {
            self.ctx.db.journal_entry().id().delete(&id);
        }
        Ok(())
    }
}

// ==================== HELPER FUNCTIONS ====================

/// Reject callers that are not authorized workers
fn require_worker(ctx: &ReducerContext, action: &str) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized {} attempt by {}", action, ctx.sender);
        return Err("Unauthorized".to_string());
    }
    Ok(())
}

/// Current engine config: compiled defaults overlaid with the engine_config row
fn load_config(ctx: &ReducerContext) -> Result<EngineConfig, String> {
    match ctx.db.engine_config().id().find(&ENGINE_CONFIG_ID) {
        Some(settings) => EngineConfig::from_settings(&settings).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn engine_for(ctx: &ReducerContext) -> Result<ProgressionEngine<TableStore<'_>>, String> {
    Ok(ProgressionEngine::new(TableStore::new(ctx), load_config(ctx)?))
}

/// Truncated id for log lines
fn short_id(id: &str) -> &str {
    &id[..id.char_indices().nth(8).map(|(i, _)| i).unwrap_or(id.len())]
}

/// Persist the delta row for a committed transition
fn record_delta(ctx: &ReducerContext, config: &EngineConfig, event_kind: &str, transition: &Transition) {
    if !transition.deltas.state_changed {
        return;
    }
    let state = &transition.state;
    let deltas = &transition.deltas;
    let league_after = config.league.derive(state.leadership_score);
    let league_before = deltas.league_change.map(|(before, _)| before).unwrap_or(league_after);

    ctx.db.progress_delta().insert(ProgressDelta {
        id: 0, // auto_inc
        child_id: state.id.clone(),
        recorded_at: ctx.timestamp,
        event_kind: event_kind.to_string(),
        streak_event: deltas.streak.as_ref().map(|s| s.event),
        current_streak: state.current_streak,
        best_streak: state.best_streak,
        first_task: deltas.first_task_completed,
        new_badges: deltas.new_badges.clone(),
        score_gained: deltas.score_gained,
        leadership_score: state.leadership_score,
        league_before,
        league_after,
    });
}

/// Flatten an engine error for the reducer boundary
fn reducer_error(err: EngineError) -> String {
    if err.is_retryable() {
        log::warn!("[COMMIT] retryable failure: {}", err);
    }
    err.to_string()
}

/// Entry as submit_journal_entry stores it. The client's creation time is the
/// identity, so a resent submission dedups; without one the headline is used.
#[allow(clippy::too_many_arguments)]
pub fn journal_submission(
    child_id: &str,
    occurred_on: DateKey,
    time_of_day: TimeOfDay,
    emotions: Vec<String>,
    intensity: u8,
    trigger: String,
    coping_description: String,
    improvement_note: String,
    client_created_at_micros: Option<i64>,
) -> JournalEntry {
    JournalEntry {
        id: 0,
        child_id: child_id.to_string(),
        occurred_on,
        time_of_day,
        emotions,
        intensity,
        trigger,
        coping_description,
        improvement_note,
        created_at_micros: client_created_at_micros,
    }
}

/// Run one event through the engine and persist its delta row
fn record(ctx: &ReducerContext, child_id: &str, event: ProgressEvent) -> Result<(), String> {
    let engine = engine_for(ctx)?;
    let occurred_at = calendar::instant_from_micros(ctx.timestamp.to_micros_since_unix_epoch())
        .map_err(|e| e.to_string())?;
    let event_kind = event.kind();

    let transition = engine
        .record_event(child_id, event, occurred_at)
        .map_err(reducer_error)?;
    record_delta(ctx, engine.config(), event_kind, &transition);
    Ok(())
}

// ==================== REDUCERS ====================

/// Initialize module - authorize the owner and seed default settings
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    // Avoid clobbering tuned settings on republish
    if ctx.db.engine_config().id().find(&ENGINE_CONFIG_ID).is_none() {
        let defaults = EngineConfig::default();
        ctx.db.engine_config().insert(EngineSettings {
            id: ENGINE_CONFIG_ID,
            day_boundary_offset_minutes: defaults.day_boundary.offset_minutes(),
            max_commit_attempts: defaults.max_commit_attempts,
            updated_at: ctx.timestamp,
        });
    }

    log::info!("Progression module initialized successfully");
}

/// Grant worker access to another identity (e.g. the gateway)
#[reducer]
pub fn authorize_worker(ctx: &ReducerContext, identity_hex: String) -> Result<(), String> {
    require_worker(ctx, "authorize_worker")?;
    let identity = Identity::from_hex(&identity_hex)
        .map_err(|e| format!("Invalid identity hex string: {}", e))?;
    if ctx.db.authorized_worker().identity().find(&identity).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker { identity });
        log::info!("[CONFIG] authorized worker {}", short_id(&identity_hex));
    }
    Ok(())
}

/// Account creation: fresh all-zero progress record
#[reducer]
pub fn create_child(ctx: &ReducerContext, child_id: String) -> Result<(), String> {
    require_worker(ctx, "create_child")?;
    engine_for(ctx)?
        .create_child(&child_id, ctx.timestamp)
        .map(|_| ())
        .map_err(reducer_error)
}

/// Account deletion: removes progress and journal; delta and summary rows go too
#[reducer]
pub fn delete_child(ctx: &ReducerContext, child_id: String) -> Result<(), String> {
    require_worker(ctx, "delete_child")?;
    engine_for(ctx)?.delete_child(&child_id).map_err(reducer_error)?;

    let delta_ids: Vec<u64> = ctx.db.progress_delta()
        .child_id()
        .filter(&child_id)
        .map(|d| d.id)
        .collect();
    for id in delta_ids {
        ctx.db.progress_delta().id().delete(&id);
    }
    clear_weekly_summary(ctx, &child_id);
    Ok(())
}

#[reducer]
pub fn record_login(ctx: &ReducerContext, child_id: String) -> Result<(), String> {
    require_worker(ctx, "record_login")?;
    record(ctx, &child_id, ProgressEvent::Login)
}

#[reducer]
pub fn complete_activity(ctx: &ReducerContext, child_id: String, kind: TaskKind) -> Result<(), String> {
    require_worker(ctx, "complete_activity")?;
    record(ctx, &child_id, ProgressEvent::ActivityComplete(kind))
}

#[reducer]
pub fn create_avatar(ctx: &ReducerContext, child_id: String) -> Result<(), String> {
    require_worker(ctx, "create_avatar")?;
    record(ctx, &child_id, ProgressEvent::AvatarCreated)
}

/// Journal submission: appends the entry and counts as the journal activity
/// A resend with the same identity is accepted as a no-op
#[reducer]
#[allow(clippy::too_many_arguments)]
pub fn submit_journal_entry(
    ctx: &ReducerContext,
    child_id: String,
    occurred_on: DateKey,
    time_of_day: TimeOfDay,
    emotions: Vec<String>,
    intensity: u8,
    trigger: String,
    coping_description: String,
    improvement_note: String,
    client_created_at_micros: Option<i64>,
) -> Result<(), String> {
    require_worker(ctx, "submit_journal_entry")?;
    let entry = journal_submission(
        &child_id,
        occurred_on,
        time_of_day,
        emotions,
        intensity,
        trigger,
        coping_description,
        improvement_note,
        client_created_at_micros,
    );
    record(ctx, &child_id, ProgressEvent::JournalSubmitted(entry))
}

/// Staff award of a specific badge; unknown ids are rejected
#[reducer]
pub fn award_badge(ctx: &ReducerContext, child_id: String, badge_id: String) -> Result<(), String> {
    require_worker(ctx, "award_badge")?;
    let engine = engine_for(ctx)?;
    let transition = engine
        .award_badge(&child_id, &badge_id)
        .map_err(reducer_error)?;
    record_delta(ctx, engine.config(), "manual_award", &transition);
    Ok(())
}

/// Import entries from the legacy text-blob format (no progression effects)
#[reducer]
pub fn import_journal_text(ctx: &ReducerContext, child_id: String, text: String) -> Result<(), String> {
    require_worker(ctx, "import_journal_text")?;
    let entries = journal_text::parse_journal_text(&child_id, &text).map_err(|e| e.to_string())?;
    engine_for(ctx)?
        .import_journal(&child_id, entries)
        .map(|_| ())
        .map_err(reducer_error)
}

fn clear_weekly_summary(ctx: &ReducerContext, child_id: &String) {
    let day_ids: Vec<u64> = ctx.db.weekly_summary_day()
        .child_id()
        .filter(child_id)
        .map(|d| d.id)
        .collect();
    for id in day_ids {
        ctx.db.weekly_summary_day().id().delete(&id);
    }
    ctx.db.weekly_summary().child_id().delete(child_id);
}

/// Rebuild the parent-facing weekly summary read model for one child
#[reducer]
pub fn refresh_weekly_summary(ctx: &ReducerContext, child_id: String, week_start: DateKey) -> Result<(), String> {
    require_worker(ctx, "refresh_weekly_summary")?;
    let summary = engine_for(ctx)?
        .get_weekly_summary(&child_id, week_start)
        .map_err(reducer_error)?;

    clear_weekly_summary(ctx, &child_id);
    for bucket in &summary.days {
        ctx.db.weekly_summary_day().insert(WeeklySummaryDay {
            id: 0, // auto_inc
            child_id: child_id.clone(),
            week_start: summary.week_start,
            date: bucket.date,
            entry_count: bucket.entries.len() as u32,
            average_intensity: bucket.average_intensity,
            dominant_emotion: bucket.dominant_emotion.clone(),
        });
    }
    ctx.db.weekly_summary().insert(WeeklySummaryRow {
        child_id: child_id.clone(),
        week_start: summary.week_start,
        trend: summary.trend,
        active_weeks: summary.active_weeks,
        refreshed_at: ctx.timestamp,
    });

    log::info!("[JOURNAL] summary child={} week={} trend={} active_weeks={}",
        short_id(&child_id), summary.week_start, summary.trend.as_str(), summary.active_weeks);
    Ok(())
}

fn update_settings(ctx: &ReducerContext, apply: impl FnOnce(&mut EngineSettings)) -> Result<EngineSettings, String> {
    let defaults = EngineConfig::default();
    let mut settings = ctx.db.engine_config().id().find(&ENGINE_CONFIG_ID).unwrap_or(EngineSettings {
        id: ENGINE_CONFIG_ID,
        day_boundary_offset_minutes: defaults.day_boundary.offset_minutes(),
        max_commit_attempts: defaults.max_commit_attempts,
        updated_at: ctx.timestamp,
    });
    apply(&mut settings);
    settings.updated_at = ctx.timestamp;

    // Reject anything the engine would refuse to load
    EngineConfig::from_settings(&settings).map_err(|e| e.to_string())?;

    if ctx.db.engine_config().id().find(&ENGINE_CONFIG_ID).is_some() {
        ctx.db.engine_config().id().update(settings.clone());
    } else {
        ctx.db.engine_config().insert(settings.clone());
    }
    Ok(settings)
}

/// Move the calendar-day boundary (minutes east of UTC)
/// Applies to every later computation; already-stored day keys are not rewritten
#[reducer]
pub fn set_day_boundary(ctx: &ReducerContext, offset_minutes: i32) -> Result<(), String> {
    require_worker(ctx, "set_day_boundary")?;
    let settings = update_settings(ctx, |s| s.day_boundary_offset_minutes = offset_minutes)?;
    log::info!("[CONFIG] day boundary offset={}min", settings.day_boundary_offset_minutes);
    Ok(())
}

#[reducer]
pub fn set_max_commit_attempts(ctx: &ReducerContext, attempts: u32) -> Result<(), String> {
    require_worker(ctx, "set_max_commit_attempts")?;
    if attempts == 0 || attempts > MAX_COMMIT_ATTEMPTS_LIMIT {
        return Err(format!("attempts must be within 1..={}", MAX_COMMIT_ATTEMPTS_LIMIT));
    }
    let settings = update_settings(ctx, |s| s.max_commit_attempts = attempts)?;
    log::info!("[CONFIG] max commit attempts={}", settings.max_commit_attempts);
    Ok(())
}
