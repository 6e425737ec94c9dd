// End-to-end progression scenarios over the in-memory store.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, TimeZone, Utc};
use spacetimedb::Timestamp;

use progression_module::calendar::{DateKey, DayBoundary};
use progression_module::config::EngineConfig;
use progression_module::engine::{MemoryStore, ProgressEvent, ProgressStore, ProgressionEngine};
use progression_module::error::{EngineError, ValidationError};
use progression_module::journal::{TimeOfDay, Trend};
use progression_module::journal_text::parse_journal_text;
use progression_module::league::League;
use progression_module::streak::StreakEvent;
use progression_module::{journal_submission, JournalEntry, TaskKind};

const CHILD: &str = "c0ffee00-kid";

fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 15, 0, 0).unwrap()
}

fn key(y: i32, m: u8, d: u8) -> DateKey {
    DateKey::new(y, m, d).unwrap()
}

fn engine() -> ProgressionEngine<MemoryStore> {
    engine_with(EngineConfig::default())
}

fn engine_with(config: EngineConfig) -> ProgressionEngine<MemoryStore> {
    let engine = ProgressionEngine::new(MemoryStore::new(), config);
    engine.create_child(CHILD, Timestamp::from_micros_since_unix_epoch(0)).unwrap();
    engine
}

fn journal(on: DateKey, emotion: &str, intensity: u8, created: i64) -> JournalEntry {
    JournalEntry {
        id: 0,
        child_id: CHILD.to_string(),
        occurred_on: on,
        time_of_day: TimeOfDay::Evening,
        emotions: vec![emotion.to_string()],
        intensity,
        trigger: "bedtime".to_string(),
        coping_description: "hugged my teddy".to_string(),
        improvement_note: String::new(),
        created_at_micros: Some(created),
    }
}

#[test]
fn test_login_sequences() {
    // (login days, expected current, expected best, expected score, description)
    let cases: Vec<(Vec<(i32, u32, u32)>, u32, u32, u64, &str)> = vec![
        (vec![(2024, 1, 1)], 1, 1, 150, "first login: 100 bonus + 50 best streak"),
        (vec![(2024, 1, 1), (2024, 1, 1)], 1, 1, 150, "same day twice is idempotent"),
        (vec![(2024, 1, 1), (2024, 1, 2)], 2, 2, 200, "next day continues"),
        (vec![(2024, 1, 1), (2024, 1, 2), (2024, 1, 4)], 1, 2, 200, "gap breaks, best stays"),
        (vec![(2024, 1, 1), (2024, 1, 2), (2024, 1, 3)], 3, 3, 350, "three days earns streak_3"),
        (vec![(2024, 1, 1), (2024, 1, 3), (2024, 1, 4), (2024, 1, 5)], 3, 3, 350, "rebuilt streak beats old best"),
        (vec![(2024, 1, 31), (2024, 2, 1)], 2, 2, 200, "month boundary continues"),
        (vec![(2023, 12, 31), (2024, 1, 1)], 2, 2, 200, "year boundary continues"),
        (vec![(2024, 1, 5), (2024, 1, 3)], 1, 1, 150, "backdated login ignored"),
    ];

    for (logins, current, best, score, description) in cases {
        let engine = engine();
        for (y, m, d) in &logins {
            engine.record_event(CHILD, ProgressEvent::Login, day(*y, *m, *d)).unwrap();
        }
        let view = engine.get_progress(CHILD).unwrap();
        assert_eq!(view.progress.current_streak, current, "{}", description);
        assert_eq!(view.progress.best_streak, best, "{}", description);
        assert_eq!(view.progress.leadership_score, score, "{}", description);
    }
}

#[test]
fn test_broken_streak_reports_event() {
    let engine = engine();
    engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 1)).unwrap();
    engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 2)).unwrap();
    let t = engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 4)).unwrap();

    let streak = t.deltas.streak.unwrap();
    assert_eq!(streak.event, StreakEvent::Broken);
    assert_eq!((streak.from, streak.to), (2, 1));
    assert_eq!(t.deltas.best_streak_raised_to, None);
    assert_eq!(t.deltas.score_gained, 0);
    assert_eq!(t.state.last_login_day, Some(key(2024, 1, 4)));
}

#[test]
fn test_same_day_replay_does_not_bump_version() {
    let engine = engine();
    engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 1)).unwrap();
    let version = engine.get_progress(CHILD).unwrap().progress.version;

    let t = engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 1)).unwrap();
    assert!(!t.deltas.state_changed);
    assert_eq!(engine.get_progress(CHILD).unwrap().progress.version, version);
}

#[test]
fn test_day_boundary_offset() {
    let config = EngineConfig { day_boundary: DayBoundary::new(-8 * 60).unwrap(), ..EngineConfig::default() };
    let engine = engine_with(config);

    // 06:00 UTC on Jan 2 is still Jan 1 at UTC-8
    engine
        .record_event(CHILD, ProgressEvent::Login, Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap())
        .unwrap();
    let t = engine
        .record_event(CHILD, ProgressEvent::Login, Utc.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).unwrap())
        .unwrap();

    assert_eq!(t.deltas.streak.map(|s| s.event), Some(StreakEvent::Continued));
    assert_eq!(t.state.last_login_day, Some(key(2024, 1, 2)));
    assert_eq!(t.state.current_streak, 2);
}

#[test]
fn test_first_task_bonus_reaches_badge_and_league() {
    let engine = engine();
    // 150 login + 4 first tasks at 150 = 750 -> silver
    engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 1)).unwrap();
    engine.record_event(CHILD, ProgressEvent::AvatarCreated, day(2024, 1, 1)).unwrap();
    engine.record_event(CHILD, ProgressEvent::ActivityComplete(TaskKind::AngerThermometer), day(2024, 1, 1)).unwrap();
    engine.record_event(CHILD, ProgressEvent::ActivityComplete(TaskKind::HiToAnger), day(2024, 1, 1)).unwrap();
    let t = engine
        .record_event(CHILD, ProgressEvent::ActivityComplete(TaskKind::KnowYourAnger), day(2024, 1, 1))
        .unwrap();
    assert_eq!(t.state.leadership_score, 750);
    assert_eq!(t.deltas.league_change, Some((League::Bronze, League::Silver)));

    // Journal completes every first task: +150 -> 900, explorer +300 -> 1200, score_1000 +250 -> 1450
    let t = engine
        .record_event(CHILD, ProgressEvent::JournalSubmitted(journal(key(2024, 1, 1), "proud", 1, 10)), day(2024, 1, 1))
        .unwrap();
    assert_eq!(t.deltas.new_badges, vec!["explorer".to_string(), "score_1000".to_string()]);
    assert_eq!(t.state.leadership_score, 1_450);
    assert_eq!(t.deltas.score_gained, 700);

    let view = engine.get_progress(CHILD).unwrap();
    assert_eq!(view.league, League::Silver);
    assert_eq!(view.next_league, Some((League::Gold, 5_000)));
}

#[test]
fn test_activity_replay_is_noop() {
    let engine = engine();
    let event = ProgressEvent::ActivityComplete(TaskKind::HiToAnger);
    engine.record_event(CHILD, event.clone(), day(2024, 1, 1)).unwrap();
    let before = engine.get_progress(CHILD).unwrap().progress;

    let t = engine.record_event(CHILD, event, day(2024, 1, 9)).unwrap();
    assert!(!t.deltas.state_changed);
    assert_eq!(engine.get_progress(CHILD).unwrap().progress, before);
}

#[test]
fn test_invalid_journal_leaves_state_untouched() {
    let engine = engine();
    let before = engine.get_progress(CHILD).unwrap().progress;

    let err = engine
        .record_event(CHILD, ProgressEvent::JournalSubmitted(journal(key(2024, 1, 1), "angry", 0, 1)), day(2024, 1, 1))
        .unwrap_err();
    assert_eq!(err, EngineError::Validation(ValidationError::IntensityOutOfRange(0)));
    assert_eq!(engine.get_progress(CHILD).unwrap().progress, before);
    assert!(engine.store().journal(CHILD).unwrap().is_empty());
}

#[test]
fn test_manual_award() {
    let engine = engine();
    let t = engine.award_badge(CHILD, "journal_5").unwrap();
    assert_eq!(t.deltas.new_badges, vec!["journal_5".to_string()]);
    assert_eq!(t.state.leadership_score, 200);

    assert_eq!(
        engine.award_badge(CHILD, "not_a_badge").unwrap_err(),
        EngineError::Validation(ValidationError::UnknownBadge("not_a_badge".into()))
    );
    assert_eq!(engine.get_progress(CHILD).unwrap().progress.leadership_score, 200);
}

#[test]
fn test_concurrent_events_are_all_applied() {
    let engine = Arc::new(engine());
    let events = vec![
        ProgressEvent::Login,
        ProgressEvent::AvatarCreated,
        ProgressEvent::ActivityComplete(TaskKind::HiToAnger),
        ProgressEvent::JournalSubmitted(journal(key(2024, 1, 1), "calm", 2, 42)),
    ];

    let handles: Vec<_> = events
        .into_iter()
        .map(|event| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.record_event(CHILD, event, day(2024, 1, 1)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let progress = engine.get_progress(CHILD).unwrap().progress;
    // login 150 + three first tasks at 150
    assert_eq!(progress.leadership_score, 600);
    assert_eq!(progress.version, 4);
    assert_eq!(progress.counters.logins, 1);
    assert_eq!(progress.counters.journal_entries, 1);
    assert!(progress.first_tasks.avatar && progress.first_tasks.hi_to_anger && progress.first_tasks.journal);
}

#[test]
fn test_concurrent_same_day_logins_count_once() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 1)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let progress = engine.get_progress(CHILD).unwrap().progress;
    assert_eq!(progress.current_streak, 1);
    assert_eq!(progress.leadership_score, 150);
    assert_eq!(progress.counters.logins, 1);
}

#[test]
fn test_weekly_summary_trend() {
    let engine = engine();
    let entries = [
        (key(2023, 12, 18), 5, 1),
        (key(2023, 12, 26), 4, 2),
        (key(2024, 1, 2), 3, 3),
        (key(2024, 1, 8), 2, 4),
        (key(2024, 1, 8), 2, 5),
    ];
    for (on, intensity, created) in entries {
        engine
            .record_event(CHILD, ProgressEvent::JournalSubmitted(journal(on, "angry", intensity, created)), day(2024, 1, 8))
            .unwrap();
    }

    // Wednesday normalises to the Sunday before it
    let summary = engine.get_weekly_summary(CHILD, key(2024, 1, 10)).unwrap();
    assert_eq!(summary.week_start, key(2024, 1, 7));
    assert_eq!(summary.days.len(), 7);
    assert_eq!(summary.days[1].date, key(2024, 1, 8));
    assert_eq!(summary.days[1].entries.len(), 2);
    assert_eq!(summary.days[1].average_intensity, 2.0);
    assert_eq!(summary.days[1].dominant_emotion.as_deref(), Some("angry"));
    assert_eq!(summary.weeks.len(), 4);
    assert_eq!(summary.active_weeks, 4);
    assert_eq!(summary.trend, Trend::Improving);
}

#[test]
fn test_weekly_summary_single_week_is_insufficient() {
    let engine = engine();
    engine
        .record_event(CHILD, ProgressEvent::JournalSubmitted(journal(key(2024, 1, 9), "sad", 3, 7)), day(2024, 1, 9))
        .unwrap();

    let summary = engine.get_weekly_summary(CHILD, key(2024, 1, 7)).unwrap();
    assert_eq!(summary.trend, Trend::InsufficientData);
    assert_eq!(summary.active_weeks, 1);
    assert_eq!(summary.days.iter().map(|d| d.entries.len()).sum::<usize>(), 1);
}

#[test]
fn test_imported_blob_is_counted_once() {
    let engine = engine();
    let blob = "date: 2024-01-09\ntime: night\nemotions: scared\nintensity: 4\ntrigger: thunder\n";

    // Imported twice, e.g. a migration retried after a timeout
    for _ in 0..2 {
        let entries = parse_journal_text(CHILD, blob).unwrap();
        assert_eq!(engine.import_journal(CHILD, entries).unwrap(), 1);
    }

    let summary = engine.get_weekly_summary(CHILD, key(2024, 1, 7)).unwrap();
    assert_eq!(summary.days.iter().map(|d| d.entries.len()).sum::<usize>(), 1);

    // Imports carry no progression effects
    let progress = engine.get_progress(CHILD).unwrap().progress;
    assert_eq!(progress.counters.journal_entries, 0);
    assert_eq!(progress.leadership_score, 0);
}

#[test]
fn test_delete_child_removes_everything() {
    let engine = engine();
    engine
        .record_event(CHILD, ProgressEvent::JournalSubmitted(journal(key(2024, 1, 9), "sad", 3, 7)), day(2024, 1, 9))
        .unwrap();
    engine.delete_child(CHILD).unwrap();

    assert_eq!(engine.get_progress(CHILD).unwrap_err(), EngineError::UnknownChild(CHILD.into()));
    assert!(engine.get_weekly_summary(CHILD, key(2024, 1, 7)).is_err());
    assert!(engine.store().journal(CHILD).unwrap().is_empty());
}

/// Entry built the way the submit_journal_entry reducer builds it
fn submitted(client_created_at_micros: Option<i64>) -> ProgressEvent {
    ProgressEvent::JournalSubmitted(journal_submission(
        CHILD,
        key(2024, 1, 9),
        TimeOfDay::Afternoon,
        vec!["Frustrated".to_string()],
        3,
        "lost at cards".to_string(),
        "walked away".to_string(),
        "say how I feel".to_string(),
        client_created_at_micros,
    ))
}

#[test]
fn test_resent_submission_counts_once() {
    // (client creation time, description)
    let cases = vec![
        (Some(1_704_800_000_000_000), "client timestamp identity"),
        (None, "headline identity"),
    ];

    for (created, description) in cases {
        let engine = engine();
        for _ in 0..5 {
            engine.record_event(CHILD, submitted(created), day(2024, 1, 9)).unwrap();
        }

        let progress = engine.get_progress(CHILD).unwrap().progress;
        assert_eq!(progress.counters.journal_entries, 1, "{}", description);
        assert!(!progress.has_badge("journal_5"), "{}", description);
        assert_eq!(progress.leadership_score, 150, "{}", description);
        assert_eq!(engine.store().journal(CHILD).unwrap().len(), 1, "{}", description);

        let summary = engine.get_weekly_summary(CHILD, key(2024, 1, 7)).unwrap();
        assert_eq!(summary.days.iter().map(|d| d.entries.len()).sum::<usize>(), 1, "{}", description);
    }
}

#[test]
fn test_distinct_submissions_all_count() {
    let engine = engine();
    for i in 0..5 {
        engine.record_event(CHILD, submitted(Some(1_000 + i)), day(2024, 1, 9)).unwrap();
    }
    let progress = engine.get_progress(CHILD).unwrap().progress;
    assert_eq!(progress.counters.journal_entries, 5);
    assert!(progress.has_badge("journal_5"));
}

#[test]
fn test_concurrent_resends_count_once() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.record_event(CHILD, submitted(Some(77)), day(2024, 1, 9)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(engine.store().journal(CHILD).unwrap().len(), 1);
    assert_eq!(engine.get_progress(CHILD).unwrap().progress.counters.journal_entries, 1);
}

#[test]
fn test_backdated_login_reports_clock_anomaly() {
    let engine = engine();
    engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 5)).unwrap();
    let before = engine.get_progress(CHILD).unwrap().progress;

    let t = engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 3)).unwrap();
    assert!(t.deltas.clock_anomaly);
    assert_eq!(t.deltas.streak.map(|s| s.event), Some(StreakEvent::SameDay));
    assert!(!t.deltas.state_changed);
    assert_eq!(engine.get_progress(CHILD).unwrap().progress, before);

    let t = engine.record_event(CHILD, ProgressEvent::Login, day(2024, 1, 6)).unwrap();
    assert!(!t.deltas.clock_anomaly);
    assert_eq!(t.state.current_streak, 2);
}
