// Bulk restore reducers for disaster recovery
// Accept JSON arrays exported from the admin panel (TypeScript SDK format, camelCase keys)

use spacetimedb::{log, reducer, ReducerContext, Table, Timestamp};
use serde_json::Value;

use crate::calendar::{instant_from_micros, DateKey};
use crate::config::EngineConfig;
use crate::journal::TimeOfDay;
use crate::{authorized_worker, child_progress, journal_entry};
use crate::{ActivityCounters, ChildProgress, FirstTaskFlags, JournalEntry, TaskKind};

/// Exported timestamps look like {"__timestamp_micros_since_unix_epoch__": "123456"}
const TIMESTAMP_MICROS_KEY: &str = "__timestamp_micros_since_unix_epoch__";

/// Exported timestamp to micros, range-checked through the same path the engine uses
fn parse_micros_json(val: &Value) -> Result<i64, String> {
    let micros = val.get(TIMESTAMP_MICROS_KEY)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("timestamp must be an object with {}", TIMESTAMP_MICROS_KEY))?
        .parse::<i64>()
        .map_err(|e| format!("timestamp micros: {}", e))?;
    instant_from_micros(micros).map_err(|e| e.to_string())?;
    Ok(micros)
}

fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    parse_micros_json(val).map(Timestamp::from_micros_since_unix_epoch)
}

fn require_u32(val: &Value, key: &str, what: &str) -> Result<u32, String> {
    let n = val.get(key)
        .and_then(|v| v.as_u64())
        .ok_or(format!("{}: missing {}", what, key))?;
    u32::try_from(n).map_err(|_| format!("{}: {} out of range", what, key))
}

fn optional_str(val: &Value, key: &str) -> String {
    val.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

/// Parse FirstTaskFlags from {"avatar": true, "angerThermometer": false, ...}; missing keys are false
fn parse_first_tasks(val: Option<&Value>) -> FirstTaskFlags {
    let mut flags = FirstTaskFlags::default();
    let Some(val) = val else {
        return flags;
    };
    for kind in TaskKind::ALL {
        let key = match kind {
            TaskKind::Avatar => "avatar",
            TaskKind::AngerThermometer => "angerThermometer",
            TaskKind::HiToAnger => "hiToAnger",
            TaskKind::KnowYourAnger => "knowYourAnger",
            TaskKind::Journal => "journal",
        };
        if val.get(key).and_then(|v| v.as_bool()).unwrap_or(false) {
            flags.mark(kind);
        }
    }
    flags
}

/// Parse one ChildProgress from SDK JSON
/// Any exported league field is ignored: league is always derived from the score
fn parse_child_progress(p: &Value, i: usize) -> Result<ChildProgress, String> {
    let what = format!("Child {}", i);
    let id = p.get("id").and_then(|v| v.as_str()).ok_or(format!("{}: missing id", what))?.to_string();

    let last_login_day = match p.get("lastLoginDay") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let s = v.as_str().ok_or(format!("{}: lastLoginDay must be YYYY-MM-DD", what))?;
            Some(DateKey::parse(s).map_err(|e| format!("{}: {}", what, e))?)
        }
    };

    let counters = match p.get("counters") {
        Some(c) if !c.is_null() => ActivityCounters {
            logins: require_u32(c, "logins", &what)?,
            journal_entries: require_u32(c, "journalEntries", &what)?,
        },
        _ => ActivityCounters::default(),
    };

    let unlocked_badges = p.get("unlockedBadges")
        .and_then(|v| v.as_array())
        .ok_or(format!("{}: missing unlockedBadges", what))?
        .iter()
        .map(|b| b.as_str().map(|s| s.to_string()).ok_or(format!("{}: badge ids must be strings", what)))
        .collect::<Result<Vec<_>, _>>()?;

    let progress = ChildProgress {
        id,
        last_login_day,
        current_streak: require_u32(p, "currentStreak", &what)?,
        best_streak: require_u32(p, "bestStreak", &what)?,
        leadership_score: p.get("leadershipScore").and_then(|v| v.as_u64()).ok_or(format!("{}: missing leadershipScore", what))?,
        unlocked_badges,
        first_tasks: parse_first_tasks(p.get("firstTaskFlags")),
        received_first_login_bonus: p.get("receivedFirstLoginBonus").and_then(|v| v.as_bool()).unwrap_or(false),
        counters,
        version: 0,
        created_at: parse_timestamp_json(p.get("createdAt").ok_or(format!("{}: missing createdAt", what))?)?,
    };

    if progress.current_streak > progress.best_streak {
        return Err(format!("{}: currentStreak {} exceeds bestStreak {}", what, progress.current_streak, progress.best_streak));
    }
    EngineConfig::default().badges.check_known(&progress).map_err(|e| format!("{}: {}", what, e))?;
    Ok(progress)
}

/// Bulk restore child_progress table from JSON array
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_child_progress(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_child_progress attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;
    let children = data.as_array()
        .ok_or("Expected JSON array of child progress records")?;

    // Parse everything first so a bad row aborts before any write
    let parsed = children.iter()
        .enumerate()
        .map(|(i, p)| parse_child_progress(p, i))
        .collect::<Result<Vec<_>, _>>()?;

    let mut inserted = 0;
    let mut updated = 0;
    for progress in parsed {
        match ctx.db.child_progress().id().find(&progress.id) {
            Some(existing) => {
                // Keep the version moving forward so in-flight commits conflict
                let version = existing.version.wrapping_add(1);
                ctx.db.child_progress().id().update(ChildProgress { version, ..progress });
                updated += 1;
            }
            None => {
                ctx.db.child_progress().insert(progress);
                inserted += 1;
            }
        }
    }

    log::info!("✅ Restored child progress: {} inserted, {} updated", inserted, updated);
    Ok(())
}

/// Parse one JournalEntry from SDK JSON
fn parse_journal_entry(e: &Value, i: usize) -> Result<JournalEntry, String> {
    let what = format!("Journal entry {}", i);
    let occurred_on = e.get("occurredOn").and_then(|v| v.as_str()).ok_or(format!("{}: missing occurredOn", what))?;
    let time_of_day = e.get("timeOfDay").and_then(|v| v.as_str()).ok_or(format!("{}: missing timeOfDay", what))?;

    let emotions = e.get("emotions")
        .and_then(|v| v.as_array())
        .ok_or(format!("{}: missing emotions", what))?
        .iter()
        .map(|x| x.as_str().map(|s| s.to_string()).ok_or(format!("{}: emotions must be strings", what)))
        .collect::<Result<Vec<_>, _>>()?;

    let intensity = e.get("intensity").and_then(|v| v.as_u64()).ok_or(format!("{}: missing intensity", what))?;

    let entry = JournalEntry {
        id: 0, // auto_inc
        child_id: e.get("childId").and_then(|v| v.as_str()).ok_or(format!("{}: missing childId", what))?.to_string(),
        occurred_on: DateKey::parse(occurred_on).map_err(|err| format!("{}: {}", what, err))?,
        time_of_day: TimeOfDay::parse(time_of_day).map_err(|err| format!("{}: {}", what, err))?,
        emotions,
        intensity: u8::try_from(intensity).map_err(|_| format!("{}: intensity {} out of range", what, intensity))?,
        trigger: optional_str(e, "trigger"),
        coping_description: optional_str(e, "copingDescription"),
        improvement_note: optional_str(e, "improvementNote"),
        created_at_micros: match e.get("createdAt") {
            Some(v) if !v.is_null() => Some(parse_micros_json(v)?),
            _ => None,
        },
    };
    entry.validate().map_err(|err| format!("{}: {}", what, err))?;
    Ok(entry)
}

/// Bulk restore journal_entry table from JSON array
/// Entries get fresh ids; owners must already exist in child_progress
#[reducer]
pub fn bulk_restore_journal(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_journal attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;
    let entries = data.as_array()
        .ok_or("Expected JSON array of journal entries")?;

    let parsed = entries.iter()
        .enumerate()
        .map(|(i, e)| parse_journal_entry(e, i))
        .collect::<Result<Vec<_>, _>>()?;
    for entry in &parsed {
        if ctx.db.child_progress().id().find(&entry.child_id).is_none() {
            return Err(format!("Journal entry for unknown child {}", entry.child_id));
        }
    }

    let count = parsed.len();
    for entry in parsed {
        ctx.db.journal_entry().insert(entry);
    }

    log::info!("✅ Restored {} journal entries", count);
    Ok(())
}
